// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Backup root layout on the local filesystem.
//!
//! ```text
//! /backups/mc1/
//!     20260301_040000/
//!     20260302_040000/
//!     latest -> 20260302_040000
//! ```

use chrono::{DateTime, TimeZone};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::backup::{generation_name, sort_generations, LATEST};

/// Name for a new generation that does not exist under any destination yet.
///
/// A second run within the same second gets a `-001`, `-002`, ... suffix,
/// zero padded so names keep sorting chronologically.
pub async fn next_generation<Tz: TimeZone>(destinations: &[&Path], at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    let base = generation_name(at);
    let mut candidate = base.clone();
    let mut suffix = 0u32;
    while exists_in_any(destinations, &candidate).await {
        suffix += 1;
        candidate = format!("{}-{:03}", base, suffix);
    }
    candidate
}

async fn exists_in_any(destinations: &[&Path], name: &str) -> bool {
    for destination in destinations {
        if tokio::fs::symlink_metadata(destination.join(name)).await.is_ok() {
            return true;
        }
    }
    false
}

/// Generation directories across every destination, newest first.
///
/// Missing destinations count as empty.
pub async fn list(destinations: &[&Path]) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for destination in destinations {
        let mut entries = match tokio::fs::read_dir(destination).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            // `file_type` does not follow symlinks, so `latest` is never a dir here
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(sort_generations(names))
}

/// Directory the `latest` pointer of a destination resolves to, if usable
pub async fn resolve_latest(destination: &Path) -> Option<PathBuf> {
    let target = tokio::fs::read_link(destination.join(LATEST)).await.ok()?;
    let resolved = if target.is_absolute() {
        target
    } else {
        destination.join(target)
    };
    match tokio::fs::metadata(&resolved).await {
        Ok(meta) if meta.is_dir() => Some(resolved),
        _ => {
            debug!(destination = %destination.display(), "latest pointer is dangling");
            None
        }
    }
}

/// Point `latest` at `generation` with a temp symlink and a rename, so
/// readers never observe a missing pointer.
pub async fn repoint_latest(destination: &Path, generation: &str) -> io::Result<()> {
    let temp = destination.join(format!(".{}.tmp-{}", LATEST, uuid::Uuid::new_v4()));
    symlink_dir(Path::new(generation), &temp).await?;
    if let Err(e) = tokio::fs::rename(&temp, destination.join(LATEST)).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
async fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink_dir(target, link).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_skips_latest_and_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for name in ["20260101_000000", "20260301_000000", "20260201_000000"] {
            std::fs::create_dir(root.join(name)).unwrap();
        }
        std::fs::write(root.join("notes.txt"), "x").unwrap();
        repoint_latest(root, "20260301_000000").await.unwrap();

        let other = TempDir::new().unwrap();
        std::fs::create_dir(other.path().join("20260201_000000")).unwrap();

        let missing = root.join("does-not-exist");
        let listed = list(&[root, other.path(), missing.as_path()]).await.unwrap();
        assert_eq!(listed, vec!["20260301_000000", "20260201_000000", "20260101_000000"]);
    }

    #[tokio::test]
    async fn test_repoint_latest_replaces_pointer() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("a")).unwrap();
        std::fs::create_dir(root.join("b")).unwrap();

        assert!(resolve_latest(root).await.is_none());
        repoint_latest(root, "a").await.unwrap();
        assert_eq!(resolve_latest(root).await, Some(root.join("a")));
        repoint_latest(root, "b").await.unwrap();
        assert_eq!(resolve_latest(root).await, Some(root.join("b")));

        // No temp links left behind
        let leftovers = std::fs::read_dir(root)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_next_generation_suffixes_collisions() {
        let dir = TempDir::new().unwrap();
        let at = Local.with_ymd_and_hms(2026, 3, 7, 4, 5, 6).unwrap();
        let root = dir.path();

        assert_eq!(next_generation(&[root], &at).await, "20260307_040506");
        std::fs::create_dir(root.join("20260307_040506")).unwrap();
        assert_eq!(next_generation(&[root], &at).await, "20260307_040506-001");
        std::fs::create_dir(root.join("20260307_040506-001")).unwrap();
        assert_eq!(next_generation(&[root], &at).await, "20260307_040506-002");
    }

    #[tokio::test]
    async fn test_suffixed_generations_stay_chronological() {
        let dir = TempDir::new().unwrap();
        let at = Local.with_ymd_and_hms(2026, 3, 7, 4, 5, 6).unwrap();
        let root = dir.path();

        let mut created = Vec::new();
        for _ in 0..12 {
            let name = next_generation(&[root], &at).await;
            std::fs::create_dir(root.join(&name)).unwrap();
            created.push(name);
        }

        let mut newest_first = created.clone();
        newest_first.reverse();
        assert_eq!(list(&[root]).await.unwrap(), newest_first);
        assert_eq!(created[11], "20260307_040506-011");
    }
}
