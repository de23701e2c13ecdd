// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Backup Generations
//!
//! A generation is a directory named after the local timestamp of the backup
//! run (`YYYYMMDD_HHMMSS`) under a destination base. The `latest` entry is a
//! symlink to the newest generation and is never listed as one.
//!
//! Lexicographic order of generation names equals chronological order, which
//! is what [`sort_generations`] relies on.
//!
//! The copy itself is delegated to a [`Mirror`] so the lifecycle service can be
//! exercised without an rsync binary.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Name of the pointer to the most recent generation
pub const LATEST: &str = "latest";

/// `strftime` layout of generation names
pub const GENERATION_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackupTargetError {
    #[error("Backup target '{0}' must be of the form 'source:destination'")]
    Malformed(String),
}

/// `source:destinationBase` pair of a backup step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupTarget {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FromStr for BackupTarget {
    type Err = BackupTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((source, destination)) if !source.is_empty() && !destination.is_empty() => Ok(Self {
                source: PathBuf::from(source),
                destination: PathBuf::from(destination),
            }),
            _ => Err(BackupTargetError::Malformed(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackupTarget {
    type Error = BackupTargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackupTarget> for String {
    fn from(target: BackupTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.display(), self.destination.display())
    }
}

/// Timestamp part of a generation name
pub fn generation_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format(GENERATION_FORMAT).to_string()
}

/// Reject generation identifiers that could escape a destination base or
/// alias the `latest` pointer.
pub fn validate_generation(generation: &str) -> Result<(), String> {
    if generation.is_empty() {
        return Err("generation is required".to_string());
    }
    if generation == LATEST {
        return Err(format!("'{}' is a pointer, not a generation", LATEST));
    }
    if generation.starts_with('.') || generation.contains(['/', '\\', '\0']) {
        return Err(format!("'{}' is not a valid generation name", generation));
    }
    Ok(())
}

/// Deduplicate and order generations newest first
pub fn sort_generations(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut generations: Vec<String> = names
        .into_iter()
        .filter(|name| name != LATEST)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    generations.reverse();
    generations
}

/// Parameters of one mirror operation.
///
/// The *contents* of `source` end up in `destination`; files in `destination`
/// that are absent from `source` are deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Previous generation to hard-link unchanged files against
    pub link_dest: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Failed to launch mirror process: {0}")]
    Spawn(String),

    #[error("Mirror process exited with {status}: {output}")]
    Failed { status: String, output: String },

    #[error("Mirror cancelled")]
    Cancelled,
}

/// Directory mirroring port (rsync in production)
#[async_trait]
pub trait Mirror: Send + Sync {
    async fn mirror(&self, request: &MirrorRequest, cancel: &CancellationToken) -> Result<(), MirrorError>;
}
