// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Lexical normalization of virtual paths handed in by file-transfer front
//! ends. Normalization never touches the filesystem: `.` segments and empty
//! segments are dropped and `..` pops the previous segment, stopping at the
//! virtual root. The resulting segments can be joined under any host
//! directory without escaping it.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default maximum accepted path length in bytes
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSanitizerError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path too long: {0} bytes")]
    PathTooLong(usize),
}

pub struct PathSanitizer {
    max_path_len: usize,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self {
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }

    pub fn with_max_length(max_path_len: usize) -> Self {
        Self { max_path_len }
    }

    /// Split a virtual path into normalized segments.
    ///
    /// Both `/` and `\` separate segments. An empty result is the virtual root.
    ///
    /// # Examples
    /// ```
    /// use playbin_core::domain::path_sanitizer::PathSanitizer;
    ///
    /// let sanitizer = PathSanitizer::new();
    /// let segments = sanitizer.segments("/mc1/./data//world/../level.dat").unwrap();
    /// assert_eq!(segments, vec!["mc1", "data", "level.dat"]);
    ///
    /// // `..` never climbs above the root
    /// assert!(sanitizer.segments("../../..").unwrap().is_empty());
    /// ```
    pub fn segments<'a>(&self, path: &'a str) -> Result<Vec<&'a str>, PathSanitizerError> {
        if path.len() > self.max_path_len {
            return Err(PathSanitizerError::PathTooLong(path.len()));
        }
        if path.contains('\0') {
            tracing::warn!("Virtual path contains a NUL byte");
            return Err(PathSanitizerError::InvalidPath(
                "path contains a NUL byte".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for segment in path.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Ok(segments)
    }

    /// First segment of a normalized path, if any
    pub fn server_name<'a>(&self, path: &'a str) -> Result<Option<&'a str>, PathSanitizerError> {
        Ok(self.segments(path)?.into_iter().next())
    }

    /// Join already-normalized segments under a host directory
    pub fn join_under(root: &Path, rest: &[&str]) -> PathBuf {
        let mut joined = root.to_path_buf();
        joined.extend(rest);
        joined
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}
