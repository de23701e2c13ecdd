// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::path_sanitizer::PathSanitizerError;
use crate::domain::permission;
use crate::domain::runtime::RuntimeError;

/// Result of resolving a virtual path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsPath {
    /// Synthetic root listing every readable server
    Root,
    /// Synthetic per-server directory listing live mount destinations
    ServerRoot(String),
    /// Real path on the host
    Host(PathBuf),
}

/// Access class of a file-transfer verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// read, stat, list
    Read,
    /// create, modify, delete, rename, mkdir
    Write,
}

impl FileAccess {
    pub fn required_permission(&self) -> &'static str {
        match self {
            FileAccess::Read => permission::FILE_READ,
            FileAccess::Write => permission::FILE_WRITE,
        }
    }
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("Permission denied: {user} lacks {permission} on '{server}'")]
    PermissionDenied {
        user: String,
        server: String,
        permission: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidPath(#[from] PathSanitizerError),

    #[error("Failed to inspect '{server}': {source}")]
    Runtime {
        server: String,
        #[source]
        source: RuntimeError,
    },
}
