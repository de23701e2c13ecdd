// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy shared by every front end.
//!
//! Front ends render [`ErrorKind`] (404, 403, 409, ...) instead of matching on
//! messages.

use serde::Serialize;
use thiserror::Error;

use crate::domain::backup::MirrorError;
use crate::domain::runtime::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Conflict,
    InvalidArgument,
    Engine,
    PartialFailure,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Server '{0}' is not configured")]
    ServerNotFound(String),

    #[error("Server '{0}' has no compose image and cannot be created")]
    Unmanaged(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Generation '{generation}' not found for server '{server}'")]
    GenerationNotFound { server: String, generation: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to {operation} '{server}': {source}")]
    Runtime {
        operation: &'static str,
        server: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to {operation} '{server}': {source}")]
    Mirror {
        operation: &'static str,
        server: String,
        #[source]
        source: MirrorError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} of '{server}' partially failed: {}", .failures.join("; "))]
    PartialFailure {
        operation: &'static str,
        server: String,
        failures: Vec<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl LifecycleError {
    pub fn runtime(operation: &'static str, server: &str, source: RuntimeError) -> Self {
        LifecycleError::Runtime {
            operation,
            server: server.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::ServerNotFound(_) | LifecycleError::GenerationNotFound { .. } => {
                ErrorKind::NotFound
            }
            LifecycleError::Unmanaged(_) | LifecycleError::Conflict(_) => ErrorKind::Conflict,
            LifecycleError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LifecycleError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            LifecycleError::Runtime { source, .. } => match source {
                RuntimeError::NotFound(_) => ErrorKind::NotFound,
                RuntimeError::AttachBusy(_) => ErrorKind::Conflict,
                _ => ErrorKind::Engine,
            },
            LifecycleError::Mirror { source, .. } => match source {
                MirrorError::Cancelled => ErrorKind::Cancelled,
                _ => ErrorKind::Engine,
            },
            LifecycleError::Io { .. } => ErrorKind::Engine,
            LifecycleError::PartialFailure { .. } => ErrorKind::PartialFailure,
            LifecycleError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
