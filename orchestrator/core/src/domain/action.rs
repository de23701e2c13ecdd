// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::permission;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown action: {0}")]
pub struct UnknownAction(pub String);

/// Lifecycle actions accepted by every front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Kill,
    Backup,
    Restore,
    Remove,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Start,
        Action::Stop,
        Action::Kill,
        Action::Backup,
        Action::Restore,
        Action::Remove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Kill => "kill",
            Action::Backup => "backup",
            Action::Restore => "restore",
            Action::Remove => "remove",
        }
    }

    /// Permission a caller must hold on the server to run this action
    pub fn required_permission(&self) -> &'static str {
        match self {
            Action::Start => permission::CONTAINER_START,
            Action::Stop => permission::CONTAINER_STOP,
            Action::Kill => permission::CONTAINER_KILL,
            Action::Backup => permission::CONTAINER_BACKUP,
            Action::Restore => permission::CONTAINER_RESTORE,
            Action::Remove => permission::CONTAINER_REMOVE,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}
