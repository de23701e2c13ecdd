// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Permission Model
//!
//! Permissions are dot-segmented strings such as `container.execute.start`.
//! A user holds a set of granted strings per server name, plus an optional set
//! under the `"*"` key that applies to every server.
//!
//! ## Pattern Matching
//!
//! A granted string matches a required one when:
//! - it is the literal `"*"`
//! - it is equal to the required string
//! - walking both segment by segment, a `*` segment is reached before any
//!   literal mismatch (`"container.*"` covers `"container.execute.start"`)
//!
//! A granted string shorter than the required one without a trailing wildcard
//! does not match: `"container.execute"` does not cover
//! `"container.execute.start"`.

use crate::domain::config::{Config, UserSpec};

/// Server key that applies to every server name
pub const ANY_SERVER: &str = "*";

pub const CONTAINER_READ: &str = "container.read";
pub const CONTAINER_WRITE: &str = "container.write";
pub const CONTAINER_START: &str = "container.execute.start";
pub const CONTAINER_STOP: &str = "container.execute.stop";
pub const CONTAINER_KILL: &str = "container.execute.kill";
pub const CONTAINER_BACKUP: &str = "container.execute.backup";
pub const CONTAINER_RESTORE: &str = "container.execute.restore";
pub const CONTAINER_REMOVE: &str = "container.execute.remove";
pub const FILE_READ: &str = "file.read";
pub const FILE_WRITE: &str = "file.write";

/// Whether `granted` covers `required`
pub fn matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }

    let mut required_segments = required.split('.');
    for segment in granted.split('.') {
        if segment == "*" {
            return true;
        }
        match required_segments.next() {
            Some(r) if r == segment => continue,
            _ => return false,
        }
    }

    // Granted exhausted: only a full-length match counts, and that case was
    // already handled by the equality check above.
    false
}

/// Evaluate a user's permission on a server: exact key first, then `"*"`.
pub fn has_permission(user: &UserSpec, server: &str, permission: &str) -> bool {
    let grants = |key: &str| {
        user.permissions
            .get(key)
            .is_some_and(|set| set.iter().any(|granted| matches(granted, permission)))
    };

    grants(server) || grants(ANY_SERVER)
}

impl UserSpec {
    pub fn has_permission(&self, server: &str, permission: &str) -> bool {
        has_permission(self, server, permission)
    }
}

impl Config {
    /// Unknown users hold no permissions
    pub fn user_has_permission(&self, username: &str, server: &str, permission: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|user| user.has_permission(server, permission))
    }

    /// Verify a username/password pair
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&UserSpec> {
        self.users
            .get(username)
            .filter(|user| !user.password.is_empty() && user.password == password)
    }
}
