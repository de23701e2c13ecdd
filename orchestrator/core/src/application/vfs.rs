// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Virtual Filesystem Resolver
//!
//! Shared by the file-transfer front ends. A virtual path looks like
//! `<server>/<mount destination>/<rest>`:
//!
//! - `""` is the synthetic root, listing readable servers
//! - `"mc1"` is the synthetic server root, listing live mount destinations
//! - `"mc1/data/world/level.dat"` joins `world/level.dat` under the host
//!   source of the container's `/data` mount
//!
//! Mounts come from inspecting the container on every call, not from the
//! config: a container created under an older config keeps its old mounts
//! until it is recreated.

use std::sync::Arc;
use tracing::warn;

use crate::domain::config::UserSpec;
use crate::domain::path_sanitizer::PathSanitizer;
use crate::domain::permission::{self, ANY_SERVER};
use crate::domain::runtime::{ContainerRuntime, MountPoint};
use crate::domain::vfs::{FileAccess, VfsError, VfsPath};
use crate::infrastructure::config_store::ConfigStore;

pub struct VfsResolver {
    config: Arc<ConfigStore>,
    runtime: Arc<dyn ContainerRuntime>,
    sanitizer: PathSanitizer,
}

impl VfsResolver {
    pub fn new(config: Arc<ConfigStore>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            sanitizer: PathSanitizer::new(),
        }
    }

    /// Resolve a virtual path for `username`, checking `container.read`
    /// before the config lookup and before any engine call.
    pub async fn map_path(&self, path: &str, username: &str) -> Result<VfsPath, VfsError> {
        let segments = self.sanitizer.segments(path)?;
        let Some((&server, rest)) = segments.split_first() else {
            return Ok(VfsPath::Root);
        };

        let config = self.config.get();
        let user = config.users.get(username);
        self.require(user, username, server, permission::CONTAINER_READ)?;

        if !config.servers.contains_key(server) {
            return Err(VfsError::NotFound(format!("server '{}'", server)));
        }

        if rest.is_empty() {
            return Ok(VfsPath::ServerRoot(server.to_string()));
        }

        // Longest destination wins, so `/home/container` beats `/home`
        let mounts = self.live_mounts(server).await?;
        let (mount_point, depth) = mounts
            .iter()
            .filter_map(|m| {
                let destination = destination_segments(&m.destination);
                (!destination.is_empty() && rest.starts_with(&destination))
                    .then_some((m, destination.len()))
            })
            .max_by_key(|(_, depth)| *depth)
            .ok_or_else(|| {
                VfsError::NotFound(format!("mount '{}' of '{}'", rest.join("/"), server))
            })?;

        Ok(VfsPath::Host(PathSanitizer::join_under(
            &mount_point.source,
            &rest[depth..],
        )))
    }

    /// Check the file permission a protocol verb needs on the path's server.
    ///
    /// The synthetic root is readable by everyone and writable by nobody.
    pub fn authorize(&self, path: &str, username: &str, access: FileAccess) -> Result<(), VfsError> {
        let config = self.config.get();
        let user = config.users.get(username);
        match self.sanitizer.server_name(path)? {
            Some(server) => self.require(user, username, server, access.required_permission()),
            None if access == FileAccess::Read => Ok(()),
            None => Err(VfsError::PermissionDenied {
                user: username.to_string(),
                server: "/".to_string(),
                permission: access.required_permission(),
            }),
        }
    }

    /// Configured servers the user may read, sorted
    pub fn list_root(&self, username: &str) -> Vec<String> {
        let config = self.config.get();
        let Some(user) = config.users.get(username) else {
            return Vec::new();
        };
        config
            .servers
            .keys()
            .filter(|name| user.has_permission(name, permission::CONTAINER_READ))
            .cloned()
            .collect()
    }

    /// Live mount destinations of a server, without slashes, sorted
    pub async fn list_server_root(&self, server: &str) -> Result<Vec<String>, VfsError> {
        let mut destinations: Vec<String> = self
            .live_mounts(server)
            .await?
            .into_iter()
            .map(|m| destination_segments(&m.destination).join("/"))
            .filter(|d| !d.is_empty())
            .collect();
        destinations.sort();
        destinations.dedup();
        Ok(destinations)
    }

    async fn live_mounts(&self, server: &str) -> Result<Vec<MountPoint>, VfsError> {
        match self.runtime.inspect(server).await {
            Ok(Some(snapshot)) => Ok(snapshot.mounts),
            Ok(None) => Err(VfsError::NotFound(format!("container '{}'", server))),
            Err(source) => Err(VfsError::Runtime {
                server: server.to_string(),
                source,
            }),
        }
    }

    fn require(
        &self,
        user: Option<&UserSpec>,
        username: &str,
        server: &str,
        required: &'static str,
    ) -> Result<(), VfsError> {
        if server != ANY_SERVER && user.is_some_and(|u| u.has_permission(server, required)) {
            return Ok(());
        }
        warn!(user = %username, server = %server, permission = required, "File access denied");
        Err(VfsError::PermissionDenied {
            user: username.to_string(),
            server: server.to_string(),
            permission: required,
        })
    }
}

fn destination_segments(destination: &str) -> Vec<&str> {
    destination.split('/').filter(|s| !s.is_empty()).collect()
}
