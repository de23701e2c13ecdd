// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::config::{ComposeSpec, RestartPolicy};

/// Everything needed to create one server container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// `host:container` bind strings
    pub binds: Vec<String>,
    pub restart: RestartPolicy,
    pub network_mode: String,
    /// Container port -> host port, empty outside bridge mode
    pub port_bindings: BTreeMap<u16, u16>,
}

impl ContainerSpec {
    /// Build the engine configuration of a managed server.
    ///
    /// TTY and stdin are always enabled by the runtime adapter so the stop and
    /// backup sequences can write to the console.
    pub fn from_compose(name: &str, compose: &ComposeSpec) -> Self {
        let (entrypoint, cmd) = match &compose.command {
            Some(command) => (
                split_words(&command.entrypoint),
                split_words(&command.arguments),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let binds = compose
            .mount
            .iter()
            .map(|(host, container)| format!("{}:{}", host, container))
            .collect();

        let network_mode = compose.network.mode().to_string();

        // Port publishing only makes sense on the default bridge network
        let port_bindings = if network_mode == crate::domain::config::NetworkSpec::DEFAULT_MODE {
            compose
                .network
                .mapping
                .iter()
                .filter_map(|(host, container)| {
                    Some((container.parse().ok()?, host.parse().ok()?))
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        Self {
            name: name.to_string(),
            image: compose.image.trim().to_string(),
            entrypoint,
            cmd,
            binds,
            restart: compose.restart,
            network_mode,
            port_bindings,
        }
    }
}

fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// One bind mount of an inspected container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub destination: String,
    pub source: PathBuf,
}

/// Inspect result of an existing container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    /// Engine status string (`created`, `running`, `exited`, ...)
    pub status: String,
    pub running: bool,
    pub mounts: Vec<MountPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub name: String,
    pub status: String,
}

/// Lines of a followed log stream, without their trailing newline
pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Cannot connect to the container engine: {0}")]
    Connection(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Console of {0} is already attached")]
    AttachBusy(String),

    #[error("Command exited with status {code}")]
    NonZeroExit { code: i64 },

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Container engine port. One handle is shared by every service.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `None` when no container with this name exists
    async fn inspect(&self, name: &str) -> Result<Option<ContainerSnapshot>, RuntimeError>;

    async fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// A container that is already stopped counts as success
    async fn stop(&self, name: &str, timeout: Option<Duration>) -> Result<(), RuntimeError>;

    async fn kill(&self, name: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// Write raw text to the container's stdin
    async fn send_input(&self, name: &str, input: &str) -> Result<(), RuntimeError>;

    /// Run a command inside the container and wait for a zero exit status
    async fn exec(&self, name: &str, command: &[String]) -> Result<(), RuntimeError>;

    /// The last `tail` log lines, oldest first
    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError>;

    /// Follow new log lines from now on
    async fn follow_logs(&self, name: &str) -> Result<LogStream, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{NetworkSpec, StartCommand};

    fn compose() -> ComposeSpec {
        ComposeSpec {
            image: "itzg/minecraft-server".to_string(),
            command: Some(StartCommand {
                entrypoint: "".to_string(),
                arguments: "--nogui  --port 25565".to_string(),
            }),
            restart: RestartPolicy::Always,
            network: NetworkSpec {
                mode: None,
                mapping: [("25565".to_string(), "25566".to_string())].into(),
            },
            mount: [("/srv/mc1".to_string(), "/data".to_string())].into(),
        }
    }

    #[test]
    fn test_spec_from_compose() {
        let spec = ContainerSpec::from_compose("mc1", &compose());
        assert_eq!(spec.name, "mc1");
        assert!(spec.entrypoint.is_empty());
        assert_eq!(spec.cmd, vec!["--nogui", "--port", "25565"]);
        assert_eq!(spec.binds, vec!["/srv/mc1:/data"]);
        assert_eq!(spec.network_mode, "bridge");
        assert_eq!(spec.port_bindings.get(&25566), Some(&25565));
    }

    #[test]
    fn test_ports_ignored_outside_bridge() {
        let mut compose = compose();
        compose.network.mode = Some("host".to_string());
        let spec = ContainerSpec::from_compose("mc1", &compose);
        assert_eq!(spec.network_mode, "host");
        assert!(spec.port_bindings.is_empty());
    }
}
