// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Server Configuration Types
//
// Defines the JSON configuration schema read by the config store:
// - Listener settings for the front ends
// - Users, their shared secret and per-server permission sets
// - Servers: compose definition, stop/backup step sequences, chat integration
//
// A `Config` value is immutable once built. Reloads replace it wholesale.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::backup::BackupTarget;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP API listen address (empty or absent disables the API)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_listen: Option<String>,

    /// SFTP listen address, consumed by the file-transfer adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftp_listen: Option<String>,

    #[serde(default)]
    pub users: BTreeMap<String, UserSpec>,

    #[serde(default)]
    pub servers: BTreeMap<String, ServerSpec>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Shared secret for every front end
    pub password: String,

    /// Chat subject identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,

    /// Server name (or `"*"`) -> granted permission strings
    #[serde(default)]
    pub permissions: HashMap<String, BTreeSet<String>>,
}

impl fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpec")
            .field("password", &REDACTED)
            .field("discord", &self.discord)
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeSpec>,

    #[serde(default)]
    pub commands: CommandsSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordSpec>,
}

impl ServerSpec {
    /// Compose definition, only when it names an image.
    ///
    /// Servers without one are unmanaged: they can be stopped, backed up and
    /// restored, but never created.
    pub fn managed_compose(&self) -> Option<&ComposeSpec> {
        self.compose.as_ref().filter(|c| !c.image.trim().is_empty())
    }

    pub fn is_managed(&self) -> bool {
        self.managed_compose().is_some()
    }

    /// All `backup` steps of the backup sequence, in order.
    pub fn backup_targets(&self) -> impl Iterator<Item = &BackupTarget> {
        self.commands.backup.iter().filter_map(|step| match step {
            Step::Backup(target) => Some(target),
            _ => None,
        })
    }

    /// Webhook URL and rules file when log forwarding is configured.
    pub fn log_forwarding(&self) -> Option<(&str, &str)> {
        let discord = self.discord.as_ref()?;
        let webhook = discord.webhook.as_deref().filter(|w| !w.is_empty())?;
        let rules = discord.log_setting.as_deref().filter(|p| !p.is_empty())?;
        Some((webhook, rules))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<StartCommand>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(default)]
    pub network: NetworkSpec,

    /// Host path -> container path
    #[serde(default)]
    pub mount: BTreeMap<String, String>,
}

/// Entrypoint and argument overrides, whitespace separated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    #[serde(default)]
    pub entrypoint: String,

    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Docker network mode ("bridge" when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Host port -> container port, only honoured in bridge mode
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

impl NetworkSpec {
    pub const DEFAULT_MODE: &'static str = "bridge";

    pub fn mode(&self) -> &str {
        match self.mode.as_deref().map(str::trim) {
            Some(mode) if !mode.is_empty() => mode,
            _ => Self::DEFAULT_MODE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsSpec {
    #[serde(default)]
    pub stop: Vec<Step>,

    #[serde(default)]
    pub backup: Vec<Step>,

    /// Template for chat -> console message forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One step of a stop or backup sequence.
///
/// Serialized as `{"type": "sleep", "arg": "5s"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "arg", rename_all = "lowercase")]
pub enum Step {
    /// Write text to the container's stdin
    Attach(String),
    /// Run a shell command inside the container and wait for it
    Exec(String),
    /// Emit an operational log line
    Log(String),
    /// Block for the given duration
    Sleep(#[serde(with = "humantime_serde")] Duration),
    /// Mirror `source` into a new generation under `destination`
    Backup(BackupTarget),
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Attach(_) => "attach",
            Step::Exec(_) => "exec",
            Step::Log(_) => "log",
            Step::Sleep(_) => "sleep",
            Step::Backup(_) => "backup",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,

    /// Path to the log filter rules file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_setting: Option<String>,
}

pub const REDACTED: &str = "<redacted>";

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Copy safe to print: passwords, bot tokens and webhook URLs masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for user in config.users.values_mut() {
            user.password = REDACTED.to_string();
        }
        for discord in config.servers.values_mut().filter_map(|s| s.discord.as_mut()) {
            for secret in [&mut discord.token, &mut discord.webhook] {
                if secret.is_some() {
                    *secret = Some(REDACTED.to_string());
                }
            }
        }
        config
    }

    /// Validate semantic constraints that the JSON schema cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut host_ports: HashMap<&str, &str> = HashMap::new();
        for (name, server) in &self.servers {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "server name '{}' must be non-empty and must not contain '/'",
                    name
                )));
            }

            // An image-less compose marks the server unmanaged; nothing in it is used
            if let Some(compose) = server.managed_compose() {
                for (host_port, container_port) in &compose.network.mapping {
                    for port in [host_port, container_port] {
                        if port.parse::<u16>().is_err() {
                            return Err(ConfigError::Invalid(format!(
                                "servers.{}.compose.network.mapping has invalid port '{}'",
                                name, port
                            )));
                        }
                    }
                }

                if compose.network.mode() == NetworkSpec::DEFAULT_MODE {
                    for host_port in compose.network.mapping.keys() {
                        if let Some(other) = host_ports.insert(host_port, name) {
                            return Err(ConfigError::Invalid(format!(
                                "host port {} is published by both '{}' and '{}'",
                                host_port, other, name
                            )));
                        }
                    }
                }

                for (host, container) in &compose.mount {
                    if !host.starts_with('/') || !container.starts_with('/') {
                        return Err(ConfigError::Invalid(format!(
                            "servers.{}.compose.mount '{}:{}' must use absolute paths",
                            name, host, container
                        )));
                    }
                }
            }

            if server.commands.stop.iter().any(|s| matches!(s, Step::Backup(_))) {
                return Err(ConfigError::Invalid(format!(
                    "servers.{}.commands.stop cannot contain backup steps",
                    name
                )));
            }
        }

        for (username, user) in &self.users {
            if user.password.is_empty() {
                tracing::warn!(user = %username, "User has an empty password and cannot log in");
            }
            for key in user.permissions.keys() {
                if key != "*" && !self.servers.contains_key(key) {
                    tracing::warn!(user = %username, server = %key, "Permissions granted on an unknown server");
                }
            }
        }

        Ok(())
    }
}
