// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle Manager
//!
//! Translates `(server, Action)` pairs into container engine calls plus the
//! server's own stop and backup sequences.
//!
//! Container state is never stored here. Every operation inspects the engine:
//!
//! | State | start | stop | kill | backup | restore | remove |
//! |-------|-------|------|------|--------|---------|--------|
//! | absent | create + start | engine decides | engine decides | steps, no console | mirror back | no-op |
//! | created / exited | Conflict | engine no-op | engine no-op | steps, no console | mirror back | remove |
//! | running | Conflict | sequence + stop | stop(30s) or SIGKILL | full sequence | Conflict | Conflict |
//!
//! Backup and restore of the same server never overlap: a second call while
//! one is in flight fails with a conflict instead of waiting.

use chrono::Local;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::action::Action;
use crate::domain::backup::{validate_generation, BackupTarget, Mirror, MirrorError, MirrorRequest};
use crate::domain::config::Step;
use crate::domain::error::LifecycleError;
use crate::domain::runtime::{ContainerRuntime, ContainerSpec};
use crate::infrastructure::config_store::ConfigStore;
use crate::infrastructure::generations;

/// Grace period of the stop attempt made by `kill`
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(30);

pub struct LifecycleManager {
    config: Arc<ConfigStore>,
    runtime: Arc<dyn ContainerRuntime>,
    mirror: Arc<dyn Mirror>,
    in_flight: Arc<DashMap<String, &'static str>>,
}

/// Releases the per-server backup/restore claim on drop
struct FlightGuard {
    in_flight: Arc<DashMap<String, &'static str>>,
    server: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.server);
    }
}

impl LifecycleManager {
    pub fn new(
        config: Arc<ConfigStore>,
        runtime: Arc<dyn ContainerRuntime>,
        mirror: Arc<dyn Mirror>,
    ) -> Self {
        Self {
            config,
            runtime,
            mirror,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Run one action. `Restore` is rejected here because it needs a generation.
    pub async fn execute_action(
        &self,
        server: &str,
        action: Action,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        info!(server = %server, action = %action, "Executing action");
        match action {
            Action::Start => self.start(server).await,
            Action::Stop => self.stop(server, cancel).await,
            Action::Kill => self.kill(server).await,
            Action::Backup => self.backup(server, cancel).await,
            Action::Restore => Err(LifecycleError::InvalidArgument(
                "restore requires a generation".to_string(),
            )),
            Action::Remove => self.remove(server).await,
        }
    }

    /// Create and start the container of a managed server.
    ///
    /// An existing container, running or not, is never replaced.
    pub async fn start(&self, server: &str) -> Result<(), LifecycleError> {
        let config = self.config.get();
        let spec = config
            .servers
            .get(server)
            .ok_or_else(|| LifecycleError::ServerNotFound(server.to_string()))?;
        let compose = spec
            .managed_compose()
            .ok_or_else(|| LifecycleError::Unmanaged(server.to_string()))?;

        let existing = self
            .runtime
            .inspect(server)
            .await
            .map_err(|e| LifecycleError::runtime("inspect", server, e))?;
        if let Some(existing) = existing {
            return Err(LifecycleError::Conflict(format!(
                "container '{}' already exists ({}); remove it first",
                server, existing.status
            )));
        }

        let container = ContainerSpec::from_compose(server, compose);
        self.runtime
            .create(&container)
            .await
            .map_err(|e| LifecycleError::runtime("create", server, e))?;
        self.runtime
            .start(server)
            .await
            .map_err(|e| LifecycleError::runtime("start", server, e))?;

        info!(server = %server, image = %container.image, "Server started");
        Ok(())
    }

    /// Run the stop sequence, then stop the container.
    ///
    /// Unconfigured names get a plain engine stop.
    pub async fn stop(&self, server: &str, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        let config = self.config.get();
        match config.servers.get(server) {
            Some(spec) => {
                for (index, step) in spec.commands.stop.iter().enumerate() {
                    check_cancelled(cancel)?;
                    self.run_console_step(server, index, step, Sequence::Stop, cancel).await?;
                }
            }
            None => debug!(server = %server, "Server not configured, issuing plain stop"),
        }

        self.runtime
            .stop(server, None)
            .await
            .map_err(|e| LifecycleError::runtime("stop", server, e))?;

        info!(server = %server, "Server stopped");
        Ok(())
    }

    /// Stop with a bounded grace period, falling back to SIGKILL
    pub async fn kill(&self, server: &str) -> Result<(), LifecycleError> {
        match self.runtime.stop(server, Some(KILL_GRACE_PERIOD)).await {
            Ok(()) => {
                info!(server = %server, "Server stopped within grace period");
                Ok(())
            }
            Err(e) => {
                warn!(server = %server, error = %e, "Graceful stop failed, sending SIGKILL");
                self.runtime
                    .kill(server)
                    .await
                    .map_err(|e| LifecycleError::runtime("kill", server, e))?;
                info!(server = %server, "Server killed");
                Ok(())
            }
        }
    }

    /// Run the backup sequence and write one new generation per backup step.
    ///
    /// Console steps (`attach`, `exec`, `sleep`) only run when the container
    /// is running. Every backup step is attempted; failures are collected.
    pub async fn backup(&self, server: &str, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        let config = self.config.get();
        let spec = config
            .servers
            .get(server)
            .ok_or_else(|| LifecycleError::ServerNotFound(server.to_string()))?;
        let _flight = self.claim(server, "backup")?;

        let running = match self.runtime.inspect(server).await {
            Ok(snapshot) => snapshot.is_some_and(|s| s.running),
            Err(e) => {
                warn!(server = %server, error = %e, "Cannot inspect container, treating it as stopped");
                false
            }
        };

        let destinations: Vec<&Path> = spec.backup_targets().map(|t| t.destination.as_path()).collect();
        let generation = generations::next_generation(&destinations, &Local::now()).await;
        info!(server = %server, generation = %generation, running, "Backup started");

        let mut failures = Vec::new();
        for (index, step) in spec.commands.backup.iter().enumerate() {
            check_cancelled(cancel)?;
            match step {
                Step::Backup(target) => {
                    match self.backup_target(server, target, &generation, cancel).await {
                        Ok(()) => {}
                        Err(LifecycleError::Cancelled) => return Err(LifecycleError::Cancelled),
                        Err(e) => {
                            warn!(server = %server, target = %target, error = %e, "Backup step failed");
                            failures.push(format!("step {} ({}): {}", index + 1, target, e));
                        }
                    }
                }
                _ => {
                    self.run_console_step(server, index, step, Sequence::Backup { running }, cancel)
                        .await?
                }
            }
        }

        if !failures.is_empty() {
            return Err(LifecycleError::PartialFailure {
                operation: "backup",
                server: server.to_string(),
                failures,
            });
        }

        info!(server = %server, generation = %generation, "Backup completed");
        Ok(())
    }

    async fn backup_target(
        &self,
        server: &str,
        target: &BackupTarget,
        generation: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        let base = &target.destination;
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|source| LifecycleError::Io {
                context: format!("cannot create {}", base.display()),
                source,
            })?;

        let request = MirrorRequest {
            source: target.source.clone(),
            destination: base.join(generation),
            link_dest: generations::resolve_latest(base).await,
        };

        if let Err(e) = self.mirror.mirror(&request, cancel).await {
            // Do not leave a half-written generation behind to be listed
            if let Err(cleanup) = tokio::fs::remove_dir_all(&request.destination).await {
                debug!(path = %request.destination.display(), error = %cleanup, "No partial generation to clean up");
            }
            return Err(mirror_error("back up", server, e));
        }

        generations::repoint_latest(base, generation)
            .await
            .map_err(|source| LifecycleError::Io {
                context: format!("cannot update {}/latest", base.display()),
                source,
            })?;

        debug!(server = %server, generation = %generation, destination = %base.display(), "Generation written");
        Ok(())
    }

    /// Mirror one generation back onto every backup source.
    ///
    /// The container must not be running. Destinations that lack the
    /// generation are skipped; if none has it the call fails with not-found.
    pub async fn restore(
        &self,
        server: &str,
        generation: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if generation.is_empty() {
            return Err(LifecycleError::InvalidArgument(
                "generation is required for restore".to_string(),
            ));
        }
        validate_generation(generation).map_err(LifecycleError::InvalidArgument)?;

        let config = self.config.get();
        let spec = config
            .servers
            .get(server)
            .ok_or_else(|| LifecycleError::ServerNotFound(server.to_string()))?;
        let _flight = self.claim(server, "restore")?;

        let snapshot = self
            .runtime
            .inspect(server)
            .await
            .map_err(|e| LifecycleError::runtime("inspect", server, e))?;
        if snapshot.is_some_and(|s| s.running) {
            return Err(LifecycleError::Conflict(format!(
                "container '{}' is running; stop it before restore",
                server
            )));
        }

        let mut found = false;
        let mut failures = Vec::new();
        for target in spec.backup_targets() {
            check_cancelled(cancel)?;
            let snapshot_dir = target.destination.join(generation);
            if !tokio::fs::metadata(&snapshot_dir).await.is_ok_and(|m| m.is_dir()) {
                warn!(server = %server, path = %snapshot_dir.display(), "Generation missing for target, skipped");
                continue;
            }
            found = true;

            let request = MirrorRequest {
                source: snapshot_dir,
                destination: target.source.clone(),
                link_dest: None,
            };
            match self.mirror.mirror(&request, cancel).await {
                Ok(()) => {
                    debug!(server = %server, target = %target, "Target restored");
                }
                Err(MirrorError::Cancelled) => return Err(LifecycleError::Cancelled),
                Err(e) => {
                    warn!(server = %server, target = %target, error = %e, "Restore step failed");
                    failures.push(format!("{}: {}", target, e));
                }
            }
        }

        if !found {
            return Err(LifecycleError::GenerationNotFound {
                server: server.to_string(),
                generation: generation.to_string(),
            });
        }
        if !failures.is_empty() {
            return Err(LifecycleError::PartialFailure {
                operation: "restore",
                server: server.to_string(),
                failures,
            });
        }

        info!(server = %server, generation = %generation, "Restore completed");
        Ok(())
    }

    /// Delete a stopped container. An absent container is success.
    pub async fn remove(&self, server: &str) -> Result<(), LifecycleError> {
        let snapshot = self
            .runtime
            .inspect(server)
            .await
            .map_err(|e| LifecycleError::runtime("inspect", server, e))?;

        match snapshot {
            None => {
                debug!(server = %server, "Container already absent");
                Ok(())
            }
            Some(s) if s.running => Err(LifecycleError::Conflict(format!(
                "container '{}' is running; stop or kill it before remove",
                server
            ))),
            Some(_) => {
                self.runtime
                    .remove(server)
                    .await
                    .map_err(|e| LifecycleError::runtime("remove", server, e))?;
                info!(server = %server, "Container removed");
                Ok(())
            }
        }
    }

    /// Generations across every backup destination of a server, newest first
    pub async fn list_backup_generations(&self, server: &str) -> Result<Vec<String>, LifecycleError> {
        let config = self.config.get();
        let spec = config
            .servers
            .get(server)
            .ok_or_else(|| LifecycleError::ServerNotFound(server.to_string()))?;

        let destinations: Vec<&Path> = spec.backup_targets().map(|t| t.destination.as_path()).collect();
        generations::list(&destinations)
            .await
            .map_err(|source| LifecycleError::Io {
                context: format!("cannot list backups of '{}'", server),
                source,
            })
    }

    /// Whether a backup or restore of `server` is currently running
    pub fn is_busy(&self, server: &str) -> bool {
        self.in_flight.contains_key(server)
    }

    fn claim(&self, server: &str, operation: &'static str) -> Result<FlightGuard, LifecycleError> {
        match self.in_flight.entry(server.to_string()) {
            Entry::Occupied(entry) => Err(LifecycleError::Conflict(format!(
                "{} of '{}' is already in progress",
                entry.get(),
                server
            ))),
            Entry::Vacant(entry) => {
                entry.insert(operation);
                Ok(FlightGuard {
                    in_flight: self.in_flight.clone(),
                    server: server.to_string(),
                })
            }
        }
    }

    /// Console-facing steps shared by the stop and backup sequences.
    ///
    /// `attach` and `exec` failures are logged only.
    async fn run_console_step(
        &self,
        server: &str,
        index: usize,
        step: &Step,
        sequence: Sequence,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if sequence == (Sequence::Backup { running: false }) && !matches!(step, Step::Log(_)) {
            debug!(server = %server, step = index + 1, kind = step.kind(), "Container not running, step skipped");
            return Ok(());
        }

        match step {
            Step::Attach(text) => {
                // Stop sequences carry their own line endings; backup commands do not
                let input = match sequence {
                    Sequence::Stop => text.clone(),
                    Sequence::Backup { .. } => format!("{}\n", text),
                };
                if let Err(e) = self.runtime.send_input(server, &input).await {
                    warn!(server = %server, step = index + 1, error = %e, "Console write failed");
                }
            }
            Step::Exec(command) => {
                let argv = vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()];
                if let Err(e) = self.runtime.exec(server, &argv).await {
                    warn!(server = %server, step = index + 1, command = %command, error = %e, "Exec step failed");
                }
            }
            Step::Log(message) => info!(server = %server, "{}", message),
            Step::Sleep(duration) => sleep_or_cancel(*duration, cancel).await?,
            Step::Backup(target) => {
                warn!(server = %server, target = %target, "Backup step outside a backup sequence ignored");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    Stop,
    Backup { running: bool },
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), LifecycleError> {
    if cancel.is_cancelled() {
        return Err(LifecycleError::Cancelled);
    }
    Ok(())
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), LifecycleError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(LifecycleError::Cancelled),
    }
}

fn mirror_error(operation: &'static str, server: &str, e: MirrorError) -> LifecycleError {
    match e {
        MirrorError::Cancelled => LifecycleError::Cancelled,
        other => LifecycleError::Mirror {
            operation,
            server: server.to_string(),
            source: other,
        },
    }
}
