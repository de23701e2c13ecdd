// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Log Forwarder
//!
//! Tails the console of every server whose chat settings name both a webhook
//! and a rules file, and posts the payloads of matching rules.
//!
//! One task per server is kept by a [`Supervisor`]; the desired set is read
//! from the config every reconcile tick.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::supervisor::Supervisor;
use crate::domain::config::Config;
use crate::domain::log_rules::{LogRules, WebhookSender};
use crate::domain::runtime::ContainerRuntime;
use crate::infrastructure::config_store::ConfigStore;

/// What one forwarding task needs; a change restarts the task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub webhook: String,
    pub rules_path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct ForwarderIntervals {
    /// Config poll period
    pub reconcile: Duration,
    /// Wait before re-inspecting an absent container
    pub absent_retry: Duration,
    /// Wait after the log stream ended
    pub stream_retry: Duration,
    /// Wait after the log stream could not be opened
    pub error_retry: Duration,
}

impl Default for ForwarderIntervals {
    fn default() -> Self {
        Self {
            reconcile: Duration::from_secs(30),
            absent_retry: Duration::from_secs(30),
            stream_retry: Duration::from_secs(5),
            error_retry: Duration::from_secs(10),
        }
    }
}

struct CachedRules {
    rules: Option<Arc<LogRules>>,
    observed: SystemTime,
}

/// Compiled rules per file, reloaded when the file's mtime moves forward.
/// A broken file keeps the last good rules.
#[derive(Default)]
pub struct RulesCache {
    entries: Mutex<HashMap<PathBuf, CachedRules>>,
}

impl RulesCache {
    pub fn get(&self, path: &Path) -> Option<Arc<LogRules>> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;

        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(path) {
            if modified <= cached.observed {
                return cached.rules.clone();
            }
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|json| LogRules::parse(&json).map_err(|e| e.to_string()));

        let previous = entries.get(path).and_then(|c| c.rules.clone());
        let rules = match loaded {
            Ok(rules) => {
                info!(path = %path.display(), rules = rules.len(), "Log rules loaded");
                Some(Arc::new(rules))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Log rules invalid, keeping previous rules");
                previous
            }
        };

        entries.insert(
            path.to_path_buf(),
            CachedRules {
                rules: rules.clone(),
                observed: modified,
            },
        );
        rules
    }
}

pub struct LogForwarder {
    config: Arc<ConfigStore>,
    runtime: Arc<dyn ContainerRuntime>,
    webhook: Arc<dyn WebhookSender>,
    rules: RulesCache,
    intervals: ForwarderIntervals,
}

impl LogForwarder {
    pub fn new(
        config: Arc<ConfigStore>,
        runtime: Arc<dyn ContainerRuntime>,
        webhook: Arc<dyn WebhookSender>,
    ) -> Self {
        Self::with_intervals(config, runtime, webhook, ForwarderIntervals::default())
    }

    pub fn with_intervals(
        config: Arc<ConfigStore>,
        runtime: Arc<dyn ContainerRuntime>,
        webhook: Arc<dyn WebhookSender>,
        intervals: ForwarderIntervals,
    ) -> Self {
        Self {
            config,
            runtime,
            webhook,
            rules: RulesCache::default(),
            intervals,
        }
    }

    /// Servers that should have a forwarding task
    pub fn desired(config: &Config) -> BTreeMap<String, ForwardSpec> {
        config
            .servers
            .iter()
            .filter_map(|(name, spec)| {
                let (webhook, rules) = spec.log_forwarding()?;
                Some((
                    name.clone(),
                    ForwardSpec {
                        webhook: webhook.to_string(),
                        rules_path: PathBuf::from(rules),
                    },
                ))
            })
            .collect()
    }

    /// Reconcile loop; returns once `cancel` fires and every task has ended
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut supervisor = Supervisor::new("log-forwarder", cancel.child_token());
        let mut ticker = tokio::time::interval(self.intervals.reconcile);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let desired = Self::desired(&self.config.get());
            let this = self.clone();
            supervisor.reconcile(desired, move |server, spec, token| {
                let this = this.clone();
                async move { this.tail(&server, &spec, &token).await }
            });
        }

        supervisor.shutdown().await;
        info!("Log forwarder stopped");
    }

    /// Follow one container's logs until cancelled
    pub async fn tail(&self, server: &str, spec: &ForwardSpec, cancel: &CancellationToken) {
        loop {
            match self.runtime.inspect(server).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(server = %server, "Container absent, waiting");
                    if !wait(self.intervals.absent_retry, cancel).await {
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(server = %server, error = %e, "Inspect failed, waiting");
                    if !wait(self.intervals.absent_retry, cancel).await {
                        return;
                    }
                    continue;
                }
            }

            let mut lines = match self.runtime.follow_logs(server).await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(server = %server, error = %e, "Cannot open log stream");
                    if !wait(self.intervals.error_retry, cancel).await {
                        return;
                    }
                    continue;
                }
            };

            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => return,
                    line = lines.next() => line,
                };
                match line {
                    Some(Ok(line)) => self.forward_line(server, spec, &line).await,
                    Some(Err(e)) => {
                        debug!(server = %server, error = %e, "Log stream failed");
                        break;
                    }
                    None => break,
                }
            }

            if !wait(self.intervals.stream_retry, cancel).await {
                return;
            }
        }
    }

    async fn forward_line(&self, server: &str, spec: &ForwardSpec, line: &str) {
        let Some(rules) = self.rules.get(&spec.rules_path) else {
            return;
        };
        for payload in rules.render(line) {
            if let Err(e) = self.webhook.send(&spec.webhook, &payload).await {
                warn!(server = %server, error = %e, "Webhook delivery failed");
            }
        }
    }
}

/// Sleep unless cancelled first; `false` means cancelled
async fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
