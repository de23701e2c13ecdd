// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory fakes of the engine and mirror ports shared by the integration
//! tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use playbin_core::domain::backup::{Mirror, MirrorError, MirrorRequest};
use playbin_core::domain::config::Config;
use playbin_core::domain::runtime::{
    ContainerRuntime, ContainerSnapshot, ContainerSpec, ContainerSummary, LogStream, MountPoint,
    RuntimeError,
};
use playbin_core::infrastructure::config_store::ConfigStore;

pub fn store(json: &str) -> Arc<ConfigStore> {
    Arc::new(ConfigStore::in_memory(Config::from_json_str(json).unwrap()))
}

#[derive(Debug, Clone)]
struct FakeContainer {
    running: bool,
    mounts: Vec<MountPoint>,
}

/// Container engine that records every mutating call as a short string
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    logs: Mutex<HashMap<String, Vec<String>>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    inspects: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_container(&self, name: &str, running: bool, mounts: &[(&str, &Path)]) {
        let mounts = mounts
            .iter()
            .map(|(destination, source)| MountPoint {
                destination: destination.to_string(),
                source: source.to_path_buf(),
            })
            .collect();
        self.containers
            .lock()
            .insert(name.to_string(), FakeContainer { running, mounts });
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(container) = self.containers.lock().get_mut(name) {
            container.running = running;
        }
    }

    /// Lines handed out, once, by the next `follow_logs` call; `logs` only peeks
    pub fn push_logs(&self, name: &str, lines: &[&str]) {
        self.logs
            .lock()
            .entry(name.to_string())
            .or_default()
            .extend(lines.iter().map(|l| l.to_string()));
    }

    /// Make every later call of `operation` (`"stop"`, `"kill"`) fail
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    fn check(&self, operation: &'static str) -> Result<(), RuntimeError> {
        if self.failing.lock().contains(operation) {
            return Err(RuntimeError::Engine(format!("simulated {} failure", operation)));
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn inspects(&self) -> usize {
        self.inspects.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn with_container<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> Result<T, RuntimeError> {
        self.containers
            .lock()
            .get_mut(name)
            .map(f)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerSnapshot>, RuntimeError> {
        self.inspects.fetch_add(1, Ordering::SeqCst);
        Ok(self.containers.lock().get(name).map(|c| ContainerSnapshot {
            name: name.to_string(),
            status: if c.running { "running" } else { "exited" }.to_string(),
            running: c.running,
            mounts: c.mounts.clone(),
        }))
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        Ok(self
            .containers
            .lock()
            .iter()
            .map(|(name, c)| ContainerSummary {
                name: name.clone(),
                status: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.record(format!("create {}", spec.name));
        let mounts = spec
            .binds
            .iter()
            .filter_map(|bind| bind.split_once(':'))
            .map(|(host, container)| MountPoint {
                destination: container.to_string(),
                source: PathBuf::from(host),
            })
            .collect();
        self.containers.lock().insert(
            spec.name.clone(),
            FakeContainer {
                running: false,
                mounts,
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("start {}", name));
        self.with_container(name, |c| c.running = true)
    }

    async fn stop(&self, name: &str, timeout: Option<Duration>) -> Result<(), RuntimeError> {
        self.record(format!("stop {} {:?}", name, timeout));
        self.check("stop")?;
        self.with_container(name, |c| c.running = false)
    }

    async fn kill(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("kill {}", name));
        self.check("kill")?;
        self.with_container(name, |c| c.running = false)
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove {}", name));
        self.containers
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn send_input(&self, name: &str, input: &str) -> Result<(), RuntimeError> {
        self.record(format!("input {} {}", name, input));
        Ok(())
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<(), RuntimeError> {
        self.record(format!("exec {} {}", name, argv.join(" ")));
        Ok(())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        if !self.containers.lock().contains_key(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        let logs = self.logs.lock();
        let lines = logs.get(name).map(Vec::as_slice).unwrap_or_default();
        Ok(lines[lines.len().saturating_sub(tail)..].to_vec())
    }

    async fn follow_logs(&self, name: &str) -> Result<LogStream, RuntimeError> {
        let lines = self.logs.lock().remove(name).unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(lines.into_iter().map(Ok))))
    }
}

/// Mirror that copies trees with delete semantics using plain file copies
#[derive(Default)]
pub struct CopyMirror {
    requests: Mutex<Vec<MirrorRequest>>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl CopyMirror {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every mirror from `source` fail
    pub fn fail_source(&self, source: &Path) {
        self.failing.lock().insert(source.to_path_buf());
    }

    pub fn requests(&self) -> Vec<MirrorRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Mirror for CopyMirror {
    async fn mirror(
        &self,
        request: &MirrorRequest,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        self.requests.lock().push(request.clone());
        if cancel.is_cancelled() {
            return Err(MirrorError::Cancelled);
        }
        if self.failing.lock().contains(&request.source) {
            return Err(MirrorError::Failed {
                status: "exit status: 23".to_string(),
                output: "simulated failure".to_string(),
            });
        }
        copy_tree(&request.source, &request.destination)
            .map_err(|e| MirrorError::Spawn(e.to_string()))
    }
}

fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<()> {
    if destination.exists() {
        std::fs::remove_dir_all(destination)?;
    }
    std::fs::create_dir_all(destination)?;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Relative paths of every file under `root`, sorted
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();
    files
}
