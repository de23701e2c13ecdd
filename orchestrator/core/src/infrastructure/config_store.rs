// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Config Store - Hot-Reloadable Configuration Snapshot
//
// Holds the current `Config` behind an `Arc` that is swapped wholesale:
// - `get()` stats the backing file and reloads when its mtime moved forward
// - `reload()` parses the file and swaps only on success
// - a broken file keeps the last good snapshot and is logged, never thrown
//
// Reloads are serialized by a writer mutex; readers only take the read lock
// long enough to clone the `Arc`.

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::domain::config::{Config, ConfigError};

struct Snapshot {
    config: Arc<Config>,
    /// mtime of the last file that was read, successfully or not
    observed: Option<SystemTime>,
}

pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<Snapshot>,
    reload_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the file eagerly. A failed initial load yields an empty config.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            path: Some(path.into()),
            current: RwLock::new(Snapshot {
                config: Arc::new(Config::default()),
                observed: None,
            }),
            reload_lock: Mutex::new(()),
        };

        if let Err(e) = store.reload() {
            error!(error = %e, "Initial configuration load failed, starting with an empty config");
        }
        store
    }

    /// Store without a backing file; `reload()` is a no-op
    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(Snapshot {
                config: Arc::new(config),
                observed: None,
            }),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current snapshot, reloading first when the file changed on disk
    pub fn get(&self) -> Arc<Config> {
        if let Some(path) = &self.path {
            if let Some(modified) = modified_time(path) {
                if self.is_stale(modified) {
                    let _guard = self.reload_lock.lock();
                    // Another caller may have reloaded while we waited
                    if self.is_stale(modified) {
                        if let Err(e) = self.load_locked(path) {
                            warn!(error = %e, "Configuration reload failed, keeping previous snapshot");
                        }
                    }
                }
            }
        }
        self.current.read().config.clone()
    }

    /// Force a reload from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.reload_lock.lock();
        self.load_locked(path)
    }

    fn is_stale(&self, modified: SystemTime) -> bool {
        match self.current.read().observed {
            Some(observed) => modified > observed,
            None => true,
        }
    }

    /// Caller holds `reload_lock`
    fn load_locked(&self, path: &Path) -> Result<(), ConfigError> {
        let modified = modified_time(path);
        let result = read_config(path);

        let mut current = self.current.write();
        current.observed = modified.or(current.observed);
        match result {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    servers = config.servers.len(),
                    users = config.users.len(),
                    "Configuration loaded"
                );
                current.config = Arc::new(config);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => Some(modified),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot stat configuration file");
            None
        }
    }
}

/// Read, parse and validate a config file
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = Config::from_json_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str, mtime: SystemTime) {
        std::fs::write(path, content).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn server_config(names: &[&str]) -> String {
        let servers: Vec<String> = names.iter().map(|n| format!("\"{}\": {{}}", n)).collect();
        format!("{{\"servers\": {{{}}}}}", servers.join(","))
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path().join("missing.json"));
        assert!(store.get().servers.is_empty());
    }

    #[test]
    fn test_get_reloads_on_newer_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let t0 = SystemTime::now() - Duration::from_secs(60);
        write(&path, &server_config(&["a"]), t0);

        let store = ConfigStore::open(&path);
        assert!(store.get().servers.contains_key("a"));

        write(&path, &server_config(&["b"]), t0 + Duration::from_secs(10));
        let config = store.get();
        assert!(config.servers.contains_key("b"));
        assert!(!config.servers.contains_key("a"));
    }

    #[test]
    fn test_broken_file_keeps_last_good() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let t0 = SystemTime::now() - Duration::from_secs(60);
        write(&path, &server_config(&["a"]), t0);
        let store = ConfigStore::open(&path);

        write(&path, "{ not json", t0 + Duration::from_secs(10));
        assert!(store.reload().is_err());
        assert!(store.get().servers.contains_key("a"));

        // Invalid step types are rejected as a whole too
        write(
            &path,
            r#"{"servers":{"x":{"commands":{"stop":[{"type":"nope","arg":""}]}}}}"#,
            t0 + Duration::from_secs(20),
        );
        assert!(store.get().servers.contains_key("a"));
    }

    #[test]
    fn test_in_memory() {
        let mut config = Config::default();
        config.servers.insert("mc1".to_string(), Default::default());
        let store = ConfigStore::in_memory(config);
        assert!(store.reload().is_ok());
        assert!(store.get().servers.contains_key("mc1"));
        assert!(store.path().is_none());
    }
}
