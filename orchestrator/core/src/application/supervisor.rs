// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Supervisor
//!
//! Keeps one background task per key in line with a desired map taken from
//! the config on every poll tick.
//!
//! ## Reconcile Decision Table
//! | Desired | Running | Action |
//! |---------|---------|--------|
//! | present | absent or finished | start |
//! | present | same spec | keep |
//! | present | different spec | cancel, start with new spec |
//! | absent | present | cancel |
//!
//! Every task gets a child of the supervisor's token, so cancelling the
//! parent token stops every task too.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Running<S> {
    spec: S,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub restarted: Vec<String>,
    pub stopped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.restarted.is_empty() && self.stopped.is_empty()
    }
}

pub struct Supervisor<S> {
    name: &'static str,
    cancel: CancellationToken,
    tasks: HashMap<String, Running<S>>,
}

impl<S> Supervisor<S>
where
    S: Clone + PartialEq + Send + 'static,
{
    pub fn new(name: &'static str, cancel: CancellationToken) -> Self {
        Self {
            name,
            cancel,
            tasks: HashMap::new(),
        }
    }

    /// Diff `desired` against the running tasks and apply the delta.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reconcile<F, Fut>(&mut self, desired: BTreeMap<String, S>, spawn: F) -> ReconcileReport
    where
        F: Fn(String, S, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut report = ReconcileReport::default();

        let removed: Vec<String> = self
            .tasks
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            if let Some(task) = self.tasks.remove(&key) {
                task.cancel.cancel();
                info!(supervisor = self.name, key = %key, "Task stopped");
                report.stopped.push(key);
            }
        }

        for (key, spec) in desired {
            let restart = match self.tasks.get(&key) {
                Some(task) if task.handle.is_finished() => {
                    debug!(supervisor = self.name, key = %key, "Task exited, restarting");
                    false
                }
                Some(task) if task.spec == spec => continue,
                Some(_) => true,
                None => false,
            };

            if let Some(old) = self.tasks.remove(&key) {
                old.cancel.cancel();
            }

            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(spawn(key.clone(), spec.clone(), cancel.clone()));
            self.tasks.insert(key.clone(), Running { spec, cancel, handle });

            if restart {
                info!(supervisor = self.name, key = %key, "Task restarted with new spec");
                report.restarted.push(key);
            } else {
                info!(supervisor = self.name, key = %key, "Task started");
                report.started.push(key);
            }
        }

        report
    }

    /// Keys with a live task, sorted
    pub fn running(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(&mut self) {
        for task in self.tasks.values() {
            task.cancel.cancel();
        }
        for (key, task) in self.tasks.drain() {
            if let Err(e) = task.handle.await {
                debug!(supervisor = self.name, key = %key, error = %e, "Task ended abnormally");
            }
        }
    }
}

impl<S> Drop for Supervisor<S> {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn desired(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Tasks that park until cancelled and count how many were started
    fn parked(started: Arc<AtomicUsize>) -> impl Fn(String, u32, CancellationToken) -> futures::future::BoxFuture<'static, ()> {
        move |_, _, cancel| {
            started.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { cancel.cancelled().await })
        }
    }

    #[tokio::test]
    async fn test_reconcile_starts_restarts_and_stops() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new("test", CancellationToken::new());

        let report = supervisor.reconcile(desired(&[("a", 1), ("b", 1)]), parked(started.clone()));
        assert_eq!(report.started, vec!["a", "b"]);
        assert_eq!(supervisor.running(), vec!["a", "b"]);

        // Same specs: nothing happens
        let report = supervisor.reconcile(desired(&[("a", 1), ("b", 1)]), parked(started.clone()));
        assert!(report.is_empty());
        assert_eq!(started.load(Ordering::SeqCst), 2);

        // Changed spec restarts, missing key stops
        let report = supervisor.reconcile(desired(&[("a", 2)]), parked(started.clone()));
        assert_eq!(report.restarted, vec!["a"]);
        assert_eq!(report.stopped, vec!["b"]);
        assert_eq!(started.load(Ordering::SeqCst), 3);

        for _ in 0..10 {
            tokio::task::yield_now().await;
            if supervisor.running() == vec!["a"] {
                break;
            }
        }
        assert_eq!(supervisor.running(), vec!["a"]);

        supervisor.shutdown().await;
        assert!(supervisor.running().is_empty());
    }

    #[tokio::test]
    async fn test_finished_task_is_restarted() {
        let mut supervisor = Supervisor::new("test", CancellationToken::new());
        let report = supervisor.reconcile(desired(&[("a", 1)]), |_, _, _| async {});
        assert_eq!(report.started, vec!["a"]);

        // Let the empty task run to completion
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if supervisor.running().is_empty() {
                break;
            }
        }
        assert!(supervisor.running().is_empty());

        let report = supervisor.reconcile(desired(&[("a", 1)]), |_, _, _| async {});
        assert_eq!(report.started, vec!["a"]);
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_tasks() {
        let root = CancellationToken::new();
        let mut supervisor = Supervisor::new("test", root.clone());
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = observed.clone();
        supervisor.reconcile(desired(&[("a", 1)]), move |_, _, cancel| {
            let seen = seen.clone();
            async move {
                cancel.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        root.cancel();
        supervisor.shutdown().await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
