// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::config::RestartPolicy;
use crate::domain::runtime::{
    ContainerRuntime, ContainerSnapshot, ContainerSpec, ContainerSummary, LogStream, MountPoint,
    RuntimeError,
};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, PortBinding, RestartPolicyNameEnum};
use bollard::Docker;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct DockerRuntime {
    docker: Docker,
    attached: AttachRegistry,
}

/// One stdin writer per container name
#[derive(Clone, Default)]
pub struct AttachRegistry {
    names: Arc<Mutex<HashSet<String>>>,
}

impl AttachRegistry {
    pub fn claim(&self, name: &str) -> Result<AttachGuard, RuntimeError> {
        if !self.names.lock().insert(name.to_string()) {
            return Err(RuntimeError::AttachBusy(name.to_string()));
        }
        Ok(AttachGuard {
            names: self.names.clone(),
            name: name.to_string(),
        })
    }
}

pub struct AttachGuard {
    names: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        self.names.lock().remove(&self.name);
    }
}

impl DockerRuntime {
    pub fn new(socket_path: Option<String>) -> Result<Self, RuntimeError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                RuntimeError::Connection(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Connection(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Check that the daemon is running (docker ps) and that the current \
                     user may access /var/run/docker.sock.",
                    e
                ))
            })?
        };

        Ok(Self {
            docker,
            attached: AttachRegistry::default(),
        })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Connection(format!(
                "Cannot connect to Docker daemon: {}\n\nVerify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }
}

fn engine_error(name: &str, e: DockerError) -> RuntimeError {
    match e {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(name.to_string()),
        other => RuntimeError::Engine(other.to_string()),
    }
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for (container_port, host_port) in &spec.port_bindings {
        let key = format!("{}/tcp", container_port);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );
    }

    let host_config = HostConfig {
        binds: Some(spec.binds.clone()),
        restart_policy: Some(bollard::models::RestartPolicy {
            name: Some(restart_policy_name(spec.restart)),
            maximum_retry_count: None,
        }),
        network_mode: Some(spec.network_mode.clone()),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        tty: Some(true),
        open_stdin: Some(true),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Re-chunk a byte-ish text stream into complete lines.
///
/// A trailing partial line is emitted when the stream ends. The first error
/// ends the stream.
pub fn split_lines<S>(chunks: S) -> impl Stream<Item = Result<String, RuntimeError>> + Send
where
    S: Stream<Item = Result<String, RuntimeError>> + Send + Unpin,
{
    struct State<S> {
        chunks: S,
        buffer: String,
        ready: VecDeque<String>,
        done: bool,
    }

    let state = State {
        chunks,
        buffer: String::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                if state.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut state.buffer);
                return Some((Ok(rest), state));
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&chunk);
                    while let Some(pos) = state.buffer.find('\n') {
                        let line: String = state.buffer.drain(..=pos).collect();
                        state
                            .ready
                            .push_back(line.trim_end_matches(['\r', '\n']).to_string());
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.buffer.clear();
                    return Some((Err(e), state));
                }
                None => state.done = true,
            }
        }
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerSnapshot>, RuntimeError> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(engine_error(name, e)),
        };

        let (status, running) = match inspect.state {
            Some(state) => (
                state.status.map(|s| s.to_string()).unwrap_or_default(),
                state.running.unwrap_or(false),
            ),
            None => (String::new(), false),
        };

        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                Some(MountPoint {
                    destination: m.destination?,
                    source: PathBuf::from(m.source?),
                })
            })
            .collect();

        Ok(Some(ContainerSnapshot {
            name: name.to_string(),
            status,
            running,
            mounts,
        }))
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;

        Ok(containers
            .into_iter()
            .flat_map(|c| {
                let status = c.state.unwrap_or_default();
                c.names
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |n| ContainerSummary {
                        name: n.trim_start_matches('/').to_string(),
                        status: status.clone(),
                    })
            })
            .collect())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let res = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| engine_error(&spec.name, e))?;

        info!(server = %spec.name, id = %res.id, image = %spec.image, "Created container");
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error(name, e))
    }

    async fn stop(&self, name: &str, timeout: Option<Duration>) -> Result<(), RuntimeError> {
        let options = timeout.map(|t| StopContainerOptions {
            t: t.as_secs() as i64,
        });
        match self.docker.stop_container(name, options).await {
            Ok(()) => Ok(()),
            // Not modified: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(server = %name, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(engine_error(name, e)),
        }
    }

    async fn kill(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| engine_error(name, e))
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(name, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| engine_error(name, e))
    }

    async fn send_input(&self, name: &str, input: &str) -> Result<(), RuntimeError> {
        let _guard = self.attached.claim(name)?;

        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { input: mut stdin, .. } = self
            .docker
            .attach_container(name, Some(options))
            .await
            .map_err(|e| engine_error(name, e))?;

        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| RuntimeError::Engine(format!("stdin write failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| RuntimeError::Engine(format!("stdin flush failed: {}", e)))?;
        Ok(())
    }

    async fn exec(&self, name: &str, command: &[String]) -> Result<(), RuntimeError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(name, exec_config)
            .await
            .map_err(|e| engine_error(name, e))?;

        let res = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;

        // Drain the output so the command runs to completion
        if let StartExecResults::Attached { mut output, .. } = res {
            while let Some(msg) = output.next().await {
                if let Ok(msg) = msg {
                    debug!(server = %name, output = %msg, "exec output");
                }
            }
        }

        let exec_inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::Engine(format!("Failed to inspect exec: {}", e)))?;

        match exec_inspect.exit_code.unwrap_or(0) {
            0 => Ok(()),
            code => Err(RuntimeError::NonZeroExit { code }),
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let owned = name.to_string();
        let chunks = self
            .docker
            .logs(name, Some(options))
            .map(move |chunk| {
                chunk
                    .map(|output| String::from_utf8_lossy(&output.into_bytes()).into_owned())
                    .map_err(|e| engine_error(&owned, e))
            })
            .boxed();
        split_lines(chunks).boxed().try_collect().await
    }

    async fn follow_logs(&self, name: &str) -> Result<LogStream, RuntimeError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "0".to_string(),
            ..Default::default()
        };
        let owned = name.to_string();
        let chunks = self
            .docker
            .logs(name, Some(options))
            .map(move |chunk| {
                chunk
                    .map(|output| String::from_utf8_lossy(&output.into_bytes()).into_owned())
                    .map_err(|e| engine_error(&owned, e))
            })
            .boxed();
        Ok(split_lines(chunks).boxed())
    }
}
