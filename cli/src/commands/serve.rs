// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `playbin serve`: HTTP API plus log forwarder, until SIGINT/SIGTERM

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use playbin_core::application::{LifecycleManager, LogForwarder};
use playbin_core::domain::runtime::ContainerRuntime;
use playbin_core::infrastructure::{ConfigStore, DockerRuntime, HttpWebhookSender, RsyncMirror};
use playbin_core::presentation::api::{router, ApiState};

pub async fn run(
    config_path: PathBuf,
    docker_socket: Option<String>,
    listen_override: Option<String>,
) -> Result<()> {
    info!(config = %config_path.display(), "playbin starting");

    let config = Arc::new(ConfigStore::open(&config_path));

    let docker = DockerRuntime::new(docker_socket).context("Failed to create Docker client")?;
    docker
        .healthcheck()
        .await
        .context("Docker engine is not reachable")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let lifecycle = Arc::new(LifecycleManager::new(
        config.clone(),
        runtime.clone(),
        Arc::new(RsyncMirror::new()),
    ));
    let webhook = Arc::new(HttpWebhookSender::new().context("Failed to create webhook client")?);
    let forwarder = Arc::new(LogForwarder::new(config.clone(), runtime.clone(), webhook));

    let shutdown = CancellationToken::new();
    let forwarder_task = tokio::spawn(forwarder.run(shutdown.child_token()));

    let listen = listen_override
        .or_else(|| config.get().http_listen.clone())
        .filter(|addr| !addr.trim().is_empty());

    match listen {
        Some(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind to {}", addr))?;
            info!("HTTP API listening on {}", addr);

            let app = router(Arc::new(ApiState::new(lifecycle)));
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server failed")?;
        }
        None => {
            info!("No httpListen configured, HTTP API disabled");
            shutdown_signal().await;
        }
    }

    info!("Shutting down");
    shutdown.cancel();
    if let Err(e) = forwarder_task.await {
        warn!(error = %e, "Log forwarder ended abnormally");
    }

    Ok(())
}

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
