// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server lifecycle commands, run in-process against the local engine
//!
//! Commands: list, action, restore, backups

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use playbin_core::application::LifecycleManager;
use playbin_core::domain::action::Action;
use playbin_core::domain::runtime::ContainerRuntime;
use playbin_core::infrastructure::{ConfigStore, DockerRuntime, RsyncMirror};

use super::serve::shutdown_signal;

#[derive(Subcommand)]
pub enum ServerCommand {
    /// List configured servers and their container state
    List,

    /// Run a lifecycle action (start, stop, kill, backup, remove)
    Action {
        /// Server name
        name: String,

        /// Action to run
        action: Action,
    },

    /// Restore a backup generation onto a stopped server
    Restore {
        /// Server name
        name: String,

        /// Generation directory name (see `server backups`)
        generation: String,
    },

    /// List backup generations, newest first
    Backups {
        /// Server name
        name: String,
    },
}

pub async fn handle_command(
    command: ServerCommand,
    config_path: PathBuf,
    docker_socket: Option<String>,
) -> Result<()> {
    let config = Arc::new(ConfigStore::open(&config_path));
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::new(docker_socket).context("Failed to create Docker client")?);
    let lifecycle = LifecycleManager::new(config, runtime, Arc::new(RsyncMirror::new()));

    match command {
        ServerCommand::List => list(&lifecycle).await,
        ServerCommand::Action { name, action } => {
            cancellable(|cancel| async move {
                lifecycle.execute_action(&name, action, &cancel).await?;
                println!("{}", format!("✓ {} {}", action, name).green());
                Ok(())
            })
            .await
        }
        ServerCommand::Restore { name, generation } => {
            cancellable(|cancel| async move {
                lifecycle.restore(&name, &generation, &cancel).await?;
                println!("{}", format!("✓ Restored {} from {}", name, generation).green());
                Ok(())
            })
            .await
        }
        ServerCommand::Backups { name } => {
            let generations = lifecycle
                .list_backup_generations(&name)
                .await
                .with_context(|| format!("Failed to list backups of {}", name))?;
            if generations.is_empty() {
                println!("{}", "No backups".dimmed());
            }
            for generation in generations {
                println!("{}", generation);
            }
            Ok(())
        }
    }
}

async fn list(lifecycle: &LifecycleManager) -> Result<()> {
    let config = lifecycle.config().get();
    println!("{:<20} {:<12} {}", "NAME".bold(), "STATE".bold(), "IMAGE".bold());
    for (name, server) in &config.servers {
        let state = match lifecycle.runtime().inspect(name).await {
            Ok(Some(snapshot)) if snapshot.running => snapshot.status.green(),
            Ok(Some(snapshot)) => snapshot.status.yellow(),
            Ok(None) => "missing".dimmed(),
            Err(e) => format!("error: {}", e).red(),
        };
        let image = server
            .managed_compose()
            .map(|c| c.image.clone())
            .unwrap_or_else(|| "(unmanaged)".to_string());
        println!("{:<20} {:<12} {}", name, state, image);
    }
    Ok(())
}

/// Run `work`, cancelling its token on Ctrl+C or SIGTERM
async fn cancellable<F, Fut>(work: F) -> Result<()>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };
    let result = work(cancel).await;
    watcher.abort();
    result
}
