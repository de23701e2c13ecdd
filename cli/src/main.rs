// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # playbin
//!
//! Manages game server containers on one Docker host.
//!
//! ## Commands
//!
//! - `playbin serve` - Run the HTTP API and the log forwarder until signalled
//! - `playbin server list|action|restore|backups` - Drive the lifecycle directly
//! - `playbin config show|validate` - Inspect the configuration file
//!
//! The configuration file is re-read whenever its modification time changes,
//! so a running `serve` picks up edits without a restart.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, ServerCommand};

/// playbin - game server container manager
#[derive(Parser)]
#[command(name = "playbin")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "PLAYBIN_CONFIG",
        value_name = "FILE",
        default_value = "config.json"
    )]
    config: PathBuf,

    /// Docker socket path (default: platform default)
    #[arg(long, global = true, env = "PLAYBIN_DOCKER_SOCKET", value_name = "PATH")]
    docker_socket: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PLAYBIN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and log forwarder
    #[command(name = "serve")]
    Serve {
        /// Listen address, overrides `httpListen` from the config
        #[arg(long, env = "PLAYBIN_HTTP_LISTEN", value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Server lifecycle operations
    #[command(name = "server")]
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Serve { listen } => {
            commands::serve::run(cli.config, cli.docker_socket, listen).await
        }
        Commands::Server { command } => {
            commands::server::handle_command(command, cli.config, cli.docker_socket).await
        }
        Commands::Config { command } => commands::config::handle_command(command, cli.config),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
