// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use playbin_core::domain::config::{Config, Step};
use playbin_core::infrastructure::config_store::read_config;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show a summary of the configuration (passwords are never printed)
    Show {
        /// Print the parsed configuration as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to config file (default: --config)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub fn handle_command(command: ConfigCommand, config_path: PathBuf) -> Result<()> {
    match command {
        ConfigCommand::Show { json } => show(&config_path, json),
        ConfigCommand::Validate { file } => validate(&file.unwrap_or(config_path)),
    }
}

fn load(path: &Path) -> Result<Config> {
    read_config(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn show(path: &Path, as_json: bool) -> Result<()> {
    let config = load(path)?.redacted();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("{} {}", "Configuration:".bold(), path.display());
    println!();

    println!("{}", "Listeners:".bold());
    println!("  HTTP: {}", config.http_listen.as_deref().unwrap_or("(disabled)"));
    println!("  SFTP: {}", config.sftp_listen.as_deref().unwrap_or("(disabled)"));
    println!();

    println!("{}", "Users:".bold());
    for (name, user) in &config.users {
        let mut scopes: Vec<&str> = user.permissions.keys().map(String::as_str).collect();
        scopes.sort();
        println!("  {} ({})", name.bold(), scopes.join(", "));
    }
    println!();

    println!("{}", "Servers:".bold());
    for (name, server) in &config.servers {
        match server.managed_compose() {
            Some(compose) => println!("  {} {}", name.bold(), compose.image),
            None => println!("  {} {}", name.bold(), "(unmanaged)".dimmed()),
        }
        println!("    Stop steps: {}", server.commands.stop.len());
        println!("    Backup steps: {}", server.commands.backup.len());
        for step in &server.commands.backup {
            if let Step::Backup(target) = step {
                println!("      - {}", target);
            }
        }
        if let Some((webhook, rules)) = server.log_forwarding() {
            println!("    Log forwarding: {} → {}", rules, webhook.dimmed());
        }
    }

    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    println!("Validating {}...", path.display());

    let config = load(path).context("Configuration validation failed")?;

    println!(
        "{}",
        format!(
            "✓ Configuration is valid ({} servers, {} users)",
            config.servers.len(),
            config.users.len()
        )
        .green()
    );

    Ok(())
}
