// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the playbin CLI

pub mod config;
pub mod serve;
pub mod server;

pub use self::config::ConfigCommand;
pub use self::server::ServerCommand;
