// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # playbin-core
//!
//! Manages a fleet of long-running game server containers on one Docker host.
//!
//! # Architecture
//!
//! - **domain:** config model, permissions, actions, ports (`ContainerRuntime`,
//!   `Mirror`, `WebhookSender`) and error taxonomy
//! - **application:** lifecycle actions, virtual filesystem resolution, log
//!   forwarding supervisors
//! - **infrastructure:** Docker, rsync and HTTP webhook adapters, the hot
//!   reloading config store, backup generation layout
//! - **presentation:** HTTP API

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
