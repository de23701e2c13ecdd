// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: configuration model, permission rules, action and error
//! vocabulary, and the ports implemented by infrastructure adapters.

pub mod action;
pub mod backup;
pub mod config;
pub mod error;
pub mod log_rules;
pub mod path_sanitizer;
pub mod permission;
pub mod runtime;
pub mod vfs;
