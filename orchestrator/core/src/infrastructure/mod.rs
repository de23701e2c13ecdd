// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config_store;
pub mod generations;
pub mod rsync;
pub mod runtime;
pub mod webhook;

pub use config_store::ConfigStore;
pub use rsync::RsyncMirror;
pub use runtime::DockerRuntime;
pub use webhook::HttpWebhookSender;
