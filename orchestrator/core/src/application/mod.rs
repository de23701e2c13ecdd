// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod lifecycle;
pub mod log_forwarder;
pub mod supervisor;
pub mod vfs;

pub use lifecycle::LifecycleManager;
pub use log_forwarder::LogForwarder;
pub use supervisor::Supervisor;
pub use vfs::VfsResolver;
