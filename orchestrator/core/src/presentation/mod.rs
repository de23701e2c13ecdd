// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`playbin-core`)
//!
//! Front ends that translate external requests into application calls. No
//! lifecycle or permission rules live here; handlers check permissions through
//! the domain model and delegate the work.

pub mod api;
