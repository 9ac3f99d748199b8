// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Achilles report pull.

pub mod catalog;
pub mod generator;
pub mod scheduler;

pub use catalog::{ReportTask, Section, TaskKind, catalog};
pub use generator::run_task;
pub use scheduler::{PullSummary, TaskOutcome, format_duration, run_report_tasks};
