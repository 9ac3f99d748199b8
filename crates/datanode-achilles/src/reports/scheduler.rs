// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fan-out/fan-in execution of the report catalog.
//!
//! Every task runs on its own tokio task with its own data source
//! connection. The pull waits for all of them; a task's own failure is
//! recorded, while a failure of the join itself aborts the pull.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{info, warn};

use super::catalog::ReportTask;
use super::generator::run_task;
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::query::{Connector, QueryError, ReportSession};

/// Outcome of one report task.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Task name.
    pub name: &'static str,
    /// Wall-clock duration.
    pub elapsed: Duration,
    /// Records processed, or the task's error.
    pub result: std::result::Result<usize, QueryError>,
}

impl TaskOutcome {
    /// Human-readable summary line.
    pub fn summary(&self) -> String {
        match &self.result {
            Ok(records) => format!(
                "Task {} proceed {} record(s) completed in {}",
                self.name,
                records,
                format_duration(self.elapsed)
            ),
            Err(e) => format!(
                "Task {} failed after {}: {}",
                self.name,
                format_duration(self.elapsed),
                e
            ),
        }
    }
}

/// Aggregated result of a pull.
#[derive(Debug, Default)]
pub struct PullSummary {
    /// One summary line per task, in catalog order.
    pub lines: Vec<String>,
    /// Number of failed tasks.
    pub failures: usize,
    /// Records processed across all tasks.
    pub records: usize,
}

impl PullSummary {
    /// Summary lines joined for the job log.
    pub fn log_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Format a duration as `mm:ss.SSS`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{:02}:{:02}.{:03}",
        (secs / 60) % 60,
        secs % 60,
        duration.subsec_millis()
    )
}

async fn run_one(
    connector: &dyn Connector,
    data_source: &DataSource,
    task: &ReportTask,
    out_dir: &Path,
) -> std::result::Result<usize, QueryError> {
    let mut session = ReportSession::open(connector, data_source).await?;
    match run_task(task, &mut session, out_dir).await {
        Err(QueryError::ResultsNotAvailable { table }) => {
            info!(task = task.name, table = %table, "Achilles results not available, skipping");
            Ok(0)
        }
        other => other,
    }
}

/// Run every task concurrently and wait for all of them.
///
/// Returns [`Error::Coordination`] if a task panics or is cancelled; the
/// remaining tasks are aborted in that case.
pub async fn run_report_tasks(
    connector: Arc<dyn Connector>,
    data_source: &DataSource,
    out_dir: &Path,
    tasks: Vec<ReportTask>,
) -> Result<PullSummary> {
    let total = tasks.len();
    let mut set = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        let connector = connector.clone();
        let data_source = data_source.clone();
        let out_dir: PathBuf = out_dir.to_path_buf();

        set.spawn(async move {
            let start = Instant::now();
            let result = run_one(connector.as_ref(), &data_source, &task, &out_dir).await;
            (
                index,
                TaskOutcome {
                    name: task.name,
                    elapsed: start.elapsed(),
                    result,
                },
            )
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = set.join_next().await {
        let (index, outcome) = joined.map_err(|e| {
            warn!(error = %e, "Achilles pull interrupted");
            Error::Coordination(e.to_string())
        })?;
        outcomes.push((index, outcome));
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut summary = PullSummary::default();
    for (_, outcome) in outcomes {
        let line = outcome.summary();
        match &outcome.result {
            Ok(records) => {
                info!("{}", line);
                summary.records += records;
            }
            Err(_) => {
                warn!("{}", line);
                summary.failures += 1;
            }
        }
        summary.lines.push(line);
    }
    Ok(summary)
}
