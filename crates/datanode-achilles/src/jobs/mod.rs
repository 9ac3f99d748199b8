// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Achilles job records and the job store.
//!
//! A job is one tracked execution of either the GENERATION (container run)
//! or the IMPORT (report pull + upload) workflow. At most one job per
//! `(data source, source)` may be `IN_PROGRESS`; the backends enforce this
//! with a partial unique index in addition to the admission check.
//!
//! Running jobs refresh a heartbeat. Only jobs whose heartbeat went stale
//! are swept, so a process starting up never fails work another process
//! is still doing. Terminal statuses are written once: every transition
//! out of `IN_PROGRESS` is conditional on the row still being in progress.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresJobStore;
pub use self::sqlite::SqliteJobStore;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Running.
    InProgress,
    /// Finished successfully.
    Successful,
    /// Finished with an error, or swept after a restart.
    Failed,
}

impl JobStatus {
    /// Stable string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Successful => "SUCCESSFUL",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "SUCCESSFUL" => Ok(JobStatus::Successful),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(Error::Other(format!("Unknown job status: {}", other))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which workflow a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobSource {
    /// Containerized Achilles profiling run.
    Generation,
    /// Report pull and upload to the central system.
    Import,
}

impl JobSource {
    /// Stable string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Generation => "GENERATION",
            JobSource::Import => "IMPORT",
        }
    }
}

impl FromStr for JobSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GENERATION" => Ok(JobSource::Generation),
            "IMPORT" => Ok(JobSource::Import),
            other => Err(Error::Other(format!("Unknown job source: {}", other))),
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a GENERATION or IMPORT workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Job identifier.
    pub id: i64,
    /// Data source this job runs against.
    pub data_source_id: i64,
    /// Workflow kind.
    pub source: JobSource,
    /// Current status.
    pub status: JobStatus,
    /// When the job was created.
    pub started: DateTime<Utc>,
    /// When the job reached a terminal status.
    pub finished: Option<DateTime<Utc>>,
    /// Accumulated log text.
    pub log: Option<String>,
    /// Last liveness signal of the process running the job.
    pub heartbeat: Option<DateTime<Utc>>,
}

impl Job {
    /// Move the job to a terminal status, stamping the finish time.
    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished = status.is_terminal().then(Utc::now);
    }
}

/// Raw row shape shared by both backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: i64,
    pub datasource_id: i64,
    pub source: String,
    pub status: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub achilles_log: Option<String>,
    pub heartbeat: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            data_source_id: row.datasource_id,
            source: row.source.parse()?,
            status: row.status.parse()?,
            started: row.started,
            finished: row.finished,
            log: row.achilles_log,
            heartbeat: row.heartbeat,
        })
    }
}

/// Columns selected into [`JobRow`].
pub(crate) const JOB_COLUMNS: &str =
    "id, datasource_id, source, status, started, finished, achilles_log, heartbeat";

pub(crate) fn rows_to_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Error for a conditional update that matched no `IN_PROGRESS` row.
pub(crate) fn not_in_progress(job_id: i64, existing: Option<Job>) -> Error {
    match existing {
        Some(job) => Error::JobFinished {
            job_id,
            status: job.status,
        },
        None => Error::JobNotFound(job_id),
    }
}

/// Map a unique-index violation on insert to an admission conflict.
pub(crate) fn map_create_error(err: sqlx::Error, data_source_id: i64, source: JobSource) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::JobInProgress {
            data_source_id,
            kind: source,
        },
        _ => Error::Database(err),
    }
}

/// Durable record of job lifecycle state.
///
/// Store implementations only persist; they never swallow errors.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Oldest `IN_PROGRESS` job for the data source and workflow kind.
    async fn find_in_progress(&self, data_source_id: i64, source: JobSource)
    -> Result<Option<Job>>;

    /// Create a new `IN_PROGRESS` job.
    async fn create(&self, data_source_id: i64, source: JobSource) -> Result<Job>;

    /// Set the status of an `IN_PROGRESS` job; terminal statuses also stamp
    /// `finished`.
    ///
    /// Fails with [`Error::JobFinished`] when the job already reached a
    /// terminal status, and [`Error::JobNotFound`] when it does not exist.
    async fn update_status(&self, job_id: i64, status: JobStatus) -> Result<()>;

    /// Refresh the heartbeat of an `IN_PROGRESS` job.
    ///
    /// Returns `false` when the job is no longer in progress.
    async fn heartbeat(&self, job_id: i64) -> Result<bool>;

    /// Replace the job's accumulated log.
    async fn save_log(&self, job_id: i64, log: &str) -> Result<()>;

    /// Every job currently `IN_PROGRESS`.
    async fn find_all_in_progress(&self) -> Result<Vec<Job>>;

    /// `IN_PROGRESS` jobs whose last heartbeat is older than `older_than`.
    async fn find_stale_in_progress(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Persist status, finish time and log of each job still `IN_PROGRESS`.
    ///
    /// Jobs finished in the meantime are left untouched. Returns the number
    /// of jobs written.
    async fn save_all(&self, jobs: &[Job]) -> Result<usize>;

    /// Load a job by id.
    async fn get(&self, job_id: i64) -> Result<Option<Job>>;

    /// Jobs for a data source, newest first.
    async fn list_for_data_source(&self, data_source_id: i64) -> Result<Vec<Job>>;
}
