// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for datanode-achilles.

use thiserror::Error;

use crate::jobs::JobSource;

/// Datanode errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Job store operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job store migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Container run failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    /// Query against the data source failed.
    #[error("Query error: {0}")]
    Query(#[from] crate::query::QueryError),

    /// Result upload to the central system failed.
    #[error("Upload error: {0}")]
    Upload(#[from] crate::upload::UploadError),

    /// A job of the same kind is already running for this data source.
    #[error("Achilles is in progress for datasource {data_source_id} ({kind})")]
    JobInProgress {
        /// Data source the conflicting job belongs to.
        data_source_id: i64,
        /// Workflow kind of the conflicting job.
        kind: JobSource,
    },

    /// One or more report tasks failed during a pull.
    #[error("{failed} report task(s) failed")]
    ReportTasks {
        /// Number of failed tasks.
        failed: usize,
    },

    /// The report task barrier was interrupted.
    #[error("Achilles pull interrupted: {0}")]
    Coordination(String),

    /// Job was not found.
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    /// Job already reached a terminal status.
    #[error("Job {job_id} is already {status}")]
    JobFinished {
        /// Job that was already finished.
        job_id: i64,
        /// Status it finished with.
        status: crate::jobs::JobStatus,
    },

    /// Data source was not found.
    #[error("Data source not found: {0}")]
    DataSourceNotFound(i64),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using datanode Error.
pub type Result<T> = std::result::Result<T, Error>;
