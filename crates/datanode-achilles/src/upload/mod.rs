// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upload stage: archive the pulled reports and deliver them to the central
//! system.
//!
//! Sending is retried under a [`RetryPolicy`]. The archive is built once
//! and a retry resumes at the first part the central system has not
//! accepted, so every part is delivered exactly once. The temporary archive
//! is owned by an [`ArchiveGuard`] created before the first attempt, so it
//! is removed exactly once whatever the outcome.

pub mod archive;
pub mod central;
pub mod mock;
pub mod retry;

pub use archive::{ArchiveGuard, compress_and_split};
pub use central::{CentralClient, FilePayload, HttpCentralClient, ReportDescriptor};
pub use mock::MockCentralClient;
pub use retry::{RetryPolicy, RetryStrategy, retry};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::datasource::DataSource;

/// Upload stage errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Compressing the results failed.
    #[error("Archive error: {0}")]
    Archive(String),

    /// The request did not reach the central system.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The central system answered with a non-success status.
    #[error("Central system responded with status {0}")]
    Status(u16),

    /// Every attempt failed.
    #[error("Upload failed after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        last: Box<UploadError>,
    },

    /// The data source is not registered on the central system.
    #[error("Data source {0} has no central id")]
    MissingCentralId(i64),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends a results directory to the central system.
pub struct Uploader {
    client: Arc<dyn CentralClient>,
    policy: RetryPolicy,
    tmp_dir: PathBuf,
    split_size: Option<u64>,
}

impl Uploader {
    /// Create an uploader writing temporary archives under `tmp_dir`.
    pub fn new(
        client: Arc<dyn CentralClient>,
        policy: RetryPolicy,
        tmp_dir: impl Into<PathBuf>,
        split_size: Option<u64>,
    ) -> Self {
        Self {
            client,
            policy,
            tmp_dir: tmp_dir.into(),
            split_size,
        }
    }

    /// Archive `dir` and send it for `data_source`. Returns the number of parts sent.
    pub async fn upload(
        &self,
        data_source: &DataSource,
        dir: &Path,
    ) -> Result<usize, UploadError> {
        let central_id = data_source
            .central_id
            .as_deref()
            .ok_or(UploadError::MissingCentralId(data_source.id))?;

        let guard = ArchiveGuard::new(self.tmp_dir.join(format!("archive{}", Uuid::new_v4())));
        let progress = Mutex::new(Progress::default());

        let parts = retry(&self.policy, "achilles_upload", || {
            self.compress_and_send(central_id, dir, guard.path(), &progress)
        })
        .await
        .map_err(|(attempts, last)| UploadError::Exhausted {
            attempts,
            last: Box::new(last),
        })?;

        info!(
            data_source_id = data_source.id,
            central_id = %central_id,
            parts,
            "Achilles results uploaded"
        );
        Ok(parts)
    }

    /// One attempt: compress unless an earlier attempt already did, then send
    /// the parts not yet accepted.
    async fn compress_and_send(
        &self,
        central_id: &str,
        dir: &Path,
        target: &Path,
        progress: &Mutex<Progress>,
    ) -> Result<usize, UploadError> {
        let mut progress = progress.lock().await;

        let parts = match &progress.parts {
            Some(parts) => parts.clone(),
            None => {
                let (source, archive) = (dir.to_path_buf(), target.to_path_buf());
                let split_size = self.split_size;
                let parts = tokio::task::spawn_blocking(move || {
                    compress_and_split(&source, &archive, split_size)
                })
                .await
                .map_err(|e| UploadError::Archive(e.to_string()))??;
                debug!(archive = %target.display(), parts = parts.len(), "Results compressed");
                progress.parts = Some(parts.clone());
                parts
            }
        };

        let base_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "achilles".to_string());
        let single = parts.len() == 1;

        for part in &parts[progress.sent..] {
            let file_name = if single {
                base_name.clone()
            } else {
                match part.extension() {
                    Some(ext) if part != target => {
                        format!("{}.{}", base_name, ext.to_string_lossy())
                    }
                    _ => format!("{}.zip", base_name),
                }
            };
            let bytes = tokio::fs::read(part).await?;
            self.client
                .send_results(central_id, FilePayload::new(file_name, bytes))
                .await?;
            progress.sent += 1;
            debug!(part = %part.display(), sent = progress.sent, "Archive part sent");
        }
        Ok(parts.len())
    }
}

/// Upload state carried across attempts.
#[derive(Debug, Default)]
struct Progress {
    /// Archive parts, once compressed.
    parts: Option<Vec<PathBuf>>,
    /// Number of leading parts the central system accepted.
    sent: usize,
}
