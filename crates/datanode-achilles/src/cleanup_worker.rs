// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for cleaning up leftover work directories and archives.
//!
//! Work directories (`{TMP_DIR}/achilles_<job id>_<uuid>/`) and temporary
//! archives (`{TMP_DIR}/archive<uuid>[.zNN]`) are normally removed when their
//! run ends. A crash leaves them behind; this worker removes those older than
//! the configured age, once at startup and then periodically.
//!
//! A directory's age is that of the newest entry anywhere in its tree, and a
//! directory whose job is still `IN_PROGRESS` is never removed. Kept
//! directories (`achilles-kept_*`) are not matched at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::jobs::{JobStatus, JobStore};
use crate::work_dir::{WORK_DIR_PREFIX, owning_job};

/// File name prefix of temporary upload archives.
pub const ARCHIVE_PREFIX: &str = "archive";

/// Configuration for the cleanup worker.
#[derive(Debug, Clone)]
pub struct CleanupWorkerConfig {
    /// Temp root holding work directories and archives.
    pub tmp_dir: PathBuf,
    /// How often to scan.
    pub poll_interval: Duration,
    /// Minimum age before an entry is removed.
    pub max_age: Duration,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            poll_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

/// Background worker that removes stale Achilles temp entries.
pub struct CleanupWorker {
    config: CleanupWorkerConfig,
    store: Arc<dyn JobStore>,
    shutdown: Arc<Notify>,
}

impl CleanupWorker {
    /// Create a new cleanup worker; `store` tells which jobs are still running.
    pub fn new(config: CleanupWorkerConfig, store: Arc<dyn JobStore>) -> Self {
        Self {
            config,
            store,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the cleanup loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            tmp_dir = %self.config.tmp_dir.display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_hours = self.config.max_age.as_secs() / 3600,
            "Cleanup worker started"
        );

        if let Err(e) = self.cleanup_stale_entries().await {
            error!(error = %e, "Failed to cleanup stale entries");
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Cleanup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.cleanup_stale_entries().await {
                        error!(error = %e, "Failed to cleanup stale entries");
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }

    /// Scan the temp root once. Returns the number of entries removed.
    pub async fn cleanup_stale_entries(&self) -> std::io::Result<u64> {
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut cleaned = 0u64;
        let mut errors = 0u64;

        let mut entries = match tokio::fs::read_dir(&self.config.tmp_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Temp directory does not exist, nothing to clean");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();

            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to get file type");
                    errors += 1;
                    continue;
                }
            };

            let owned = (file_type.is_dir() && name.starts_with(WORK_DIR_PREFIX))
                || (file_type.is_file() && name.starts_with(ARCHIVE_PREFIX));
            if !owned {
                continue;
            }

            if file_type.is_dir()
                && let Some(job_id) = owning_job(&name)
                && self.job_running(job_id).await
            {
                debug!(path = %path.display(), job_id, "Work directory in use, skipping");
                continue;
            }

            match self.remove_if_stale(&path, file_type.is_dir(), cutoff).await {
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale entry");
                    errors += 1;
                }
            }
        }

        if cleaned > 0 || errors > 0 {
            info!(cleaned = cleaned, errors = errors, "Cleanup cycle completed");
        } else {
            debug!("Cleanup cycle completed, no stale entries found");
        }

        Ok(cleaned)
    }

    /// Whether the job is still `IN_PROGRESS`; lookup failures count as running.
    async fn job_running(&self, job_id: i64) -> bool {
        match self.store.get(job_id).await {
            Ok(job) => job.is_some_and(|job| job.status == JobStatus::InProgress),
            Err(e) => {
                warn!(job_id, error = %e, "Failed to look up work directory job");
                true
            }
        }
    }

    async fn remove_if_stale(
        &self,
        path: &Path,
        is_dir: bool,
        cutoff: DateTime<Utc>,
    ) -> std::io::Result<bool> {
        let modified = if is_dir {
            let root = path.to_path_buf();
            tokio::task::spawn_blocking(move || newest_modification(&root))
                .await
                .map_err(std::io::Error::other)??
        } else {
            tokio::fs::metadata(path).await?.modified()?
        };
        let modified = DateTime::<Utc>::from(modified);
        if modified > cutoff {
            return Ok(false);
        }

        if is_dir {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        debug!(
            path = %path.display(),
            age_hours = (Utc::now() - modified).num_hours(),
            "Removed stale entry"
        );
        Ok(true)
    }
}

/// Newest modification time of `root` and everything below it.
fn newest_modification(root: &Path) -> std::io::Result<SystemTime> {
    let mut newest = std::fs::metadata(root)?.modified()?;
    for entry in WalkDir::new(root).min_depth(1) {
        let modified = entry?.metadata()?.modified()?;
        newest = newest.max(modified);
    }
    Ok(newest)
}
