// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-run temporary directories.
//!
//! Disposable directories are named `achilles_<job id>_<uuid>` so the
//! cleanup worker can tell which job owns them. Directories that must
//! outlive their run (verbose diagnostics, standalone output) use
//! `achilles-kept_<job id>_<uuid>`, which the worker never touches.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// Name prefix of disposable work directories under the temp root.
pub const WORK_DIR_PREFIX: &str = "achilles_";

/// Name prefix of work directories kept after their run.
pub const KEPT_DIR_PREFIX: &str = "achilles-kept_";

/// Directory exclusively owned by one job execution.
///
/// Removed on drop unless `keep` is set.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Create a work directory for `job_id` under `tmp_dir`.
    pub async fn create(tmp_dir: &Path, job_id: i64, keep: bool) -> std::io::Result<Self> {
        let prefix = if keep { KEPT_DIR_PREFIX } else { WORK_DIR_PREFIX };
        let path = tmp_dir.join(format!("{}{}_{}", prefix, job_id, Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), job_id, keep, "Work directory created");
        Ok(Self { path, keep })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Job id encoded in a disposable work directory name.
pub fn owning_job(name: &str) -> Option<i64> {
    let (job_id, _) = name.strip_prefix(WORK_DIR_PREFIX)?.split_once('_')?;
    job_id.parse().ok()
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            debug!(path = %self.path.display(), "Keeping work directory");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove work directory");
        }
    }
}
