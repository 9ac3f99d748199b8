// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed job store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{
    JOB_COLUMNS, Job, JobRow, JobSource, JobStatus, JobStore, map_create_error, not_in_progress,
    rows_to_jobs,
};
use crate::error::Result;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite job store, used for single-node deployments and tests.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Create a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Connect to a `sqlite:` URL and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to sqlite::memory: is a separate database.
        Self::connect("sqlite::memory:", 1).await
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_in_progress(
        &self,
        data_source_id: i64,
        source: JobSource,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM achilles_jobs
            WHERE datasource_id = ? AND source = ? AND status = 'IN_PROGRESS'
            ORDER BY started ASC
            LIMIT 1
            "#
        ))
        .bind(data_source_id)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn create(&self, data_source_id: i64, source: JobSource) -> Result<Job> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO achilles_jobs (datasource_id, source, status, started, heartbeat)
            VALUES (?, ?, 'IN_PROGRESS', ?, ?)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(data_source_id)
        .bind(source.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_create_error(e, data_source_id, source))?;

        Job::try_from(row)
    }

    async fn update_status(&self, job_id: i64, status: JobStatus) -> Result<()> {
        let finished = status.is_terminal().then(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE achilles_jobs
            SET status = ?, finished = ?
            WHERE id = ? AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(status.as_str())
        .bind(finished)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_in_progress(job_id, self.get(job_id).await?));
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE achilles_jobs SET heartbeat = ? WHERE id = ? AND status = 'IN_PROGRESS'",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_log(&self, job_id: i64, log: &str) -> Result<()> {
        let result = sqlx::query("UPDATE achilles_jobs SET achilles_log = ? WHERE id = ?")
            .bind(log)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_in_progress(job_id, None));
        }
        Ok(())
    }

    async fn find_all_in_progress(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM achilles_jobs WHERE status = 'IN_PROGRESS' ORDER BY started"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(rows)
    }

    async fn find_stale_in_progress(&self, older_than: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM achilles_jobs
            WHERE status = 'IN_PROGRESS' AND COALESCE(heartbeat, started) < ?
            ORDER BY started
            "#
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(rows)
    }

    async fn save_all(&self, jobs: &[Job]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut saved = 0;
        for job in jobs {
            let result = sqlx::query(
                r#"
                UPDATE achilles_jobs
                SET status = ?, finished = ?, achilles_log = ?
                WHERE id = ? AND status = 'IN_PROGRESS'
                "#,
            )
            .bind(job.status.as_str())
            .bind(job.finished)
            .bind(job.log.as_deref())
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
            saved += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM achilles_jobs WHERE id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list_for_data_source(&self, data_source_id: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM achilles_jobs
            WHERE datasource_id = ?
            ORDER BY started DESC, id DESC
            "#
        ))
        .bind(data_source_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(rows)
    }
}
