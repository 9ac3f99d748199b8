// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{
    JOB_COLUMNS, Job, JobRow, JobSource, JobStatus, JobStore, map_create_error, not_in_progress,
    rows_to_jobs,
};
use crate::error::Result;

/// Migrations for the PostgreSQL job store.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL job store.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Create a store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn find_in_progress(
        &self,
        data_source_id: i64,
        source: JobSource,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM achilles_jobs
            WHERE datasource_id = $1 AND source = $2 AND status = 'IN_PROGRESS'
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
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO achilles_jobs (datasource_id, source, status, started, heartbeat)
            VALUES ($1, $2, 'IN_PROGRESS', $3, $3)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(data_source_id)
        .bind(source.as_str())
        .bind(Utc::now())
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
            SET status = $2, finished = $3
            WHERE id = $1 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(finished)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_in_progress(job_id, self.get(job_id).await?));
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE achilles_jobs SET heartbeat = $2 WHERE id = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_log(&self, job_id: i64, log: &str) -> Result<()> {
        let result = sqlx::query("UPDATE achilles_jobs SET achilles_log = $2 WHERE id = $1")
            .bind(job_id)
            .bind(log)
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
            WHERE status = 'IN_PROGRESS' AND COALESCE(heartbeat, started) < $1
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
                SET status = $2, finished = $3, achilles_log = $4
                WHERE id = $1 AND status = 'IN_PROGRESS'
                "#,
            )
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(job.finished)
            .bind(job.log.as_deref())
            .execute(&mut *tx)
            .await?;
            saved += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM achilles_jobs WHERE id = $1"
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
            WHERE datasource_id = $1
            ORDER BY started DESC, id DESC
            "#
        ))
        .bind(data_source_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_jobs(rows)
    }
}
