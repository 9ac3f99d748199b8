// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Achilles job orchestration.
//!
//! Two workflows share one job lifecycle:
//!
//! - GENERATION: pull the Achilles image, run the container against the data
//!   source, record its log. A successful run whose results table is
//!   populated chains into an IMPORT.
//! - IMPORT: run the report catalog concurrently into a work directory and
//!   upload the archived output to the central system.
//!
//! Every terminal transition stamps `finished` and persists the job log,
//! including when the run itself errored. While a job runs its heartbeat is
//! refreshed; the recovery sweep only fails jobs whose heartbeat went stale.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{AchillesSettings, FunctionalMode};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::jobs::{Job, JobSource, JobStatus, JobStore};
use crate::query::{Connector, QueryError, ReportSession};
use crate::reports::{catalog, run_report_tasks};
use crate::runner::{
    ContainerRunner, ContainerRuntime, achilles_container_spec, host_bind_path,
    locate_results_dir,
};
use crate::upload::{CentralClient, ReportDescriptor, Uploader};
use crate::work_dir::WorkDir;

/// Log entry recorded in place of a job log that could not be saved.
pub const JOB_LOG_LOST: &str = "Job log could not be saved";

/// Log entry appended to jobs failed by the recovery sweep.
pub const ORPHANED_JOB: &str = "Job orphaned: no heartbeat from the process running it";

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running job.
#[derive(Debug)]
pub struct JobHandle {
    job: Job,
    handle: JoinHandle<Result<JobStatus>>,
}

impl JobHandle {
    /// The job as created (status `IN_PROGRESS`).
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Wait for the job, and any work chained to it, to finish.
    pub async fn wait(self) -> Result<JobStatus> {
        self.handle
            .await
            .map_err(|e| Error::Coordination(e.to_string()))?
    }
}

/// Builder for [`AchillesService`].
#[derive(Default)]
pub struct AchillesServiceBuilder {
    store: Option<Arc<dyn JobStore>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    connector: Option<Arc<dyn Connector>>,
    central: Option<Arc<dyn CentralClient>>,
    settings: AchillesSettings,
}

impl AchillesServiceBuilder {
    /// Set the job store (required).
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the container runtime (required).
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the data source connector (required).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the central system client (required in network mode).
    pub fn central(mut self, central: Arc<dyn CentralClient>) -> Self {
        self.central = Some(central);
        self
    }

    /// Set the Achilles settings.
    pub fn settings(mut self, settings: AchillesSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the service.
    pub fn build(self) -> Result<AchillesService> {
        let store = self
            .store
            .ok_or_else(|| Error::Other("store is required".to_string()))?;
        let runtime = self
            .runtime
            .ok_or_else(|| Error::Other("runtime is required".to_string()))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::Other("connector is required".to_string()))?;

        let settings = self.settings;
        let uploader = match (settings.mode, &self.central) {
            (FunctionalMode::Standalone, _) => None,
            (FunctionalMode::Network, Some(central)) => Some(Uploader::new(
                central.clone(),
                settings.retry.clone(),
                settings.tmp_dir.clone(),
                settings.archive_split_size,
            )),
            (FunctionalMode::Network, None) => {
                return Err(Error::Other(
                    "central client is required in network mode".to_string(),
                ));
            }
        };

        Ok(AchillesService {
            inner: Arc::new(Inner {
                store,
                runner: ContainerRunner::new(runtime, settings.pull_timeout, settings.verbose),
                connector,
                central: self.central,
                uploader,
                settings,
            }),
        })
    }
}

struct Inner {
    store: Arc<dyn JobStore>,
    runner: ContainerRunner,
    connector: Arc<dyn Connector>,
    central: Option<Arc<dyn CentralClient>>,
    uploader: Option<Uploader>,
    settings: AchillesSettings,
}

/// Orchestrates Achilles generation and import jobs.
#[derive(Clone)]
pub struct AchillesService {
    inner: Arc<Inner>,
}

impl AchillesService {
    /// Create a new builder.
    pub fn builder() -> AchillesServiceBuilder {
        AchillesServiceBuilder::default()
    }

    /// Mark `IN_PROGRESS` jobs whose heartbeat is older than the configured
    /// timeout as `FAILED`.
    ///
    /// Jobs another live process is running keep their heartbeat fresh and
    /// are left alone. Returns the number of jobs swept.
    pub async fn recover_orphaned_jobs(&self) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.inner.settings.heartbeat_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut jobs = self.inner.store.find_stale_in_progress(cutoff).await?;
        for job in &mut jobs {
            warn!(
                job_id = job.id,
                data_source_id = job.data_source_id,
                source = %job.source,
                heartbeat = ?job.heartbeat,
                "Marking orphaned Achilles job as failed"
            );
            job.log = Some(match job.log.take() {
                Some(log) if !log.is_empty() => format!("{}\n{}", log, ORPHANED_JOB),
                _ => ORPHANED_JOB.to_string(),
            });
            job.finish(JobStatus::Failed);
        }

        let swept = self.inner.store.save_all(&jobs).await?;
        if swept > 0 {
            info!(count = swept, "Recovered orphaned Achilles jobs");
        }
        Ok(swept)
    }

    /// Start a GENERATION run for `data_source`.
    ///
    /// Fails with [`Error::JobInProgress`] when one is already running.
    pub async fn execute_achilles(&self, data_source: &DataSource) -> Result<JobHandle> {
        info!(data_source = %data_source, "Starting Achilles");
        let job = self.inner.admit(data_source.id, JobSource::Generation).await?;

        let inner = self.inner.clone();
        let data_source = data_source.clone();
        let job_id = job.id;
        let handle =
            tokio::spawn(async move { inner.run_generation(job_id, data_source).await });
        Ok(JobHandle { job, handle })
    }

    /// Whether the results table exists and holds at least one row.
    ///
    /// Never fails: a missing table or a query error reads as `false`.
    pub async fn has_achilles_result_table(&self, data_source: &DataSource) -> bool {
        self.inner.has_achilles_result_table(data_source).await
    }

    /// Create an IMPORT job when results are available.
    pub async fn create_import_job(&self, data_source: &DataSource) -> Result<Option<Job>> {
        self.inner.create_import_job(data_source).await
    }

    /// Start the IMPORT workflow for an already-created job.
    pub fn pull_achilles_data(&self, job: Job, data_source: &DataSource) -> JobHandle {
        let inner = self.inner.clone();
        let data_source = data_source.clone();
        let job_id = job.id;
        let handle = tokio::spawn(async move { inner.run_import(job_id, data_source).await });
        JobHandle { job, handle }
    }

    /// Reports the central system can display; empty in standalone mode.
    pub async fn get_achilles_reports(&self) -> Result<Vec<ReportDescriptor>> {
        match &self.inner.central {
            Some(central) => Ok(central.list_reports().await?),
            None => Ok(Vec::new()),
        }
    }

    /// Jobs recorded for `data_source`, newest first.
    pub async fn jobs(&self, data_source: &DataSource) -> Result<Vec<Job>> {
        self.inner.store.list_for_data_source(data_source.id).await
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>, log: &mut Vec<String>) {
    while let Ok(line) = rx.try_recv() {
        log.push(line);
    }
}

impl Inner {
    async fn admit(&self, data_source_id: i64, source: JobSource) -> Result<Job> {
        if let Some(running) = self.store.find_in_progress(data_source_id, source).await? {
            info!(
                job_id = running.id,
                data_source_id,
                source = %source,
                "Achilles job already in progress"
            );
            return Err(Error::JobInProgress {
                data_source_id,
                kind: source,
            });
        }
        let job = self.store.create(data_source_id, source).await?;
        debug!(job_id = job.id, data_source_id, source = %source, "Achilles job created");
        Ok(job)
    }

    /// Run `work`, refreshing the job heartbeat until it completes.
    async fn with_heartbeat<T>(&self, job_id: i64, work: impl Future<Output = T>) -> T {
        tokio::pin!(work);
        let period = self.settings.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; `create` already stamped it.
        ticker.tick().await;

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => match self.store.heartbeat(job_id).await {
                    Ok(true) => debug!(job_id, "Achilles job heartbeat"),
                    Ok(false) => warn!(job_id, "Achilles job is no longer in progress"),
                    Err(e) => warn!(job_id, error = %e, "Failed to refresh Achilles job heartbeat"),
                },
            }
        }
    }

    /// Save the log, then move the job to `status`.
    ///
    /// Returns the status the job ended with, which is the stored one when
    /// the job was already finished elsewhere.
    async fn finish_job(
        &self,
        job_id: i64,
        status: JobStatus,
        log: &[String],
    ) -> Result<JobStatus> {
        if let Err(e) = self.store.save_log(job_id, &log.join("\n")).await {
            error!(job_id, error = %e, "Failed to save Achilles job log");
            let note = format!("{}: {}", JOB_LOG_LOST, e);
            if let Err(e) = self.store.save_log(job_id, &note).await {
                error!(job_id, error = %e, "Failed to record lost Achilles job log");
            }
        }

        match self.store.update_status(job_id, status).await {
            Ok(()) => {
                info!(job_id, status = %status, "Achilles job finished");
                Ok(status)
            }
            Err(Error::JobFinished { status: stored, .. }) => {
                warn!(
                    job_id,
                    status = %status,
                    stored = %stored,
                    "Achilles job was already finished, keeping stored status"
                );
                Ok(stored)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_generation(&self, job_id: i64, data_source: DataSource) -> Result<JobStatus> {
        let mut log = Vec::new();
        let (log_tx, mut log_rx) = mpsc::unbounded_channel();

        let outcome = self
            .with_heartbeat(job_id, self.generate(job_id, &data_source, &log_tx))
            .await;
        drop(log_tx);
        drain(&mut log_rx, &mut log);

        let status = match outcome {
            Ok(0) => JobStatus::Successful,
            Ok(exit_code) => {
                let e = crate::runner::RunnerError::NonZeroExit { exit_code };
                warn!(job_id, data_source_id = data_source.id, error = %e, "Achilles failed");
                log.push(e.to_string());
                JobStatus::Failed
            }
            Err(e) => {
                error!(
                    job_id,
                    data_source_id = data_source.id,
                    error = %e,
                    "Achilles failed to execute"
                );
                log.push(e.to_string());
                JobStatus::Failed
            }
        };
        let status = self.finish_job(job_id, status, &log).await?;

        if status == JobStatus::Successful {
            self.chain_import(&data_source).await;
        }
        Ok(status)
    }

    async fn generate(
        &self,
        job_id: i64,
        data_source: &DataSource,
        logs: &mpsc::UnboundedSender<String>,
    ) -> Result<i64> {
        let settings = &self.settings;
        let work_dir = WorkDir::create(&settings.tmp_dir, job_id, settings.verbose).await?;

        self.runner
            .pull_image(&settings.image_name, settings.registry_auth.as_ref())
            .await?;

        let bind_path = host_bind_path(
            work_dir.path(),
            &settings.tmp_dir,
            settings.tmp_location_on_host.as_deref(),
        );
        let spec = achilles_container_spec(
            data_source,
            &settings.image_name,
            &bind_path,
            settings.network_mode.as_deref(),
        );
        let run = self.runner.run_container(&spec, logs).await?;

        if run.succeeded() {
            match locate_results_dir(work_dir.path(), &data_source.name).await {
                Ok(results) => info!(path = %results.display(), "Achilles results written"),
                Err(e) => warn!(
                    work_dir = %work_dir.path().display(),
                    error = %e,
                    "Achilles results directory not found"
                ),
            }
        }
        Ok(run.exit_code)
    }

    /// Runs the IMPORT that follows a successful GENERATION.
    ///
    /// Failures here are logged only; they never touch the GENERATION job.
    async fn chain_import(&self, data_source: &DataSource) {
        match self.create_import_job(data_source).await {
            Ok(Some(job)) => {
                if let Err(e) = self.run_import(job.id, data_source.clone()).await {
                    warn!(
                        data_source_id = data_source.id,
                        error = %e,
                        "Couldn't import Achilles results"
                    );
                }
            }
            Ok(None) => {
                info!(data_source_id = data_source.id, "No Achilles results to import");
            }
            Err(e) => {
                warn!(
                    data_source_id = data_source.id,
                    error = %e,
                    "Couldn't import Achilles results"
                );
            }
        }
    }

    async fn has_achilles_result_table(&self, data_source: &DataSource) -> bool {
        let count = match ReportSession::open(self.connector.as_ref(), data_source).await {
            Ok(mut session) => session.count_results().await,
            Err(e) => Err(e),
        };
        match count {
            Ok(count) => count > 0,
            Err(QueryError::ResultsNotAvailable { table }) => {
                info!(
                    data_source_id = data_source.id,
                    table = %table,
                    "Achilles results not available"
                );
                false
            }
            Err(e) => {
                warn!(
                    data_source_id = data_source.id,
                    error = %e,
                    "Failed to check achilles results"
                );
                false
            }
        }
    }

    async fn create_import_job(&self, data_source: &DataSource) -> Result<Option<Job>> {
        if self.has_achilles_result_table(data_source).await {
            Ok(Some(self.admit(data_source.id, JobSource::Import).await?))
        } else {
            Ok(None)
        }
    }

    async fn run_import(&self, job_id: i64, data_source: DataSource) -> Result<JobStatus> {
        info!(job_id, data_source = %data_source, "Start pulling Achilles data");
        let mut log = Vec::new();

        let outcome = self
            .with_heartbeat(job_id, self.pull_and_upload(job_id, &data_source, &mut log))
            .await;
        let status = match outcome {
            Ok(()) => JobStatus::Successful,
            Err(e) => {
                error!(
                    job_id,
                    data_source_id = data_source.id,
                    error = %e,
                    "Failed to pull achilles results"
                );
                log.push(e.to_string());
                JobStatus::Failed
            }
        };
        self.finish_job(job_id, status, &log).await
    }

    async fn pull_and_upload(
        &self,
        job_id: i64,
        data_source: &DataSource,
        log: &mut Vec<String>,
    ) -> Result<()> {
        // Standalone output has nowhere else to go.
        let keep = self.settings.verbose || self.uploader.is_none();
        let work_dir = WorkDir::create(&self.settings.tmp_dir, job_id, keep).await?;

        let summary = run_report_tasks(
            self.connector.clone(),
            data_source,
            work_dir.path(),
            catalog(),
        )
        .await?;
        log.extend(summary.lines.iter().cloned());
        debug!(
            path = %work_dir.path().display(),
            records = summary.records,
            "Achilles data collected"
        );

        if summary.failures > 0 && self.settings.fail_on_task_error {
            return Err(Error::ReportTasks {
                failed: summary.failures,
            });
        }

        match &self.uploader {
            Some(uploader) => {
                let parts = uploader.upload(data_source, work_dir.path()).await?;
                log.push(format!("Achilles results uploaded in {} part(s)", parts));
            }
            None => {
                info!(path = %work_dir.path().display(), "Standalone mode, skipping upload");
            }
        }
        Ok(())
    }
}
