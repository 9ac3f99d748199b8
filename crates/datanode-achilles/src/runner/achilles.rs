// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Achilles container run.
//!
//! Sequences one containerized Achilles execution on top of a
//! [`ContainerRuntime`]: bounded image pull, create, start, log streaming,
//! exit wait, error report extraction and removal. Log lines are sent on the
//! caller's channel as they arrive, so the caller keeps them whatever the
//! outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::datasource::DataSource;

/// Container path the work directory is mounted at.
pub const OUTPUT_VOLUME: &str = "/opt/app/output";

/// Error report written by Achilles on failure.
pub const ERROR_REPORT_PATH: &str = "/opt/app/errorReport.txt";

/// Log entry recorded when a failed container left no error report.
pub const ERROR_REPORT_MISSING: &str = "errorReport.txt does not exist";

/// CDM version passed to Achilles.
pub const CDM_VERSION: &str = "5.3";

/// Outcome of one container execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRun {
    /// Id of the (already removed) container.
    pub container_id: String,
    /// Exit code of the container process.
    pub exit_code: i64,
}

impl ContainerRun {
    /// Whether the process exited cleanly.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Drives Achilles container runs.
#[derive(Clone)]
pub struct ContainerRunner {
    runtime: Arc<dyn ContainerRuntime>,
    pull_timeout: Duration,
    verbose: bool,
}

impl ContainerRunner {
    /// Create a runner.
    ///
    /// With `verbose` set, container volumes survive removal.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, pull_timeout: Duration, verbose: bool) -> Self {
        Self {
            runtime,
            pull_timeout,
            verbose,
        }
    }

    /// Pull the image, failing once the bounded wait elapses.
    pub async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        debug!(image = %image, timeout = ?self.pull_timeout, "Pulling Achilles image");
        tokio::time::timeout(self.pull_timeout, self.runtime.pull_image(image, auth))
            .await
            .map_err(|_| RunnerError::PullTimeout(self.pull_timeout))?
    }

    /// Create, start and wait for a container.
    ///
    /// Every log line is sent on `logs`. A non-zero exit copies the error
    /// report into the log before the container is removed. The container is
    /// removed on every path once created.
    pub async fn run_container(
        &self,
        spec: &ContainerSpec,
        logs: &mpsc::UnboundedSender<String>,
    ) -> Result<ContainerRun> {
        let container_id = self.runtime.create_container(spec).await?;
        info!(container_id = %container_id, image = %spec.image, "Starting container");

        let outcome = self.execute(&container_id, logs).await;

        if let Ok(exit_code) = &outcome
            && *exit_code != 0
            && let Err(e) = self.read_error_report(&container_id, logs).await
        {
            warn!(container_id = %container_id, error = %e, "Failed to read error report");
        }

        if let Err(e) = self.cleanup(&container_id).await {
            warn!(container_id = %container_id, error = %e, "Failed to remove container");
        }

        let exit_code = outcome?;
        debug!(container_id = %container_id, exit_code, "Achilles finished");
        Ok(ContainerRun {
            container_id,
            exit_code,
        })
    }

    async fn execute(
        &self,
        container_id: &str,
        logs: &mpsc::UnboundedSender<String>,
    ) -> Result<i64> {
        self.runtime.start_container(container_id).await?;
        debug!(container_id = %container_id, "Container running");

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();

        let follow = self.runtime.follow_logs(container_id, line_tx);
        let forward = async {
            while let Some(line) = line_rx.recv().await {
                let line = strip_nul(&line);
                debug!(container_id = %container_id, "{}", line);
                if logs.send(line).is_err() {
                    debug!(container_id = %container_id, "Log receiver dropped, not forwarding");
                    break;
                }
            }
        };
        let wait = self.runtime.wait_container(container_id);

        let (followed, (), exit_code) = tokio::join!(follow, forward, wait);
        if let Err(e) = followed {
            warn!(container_id = %container_id, error = %e, "Log stream ended with error");
        }
        exit_code
    }

    /// Copy the error report into the log, or note its absence.
    pub async fn read_error_report(
        &self,
        container_id: &str,
        logs: &mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        match self
            .runtime
            .copy_file_from_container(container_id, ERROR_REPORT_PATH)
            .await?
        {
            Some(report) => {
                for line in String::from_utf8_lossy(&report).lines() {
                    if logs.send(strip_nul(line)).is_err() {
                        debug!(container_id = %container_id, "Log receiver dropped");
                        break;
                    }
                }
            }
            None => {
                if logs.send(ERROR_REPORT_MISSING.to_string()).is_err() {
                    debug!(container_id = %container_id, "Log receiver dropped");
                }
            }
        }
        Ok(())
    }

    /// Remove the container; volumes are kept in verbose mode.
    pub async fn cleanup(&self, container_id: &str) -> Result<()> {
        self.runtime
            .remove_container(container_id, !self.verbose)
            .await
    }
}

/// Drop NUL characters, which text columns reject.
pub fn strip_nul(line: &str) -> String {
    line.replace('\0', "")
}

/// Container environment for an Achilles run against `data_source`.
pub fn achilles_env(data_source: &DataSource) -> Vec<String> {
    [
        ("ACHILLES_SOURCE", data_source.name.clone()),
        ("ACHILLES_DB_URI", data_source.db_uri()),
        ("ACHILLES_CDM_SCHEMA", data_source.cdm_schema.clone()),
        ("ACHILLES_VOCAB_SCHEMA", data_source.cdm_schema.clone()),
        ("ACHILLES_RES_SCHEMA", data_source.result_schema().to_string()),
        ("ACHILLES_CDM_VERSION", CDM_VERSION.to_string()),
        ("ACHILLES_NUM_THREADS", 1.to_string()),
    ]
    .into_iter()
    .map(|(name, value)| format!("{}={}", name, value))
    .collect()
}

/// Host path to bind for `work_dir`.
///
/// When the datanode itself runs in a container, `tmp_dir` is visible on the
/// host as `location_on_host`, and the leading `tmp_dir` is swapped for it.
pub fn host_bind_path(work_dir: &Path, tmp_dir: &Path, location_on_host: Option<&str>) -> String {
    match location_on_host {
        Some(host) if !host.is_empty() => match work_dir.strip_prefix(tmp_dir) {
            Ok(relative) => Path::new(host).join(relative).to_string_lossy().into_owned(),
            Err(_) => work_dir.to_string_lossy().into_owned(),
        },
        _ => work_dir.to_string_lossy().into_owned(),
    }
}

/// Container spec for an Achilles run writing into `bind_path`.
pub fn achilles_container_spec(
    data_source: &DataSource,
    image: &str,
    bind_path: &str,
    network_mode: Option<&str>,
) -> ContainerSpec {
    ContainerSpec {
        image: image.to_string(),
        env: achilles_env(data_source),
        binds: vec![format!("{}:{}", bind_path, OUTPUT_VOLUME)],
        volumes: vec![OUTPUT_VOLUME.to_string()],
        network_mode: network_mode.map(str::to_string),
    }
}

/// Directory Achilles wrote its JSON output to.
///
/// Achilles writes to `<work_dir>/<source name>/<run dir>`; the last run
/// directory wins, and the source directory itself is used when there is none.
pub async fn locate_results_dir(work_dir: &Path, source_name: &str) -> std::io::Result<PathBuf> {
    let data_dir = work_dir.join(source_name);
    let mut entries = tokio::fs::read_dir(&data_dir).await?;

    let mut latest: Option<PathBuf> = None;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            let path = entry.path();
            if latest.as_ref().is_none_or(|current| path > *current) {
                latest = Some(path);
            }
        }
    }
    Ok(latest.unwrap_or(data_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::{MockCall, MockRuntime};

    fn data_source() -> DataSource {
        DataSource {
            id: 1,
            name: "synpuf".to_string(),
            connection_string: "jdbc:postgresql://host:5432/db".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            cdm_schema: "cdm".to_string(),
            result_schema: Some("results".to_string()),
            central_id: None,
        }
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_achilles_env() {
        let env = achilles_env(&data_source());
        assert_eq!(
            env,
            vec![
                "ACHILLES_SOURCE=synpuf",
                "ACHILLES_DB_URI=postgresql://u:p@host:5432/db",
                "ACHILLES_CDM_SCHEMA=cdm",
                "ACHILLES_VOCAB_SCHEMA=cdm",
                "ACHILLES_RES_SCHEMA=results",
                "ACHILLES_CDM_VERSION=5.3",
                "ACHILLES_NUM_THREADS=1",
            ]
        );
    }

    #[test]
    fn test_host_bind_path() {
        let tmp = Path::new("/tmp");
        let work = Path::new("/tmp/achilles_123");

        assert_eq!(host_bind_path(work, tmp, None), "/tmp/achilles_123");
        assert_eq!(host_bind_path(work, tmp, Some("")), "/tmp/achilles_123");
        assert_eq!(
            host_bind_path(work, tmp, Some("/var/lib/datanode/tmp")),
            "/var/lib/datanode/tmp/achilles_123"
        );
        // Paths outside the temp root are left alone.
        assert_eq!(
            host_bind_path(Path::new("/data/achilles_1"), tmp, Some("/host")),
            "/data/achilles_1"
        );
    }

    #[test]
    fn test_container_spec_binds_output_volume() {
        let spec = achilles_container_spec(&data_source(), "achilles:1", "/host/w", Some("bridge"));
        assert_eq!(spec.binds, vec!["/host/w:/opt/app/output"]);
        assert_eq!(spec.volumes, vec![OUTPUT_VOLUME]);
        assert_eq!(spec.network_mode.as_deref(), Some("bridge"));
    }

    #[tokio::test]
    async fn test_pull_timeout() {
        let runtime = MockRuntime::new().with_pull_delay(Duration::from_secs(5));
        let runner = ContainerRunner::new(Arc::new(runtime), Duration::from_millis(20), false);

        let err = runner.pull_image("achilles", None).await.unwrap_err();
        assert!(matches!(err, RunnerError::PullTimeout(_)));
    }

    #[tokio::test]
    async fn test_successful_run_streams_logs_and_removes_volumes() {
        let runtime = MockRuntime::new().with_logs(["start\0", "done"]);
        let runner = ContainerRunner::new(Arc::new(runtime.clone()), Duration::from_secs(1), false);
        let (tx, rx) = mpsc::unbounded_channel();

        let spec = achilles_container_spec(&data_source(), "achilles", "/w", None);
        let run = runner.run_container(&spec, &tx).await.unwrap();
        drop(tx);

        assert!(run.succeeded());
        assert_eq!(drain(rx), vec!["start", "done"]);

        let calls = runtime.calls().await;
        assert!(calls.contains(&MockCall::Remove(run.container_id.clone(), true)));
        assert!(!calls.iter().any(|c| matches!(c, MockCall::Copy(..))));
    }

    #[tokio::test]
    async fn test_failed_run_copies_error_report_before_removal() {
        let runtime = MockRuntime::failing(1).with_error_report("Error: boom\nat line 3");
        let runner = ContainerRunner::new(Arc::new(runtime.clone()), Duration::from_secs(1), true);
        let (tx, rx) = mpsc::unbounded_channel();

        let spec = achilles_container_spec(&data_source(), "achilles", "/w", None);
        let run = runner.run_container(&spec, &tx).await.unwrap();
        drop(tx);

        assert_eq!(run.exit_code, 1);
        let lines = drain(rx);
        assert!(lines.contains(&"Error: boom".to_string()));
        assert!(lines.contains(&"at line 3".to_string()));

        let calls = runtime.calls().await;
        let copy = calls
            .iter()
            .position(|c| matches!(c, MockCall::Copy(_, path) if path == ERROR_REPORT_PATH))
            .unwrap();
        let remove = calls
            .iter()
            .position(|c| matches!(c, MockCall::Remove(_, false)))
            .unwrap();
        assert!(copy < remove);
    }

    #[tokio::test]
    async fn test_missing_error_report_is_logged() {
        let runtime = MockRuntime::failing(2);
        let runner = ContainerRunner::new(Arc::new(runtime), Duration::from_secs(1), false);
        let (tx, rx) = mpsc::unbounded_channel();

        let spec = achilles_container_spec(&data_source(), "achilles", "/w", None);
        runner.run_container(&spec, &tx).await.unwrap();
        drop(tx);

        assert_eq!(drain(rx).last().map(String::as_str), Some(ERROR_REPORT_MISSING));
    }

    #[tokio::test]
    async fn test_run_completes_after_log_receiver_dropped() {
        let runtime = MockRuntime::failing(3)
            .with_logs(["one", "two", "three"])
            .with_error_report("Error: boom");
        let runner = ContainerRunner::new(Arc::new(runtime.clone()), Duration::from_secs(1), false);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let spec = achilles_container_spec(&data_source(), "achilles", "/w", None);
        let run = runner.run_container(&spec, &tx).await.unwrap();

        assert_eq!(run.exit_code, 3);
        let calls = runtime.calls().await;
        assert!(calls.contains(&MockCall::Remove(run.container_id.clone(), true)));
    }

    #[tokio::test]
    async fn test_locate_results_dir() {
        let work = tempfile::TempDir::new().unwrap();
        let source_dir = work.path().join("synpuf");
        std::fs::create_dir_all(&source_dir).unwrap();

        assert_eq!(
            locate_results_dir(work.path(), "synpuf").await.unwrap(),
            source_dir
        );

        std::fs::create_dir_all(source_dir.join("2024-01-01")).unwrap();
        std::fs::create_dir_all(source_dir.join("2024-02-01")).unwrap();
        std::fs::write(source_dir.join("zzz.txt"), "x").unwrap();

        assert_eq!(
            locate_results_dir(work.path(), "synpuf").await.unwrap(),
            source_dir.join("2024-02-01")
        );
    }
}
