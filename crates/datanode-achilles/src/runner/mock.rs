// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container runtime for testing.
//!
//! Simulates an Achilles container run with scripted logs, exit code and
//! error report, and records every call it receives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::traits::*;

/// Calls observed by a [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// Image pull.
    Pull(String),
    /// Container created from the spec.
    Create(ContainerSpec),
    /// Container started.
    Start(String),
    /// Error report copied out of the container.
    Copy(String, String),
    /// Container removed, with the volume flag.
    Remove(String, bool),
}

/// Mock runtime for testing.
#[derive(Clone)]
pub struct MockRuntime {
    calls: Arc<Mutex<Vec<MockCall>>>,
    next_id: Arc<AtomicU64>,
    /// Lines emitted on the log stream.
    pub logs: Vec<String>,
    /// Exit code returned from the wait.
    pub exit_code: i64,
    /// Contents of the error report file, `None` when absent.
    pub error_report: Option<String>,
    /// Delay before the pull completes.
    pub pull_delay: Duration,
    /// Delay before the container exits.
    pub run_delay: Duration,
    /// If true, container creation fails.
    pub fail_create: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a runtime whose containers exit with code 0.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            logs: vec![
                "Connecting using PostgreSQL driver".to_string(),
                "Achilles complete".to_string(),
            ],
            exit_code: 0,
            error_report: None,
            pull_delay: Duration::ZERO,
            run_delay: Duration::from_millis(10),
            fail_create: false,
        }
    }

    /// Create a runtime whose containers exit with `exit_code`.
    pub fn failing(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Self::new()
        }
    }

    /// Set the emitted log lines.
    pub fn with_logs<I, S>(mut self, logs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs = logs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the error report contents.
    pub fn with_error_report(mut self, report: impl Into<String>) -> Self {
        self.error_report = Some(report.into());
        self
    }

    /// Set the pull delay.
    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    /// Set the run delay.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// All recorded calls, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    /// Spec of the most recently created container.
    pub async fn last_spec(&self) -> Option<ContainerSpec> {
        self.calls.lock().await.iter().rev().find_map(|call| match call {
            MockCall::Create(spec) => Some(spec.clone()),
            _ => None,
        })
    }

    async fn record(&self, call: MockCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn pull_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        if !self.pull_delay.is_zero() {
            tokio::time::sleep(self.pull_delay).await;
        }
        self.record(MockCall::Pull(image.to_string())).await;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        if self.fail_create {
            return Err(RunnerError::Runtime("No such image".to_string()));
        }
        self.record(MockCall::Create(spec.clone())).await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-container-{}", id))
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.record(MockCall::Start(container_id.to_string())).await;
        Ok(())
    }

    async fn follow_logs(
        &self,
        _container_id: &str,
        sink: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        for line in &self.logs {
            if sink.send(line.clone()).is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn wait_container(&self, _container_id: &str) -> Result<i64> {
        tokio::time::sleep(self.run_delay).await;
        Ok(self.exit_code)
    }

    async fn copy_file_from_container(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.record(MockCall::Copy(container_id.to_string(), path.to_string()))
            .await;
        Ok(self.error_report.as_ref().map(|r| r.as_bytes().to_vec()))
    }

    async fn remove_container(&self, container_id: &str, remove_volumes: bool) -> Result<()> {
        self.record(MockCall::Remove(container_id.to_string(), remove_volumes))
            .await;
        Ok(())
    }
}
