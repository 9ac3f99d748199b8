// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory central client for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::UploadError;
use super::central::{CentralClient, FilePayload, ReportDescriptor};

/// Central client that fails chosen sends and accepts the rest.
#[derive(Debug, Clone, Default)]
pub struct MockCentralClient {
    failures_left: Arc<AtomicU32>,
    failing_calls: Arc<Vec<u32>>,
    attempts: Arc<AtomicU32>,
    received: Arc<Mutex<Vec<(String, FilePayload)>>>,
    reports: Arc<Vec<ReportDescriptor>>,
}

impl MockCentralClient {
    /// Client accepting every send.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client rejecting the first `failures` sends with a transport error.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_left: Arc::new(AtomicU32::new(failures)),
            ..Self::default()
        }
    }

    /// Client rejecting the given sends (1-based call numbers).
    pub fn failing_at(calls: &[u32]) -> Self {
        Self {
            failing_calls: Arc::new(calls.to_vec()),
            ..Self::default()
        }
    }

    /// Reports returned by `list_reports`.
    pub fn with_reports(mut self, reports: Vec<ReportDescriptor>) -> Self {
        self.reports = Arc::new(reports);
        self
    }

    /// Number of send attempts, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Accepted payloads with their central ids.
    pub async fn received(&self) -> Vec<(String, FilePayload)> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl CentralClient for MockCentralClient {
    async fn send_results(
        &self,
        central_id: &str,
        payload: FilePayload,
    ) -> Result<(), UploadError> {
        let call = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
            || self.failing_calls.contains(&call);
        if failing {
            return Err(UploadError::Transport("connection reset".to_string()));
        }
        self.received
            .lock()
            .await
            .push((central_id.to_string(), payload));
        Ok(())
    }

    async fn list_reports(&self) -> Result<Vec<ReportDescriptor>, UploadError> {
        Ok(self.reports.as_ref().clone())
    }
}
