// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for datanode-achilles integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use datanode_achilles::config::{AchillesSettings, FunctionalMode};
use datanode_achilles::jobs::SqliteJobStore;
use datanode_achilles::query::MockConnector;
use datanode_achilles::query::executor::ACHILLES_RESULTS_TABLE;
use datanode_achilles::runner::MockRuntime;
use datanode_achilles::upload::{MockCentralClient, RetryPolicy, RetryStrategy};
use datanode_achilles::{AchillesService, DataSource};

/// SQL fragment of the results-table row count query.
pub const COUNT_QUERY: &str = "SELECT COUNT(*) AS count FROM";

/// Heel results table.
pub const HEEL_TABLE: &str = "achilles_heel_results";

/// A data source registered on the central system as `42`.
pub fn data_source(id: i64) -> DataSource {
    DataSource {
        id,
        name: "synpuf".to_string(),
        connection_string: "jdbc:postgresql://localhost:5432/cdm".to_string(),
        username: "ohdsi".to_string(),
        password: "secret".to_string(),
        cdm_schema: "cdm".to_string(),
        result_schema: Some("results".to_string()),
        central_id: Some("42".to_string()),
    }
}

/// Settings writing under `tmp_dir`, with fast retries and heartbeats.
pub fn settings(tmp_dir: &Path) -> AchillesSettings {
    AchillesSettings {
        tmp_dir: tmp_dir.to_path_buf(),
        pull_timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(3, Duration::from_millis(5), RetryStrategy::Fixed),
        mode: FunctionalMode::Network,
        heartbeat_interval: Duration::from_millis(20),
        heartbeat_timeout: Duration::from_millis(200),
        ..AchillesSettings::default()
    }
}

/// Convert a JSON object literal into a result row.
pub fn row(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("row must be an object, got {other}"),
    }
}

/// Connector whose results tables exist and hold `count` rows.
pub fn results_connector(count: i64) -> MockConnector {
    MockConnector::new()
        .with_table(ACHILLES_RESULTS_TABLE)
        .with_table(HEEL_TABLE)
        .with_rows(COUNT_QUERY, vec![row(json!({ "COUNT": count }))])
}

/// Fresh in-memory job store.
pub async fn sqlite_store() -> Arc<SqliteJobStore> {
    Arc::new(SqliteJobStore::in_memory().await.unwrap())
}

/// Collaborators of a service under test.
pub struct TestContext {
    pub service: AchillesService,
    pub store: Arc<SqliteJobStore>,
    pub runtime: MockRuntime,
    pub central: MockCentralClient,
    pub tmp: tempfile::TempDir,
}

impl TestContext {
    /// Service over an in-memory store with the given mocks.
    pub async fn new(
        runtime: MockRuntime,
        connector: MockConnector,
        central: MockCentralClient,
    ) -> Self {
        let tmp = tempfile::TempDir::new().unwrap();
        Self::with_settings(runtime, connector, central, settings(tmp.path()), tmp).await
    }

    /// Service with explicit settings; `tmp` must outlive the service.
    pub async fn with_settings(
        runtime: MockRuntime,
        connector: MockConnector,
        central: MockCentralClient,
        settings: AchillesSettings,
        tmp: tempfile::TempDir,
    ) -> Self {
        let store = sqlite_store().await;
        let service = AchillesService::builder()
            .store(store.clone())
            .runtime(Arc::new(runtime.clone()))
            .connector(Arc::new(connector))
            .central(Arc::new(central.clone()))
            .settings(settings)
            .build()
            .unwrap();

        Self {
            service,
            store,
            runtime,
            central,
            tmp,
        }
    }

    /// Names of entries left under the temp root.
    pub fn leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}
