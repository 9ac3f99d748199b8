// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock connector for testing.
//!
//! Answers queries by matching SQL substrings against scripted result sets.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};

use super::{Connection, Connector, QueryError, Result, Row};
use crate::datasource::DataSource;

#[derive(Debug, Clone, Default)]
struct Script {
    tables: HashSet<String>,
    rows: Vec<(String, Vec<Row>)>,
    failures: Vec<String>,
    delays: Vec<(String, Duration)>,
}

impl Script {
    fn first_match<'a, T>(entries: &'a [(String, T)], sql: &str) -> Option<&'a T> {
        entries
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, value)| value)
    }
}

/// Mock connector for testing.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Script>,
    connections: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Connector where no table exists and every query returns no rows.
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }

    /// Mark a table as existing (in any schema).
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.script_mut().tables.insert(table.into());
        self
    }

    /// Return `rows` for queries containing `pattern`.
    pub fn with_rows(mut self, pattern: impl Into<String>, rows: Vec<Row>) -> Self {
        self.script_mut().rows.push((pattern.into(), rows));
        self
    }

    /// Fail queries containing `pattern`.
    pub fn with_failure(mut self, pattern: impl Into<String>) -> Self {
        self.script_mut().failures.push(pattern.into());
        self
    }

    /// Delay queries containing `pattern`.
    pub fn with_delay(mut self, pattern: impl Into<String>, delay: Duration) -> Self {
        self.script_mut().delays.push((pattern.into(), delay));
        self
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _data_source: &DataSource) -> Result<Box<dyn Connection>> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            script: self.script.clone(),
        }))
    }
}

struct MockConnection {
    script: Arc<Script>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn table_exists(&mut self, _schema: &str, table: &str) -> Result<bool> {
        Ok(self.script.tables.contains(table))
    }

    fn fetch<'a>(&'a mut self, sql: &'a str) -> BoxStream<'a, Result<Row>> {
        let delay = Script::first_match(&self.script.delays, sql)
            .copied()
            .unwrap_or_default();

        let outcome = if self
            .script
            .failures
            .iter()
            .any(|pattern| sql.contains(pattern.as_str()))
        {
            Err(QueryError::Sql(sqlx::Error::Protocol(format!(
                "scripted failure for query: {}",
                sql
            ))))
        } else {
            Ok(Script::first_match(&self.script.rows, sql)
                .cloned()
                .unwrap_or_default())
        };

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        }
        .into_stream()
        .flat_map(|outcome| match outcome {
            Ok(rows) => stream::iter(rows.into_iter().map(Ok)).left_stream(),
            Err(e) => stream::once(async move { Err(e) }).right_stream(),
        })
        .boxed()
    }
}
