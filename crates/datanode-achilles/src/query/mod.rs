// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Query/report executor.
//!
//! Runs parametrized SQL templates against a data source and materializes
//! the result sets as JSON files. Each report task opens its own
//! [`Connection`] through a shared [`Connector`].

pub mod executor;
pub mod mock;
pub mod postgres;

pub use executor::{ConceptExtractor, QueryTemplate, ReportSession, RowProcessor, render};
pub use mock::MockConnector;
pub use postgres::PgConnector;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::datasource::DataSource;

/// One result row, keyed by upper-cased column name.
pub type Row = Map<String, Value>;

/// Errors from the query executor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueryError {
    /// SQL or connection failure.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// A prerequisite Achilles table is missing from the results schema.
    #[error("Achilles results is not available, table {table} was not found")]
    ResultsNotAvailable {
        /// Qualified name of the missing table.
        table: String,
    },

    /// The data source is not reachable over a supported protocol.
    #[error("Unsupported DBMS for connection string: {0}")]
    UnsupportedDbms(String),

    /// Writing the JSON artifact failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the JSON artifact failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Opens connections to data sources.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection owned by the caller.
    async fn connect(&self, data_source: &DataSource) -> Result<Box<dyn Connection>>;
}

/// A live connection to one data source.
#[async_trait]
pub trait Connection: Send {
    /// Whether `schema.table` exists.
    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool>;

    /// Run a query and stream its rows.
    fn fetch<'a>(&'a mut self, sql: &'a str) -> BoxStream<'a, Result<Row>>;
}
