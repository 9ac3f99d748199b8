// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template rendering and result materialization.

use std::path::Path;

use futures::TryStreamExt;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Connection, Connector, QueryError, Result, Row};
use crate::datasource::DataSource;

/// Table that must exist before any report can be pulled.
pub const ACHILLES_RESULTS_TABLE: &str = "achilles_results";

/// A SQL template and its fixed numeric parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTemplate {
    /// SQL text with `@name` placeholders.
    pub sql: &'static str,
    /// Template-specific parameters, e.g. `("analysis_id", 404)`.
    pub params: &'static [(&'static str, i64)],
}

impl QueryTemplate {
    /// Template without extra parameters.
    pub const fn new(sql: &'static str) -> Self {
        Self { sql, params: &[] }
    }

    /// Template with extra parameters.
    pub const fn with_params(sql: &'static str, params: &'static [(&'static str, i64)]) -> Self {
        Self { sql, params }
    }
}

/// How a result set becomes JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowProcessor {
    /// Object of column name to array of values.
    Columnar,
    /// Array of row objects.
    Records,
}

impl RowProcessor {
    fn start(&self) -> Value {
        match self {
            RowProcessor::Columnar => Value::Object(Map::new()),
            RowProcessor::Records => Value::Array(Vec::new()),
        }
    }

    fn push(&self, acc: &mut Value, row: Row) {
        match acc {
            Value::Object(columns) => {
                for (name, value) in row {
                    if let Value::Array(values) = columns
                        .entry(name)
                        .or_insert_with(|| Value::Array(Vec::new()))
                    {
                        values.push(value);
                    }
                }
            }
            Value::Array(rows) => rows.push(Value::Object(row)),
            _ => {}
        }
    }
}

/// Harvests one column's integer values into a caller-owned list.
#[derive(Debug)]
pub struct ConceptExtractor<'a> {
    /// Upper-cased column name.
    pub column: &'static str,
    /// Accumulator for the harvested values.
    pub sink: &'a mut Vec<i64>,
}

impl ConceptExtractor<'_> {
    fn take(&mut self, row: &Row) {
        if let Some(id) = row.get(self.column).and_then(value_as_i64) {
            self.sink.push(id);
        }
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Substitute schema, concept and template parameters into `template`.
pub fn render(
    template: &QueryTemplate,
    data_source: &DataSource,
    concept_id: Option<i64>,
) -> String {
    let mut sql = template
        .sql
        .replace("@cdm_schema", &data_source.cdm_schema)
        .replace("@vocab_schema", &data_source.cdm_schema)
        .replace("@results_schema", data_source.result_schema());

    if let Some(concept_id) = concept_id {
        sql = sql.replace("@concept_id", &concept_id.to_string());
    }
    for (name, value) in template.params {
        sql = sql.replace(&format!("@{}", name), &value.to_string());
    }
    sql
}

/// Write `value` as JSON, creating parent directories.
pub async fn write_json(target: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, serde_json::to_vec(value)?).await?;
    Ok(())
}

/// A data source connection used by one report task.
pub struct ReportSession {
    conn: Box<dyn Connection>,
    data_source: DataSource,
}

impl ReportSession {
    /// Open a dedicated connection for a report task.
    pub async fn open(connector: &dyn Connector, data_source: &DataSource) -> Result<Self> {
        let conn = connector.connect(data_source).await?;
        Ok(Self {
            conn,
            data_source: data_source.clone(),
        })
    }

    /// Fail with [`QueryError::ResultsNotAvailable`] unless `table` exists in the results schema.
    pub async fn require_table(&mut self, table: &str) -> Result<()> {
        let schema = self.data_source.result_schema().to_string();
        if self.conn.table_exists(&schema, table).await? {
            Ok(())
        } else {
            Err(QueryError::ResultsNotAvailable {
                table: format!("{}.{}", schema, table),
            })
        }
    }

    /// Run a template and fold its rows into JSON, returning the row count.
    pub async fn collect(
        &mut self,
        template: &QueryTemplate,
        concept_id: Option<i64>,
        processor: RowProcessor,
        mut extractor: Option<ConceptExtractor<'_>>,
    ) -> Result<(Value, usize)> {
        let sql = render(template, &self.data_source, concept_id);
        let mut rows = self.conn.fetch(&sql);

        let mut acc = processor.start();
        let mut count = 0;
        while let Some(row) = rows.try_next().await? {
            if let Some(extractor) = extractor.as_mut() {
                extractor.take(&row);
            }
            processor.push(&mut acc, row);
            count += 1;
        }
        Ok((acc, count))
    }

    /// Run a template and write its result set to `target`.
    pub async fn execute(
        &mut self,
        template: &QueryTemplate,
        target: &Path,
        processor: RowProcessor,
        extractor: Option<ConceptExtractor<'_>>,
    ) -> Result<usize> {
        let (value, count) = self.collect(template, None, processor, extractor).await?;
        write_json(target, &value).await?;
        debug!(target = %target.display(), records = count, "Report written");
        Ok(count)
    }

    /// Row count of the Achilles results table.
    pub async fn count_results(&mut self) -> Result<i64> {
        self.require_table(ACHILLES_RESULTS_TABLE).await?;

        let sql = format!(
            "SELECT COUNT(*) AS count FROM {}.{}",
            self.data_source.result_schema(),
            ACHILLES_RESULTS_TABLE
        );
        let mut rows = self.conn.fetch(&sql);
        let count = match rows.try_next().await? {
            Some(row) => row.get("COUNT").and_then(value_as_i64).unwrap_or(0),
            None => 0,
        };
        Ok(count)
    }
}
