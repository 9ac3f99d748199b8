// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-protocol connector (PostgreSQL and Redshift).

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Column, Row as _, TypeInfo};
use tracing::debug;

use super::{Connection, Connector, QueryError, Result, Row};
use crate::datasource::DataSource;

/// Connector for data sources speaking the PostgreSQL wire protocol.
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }

    fn connect_options(data_source: &DataSource) -> Result<PgConnectOptions> {
        if data_source.dbms_type().is_none() {
            return Err(QueryError::UnsupportedDbms(data_source.connection_url()));
        }

        // Redshift speaks the PostgreSQL protocol under its own scheme.
        let url = data_source.connection_url();
        let url = match url.split_once("://") {
            Some((_, rest)) => format!("postgres://{}", rest),
            None => url,
        };

        Ok(PgConnectOptions::from_str(&url)?
            .username(&data_source.username)
            .password(&data_source.password))
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, data_source: &DataSource) -> Result<Box<dyn Connection>> {
        let options = Self::connect_options(data_source)?;
        let conn = options.connect().await?;
        debug!(data_source = %data_source, "Connected to data source");
        Ok(Box::new(PgReportConnection { conn }))
    }
}

struct PgReportConnection {
    conn: PgConnection,
}

#[async_trait]
impl Connection for PgReportConnection {
    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE LOWER(table_schema) = LOWER($1) AND LOWER(table_name) = LOWER($2)
            )
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_one(&mut self.conn)
        .await?;

        Ok(exists)
    }

    fn fetch<'a>(&'a mut self, sql: &'a str) -> BoxStream<'a, Result<Row>> {
        sqlx::query(sql)
            .fetch(&mut self.conn)
            .map(|row| row.map_err(QueryError::from).and_then(|row| row_to_json(&row)))
            .boxed()
    }
}

/// Convert a row to a JSON object keyed by upper-cased column name.
fn row_to_json(row: &PgRow) -> Result<Row> {
    let mut object = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
            "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|v| Value::from(v as f64)),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
            "NUMERIC" => row.try_get::<Option<Decimal>, _>(index)?.map(decimal_to_json),
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)?
                .map(|v| Value::from(v.to_string())),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|v| Value::from(v.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|v| Value::from(v.to_rfc3339())),
            other => match row.try_get::<Option<String>, _>(index) {
                Ok(v) => v.map(Value::from),
                Err(_) => {
                    debug!(
                        column = %column.name(),
                        type_name = %other,
                        "Unsupported column type, using null"
                    );
                    None
                }
            },
        };
        object.insert(
            column.name().to_ascii_uppercase(),
            value.unwrap_or(Value::Null),
        );
    }
    Ok(object)
}

/// Whole decimals become JSON integers, the rest JSON floats.
fn decimal_to_json(value: Decimal) -> Value {
    if value.fract().is_zero()
        && let Some(whole) = value.to_i64()
    {
        return Value::from(whole);
    }
    value.to_f64().map(Value::from).unwrap_or(Value::Null)
}
