// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Analytical data sources profiled by Achilles.
//!
//! Data sources are owned by another subsystem; this crate only reads them.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Database engines reachable through the PostgreSQL wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbmsType {
    /// PostgreSQL.
    Postgresql,
    /// Amazon Redshift.
    Redshift,
}

/// A connectable analytical database holding a CDM.
#[derive(Clone, Serialize, Deserialize)]
pub struct DataSource {
    /// Local identifier.
    pub id: i64,
    /// Display name (also the Achilles source name).
    pub name: String,
    /// JDBC-style connection string, e.g. `jdbc:postgresql://host:5432/db`.
    pub connection_string: String,
    /// Database user.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Schema holding the CDM tables.
    pub cdm_schema: String,
    /// Schema holding Achilles results (defaults to the CDM schema).
    #[serde(default)]
    pub result_schema: Option<String>,
    /// Identifier of this data source on the central system.
    #[serde(default)]
    pub central_id: Option<String>,
}

impl DataSource {
    /// Result schema, falling back to the CDM schema when unset.
    pub fn result_schema(&self) -> &str {
        match self.result_schema.as_deref() {
            Some(schema) if !schema.trim().is_empty() => schema,
            _ => &self.cdm_schema,
        }
    }

    /// Connection string with the `jdbc:` prefix removed.
    pub fn connection_url(&self) -> String {
        self.connection_string.replacen("jdbc:", "", 1)
    }

    /// Database URI with credentials inlined after the scheme separator.
    ///
    /// `jdbc:postgresql://host:5432/db` with `u`/`p` becomes
    /// `postgresql://u:p@host:5432/db`.
    pub fn db_uri(&self) -> String {
        let mut uri = self.connection_url();
        let creds = format!("{}:{}@", self.username, self.password);
        match uri.find("://") {
            Some(index) => uri.insert_str(index + 3, &creds),
            None => uri.insert_str(0, &creds),
        }
        uri
    }

    /// DBMS inferred from the connection string scheme.
    pub fn dbms_type(&self) -> Option<DbmsType> {
        let url = self.connection_url();
        let scheme = url.split("://").next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgresql" | "postgres" => Some(DbmsType::Postgresql),
            "redshift" => Some(DbmsType::Redshift),
            _ => None,
        }
    }

    /// Load every data source listed in a JSON file.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<DataSource>> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Find a data source by id in a JSON file.
    pub fn load(path: impl AsRef<Path>, id: i64) -> Result<DataSource> {
        Self::load_all(path)?
            .into_iter()
            .find(|ds| ds.id == id)
            .ok_or(Error::DataSourceNotFound(id))
    }
}

// Never print credentials.
impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id={})", self.name, self.id)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection_string", &self.connection_string)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("cdm_schema", &self.cdm_schema)
            .field("result_schema", &self.result_schema)
            .field("central_id", &self.central_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_source(conn: &str) -> DataSource {
        DataSource {
            id: 1,
            name: "synpuf".to_string(),
            connection_string: conn.to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            cdm_schema: "cdm".to_string(),
            result_schema: None,
            central_id: Some("42".to_string()),
        }
    }

    #[test]
    fn test_db_uri_inserts_credentials() {
        let ds = data_source("jdbc:postgresql://host:5432/db");
        assert_eq!(ds.db_uri(), "postgresql://u:p@host:5432/db");
    }

    #[test]
    fn test_db_uri_keeps_query_string() {
        let ds = data_source("jdbc:redshift://cluster:5439/dev?ssl=true");
        assert_eq!(ds.db_uri(), "redshift://u:p@cluster:5439/dev?ssl=true");
    }

    #[test]
    fn test_result_schema_defaults_to_cdm() {
        let mut ds = data_source("jdbc:postgresql://host/db");
        assert_eq!(ds.result_schema(), "cdm");

        ds.result_schema = Some(String::new());
        assert_eq!(ds.result_schema(), "cdm");

        ds.result_schema = Some("results".to_string());
        assert_eq!(ds.result_schema(), "results");
    }

    #[test]
    fn test_dbms_type() {
        assert_eq!(
            data_source("jdbc:postgresql://host/db").dbms_type(),
            Some(DbmsType::Postgresql)
        );
        assert_eq!(
            data_source("jdbc:redshift://host/db").dbms_type(),
            Some(DbmsType::Redshift)
        );
        assert_eq!(data_source("jdbc:oracle:thin:@host").dbms_type(), None);
    }

    #[test]
    fn test_display_hides_credentials() {
        let ds = data_source("jdbc:postgresql://host/db");
        let shown = ds.to_string();
        assert!(shown.contains("synpuf"));
        assert!(!shown.contains(":p@"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut ds = data_source("jdbc:postgresql://host/db");
        ds.password = "s3cret-pw".to_string();
        let shown = format!("{:?}", ds);
        assert!(shown.contains("synpuf"));
        assert!(shown.contains("[REDACTED]"));
        assert!(!shown.contains("s3cret-pw"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("datasources.json");
        std::fs::write(
            &path,
            r#"[{"id": 7, "name": "ds", "connection_string": "jdbc:postgresql://h/db",
                "username": "u", "password": "p", "cdm_schema": "cdm"}]"#,
        )
        .unwrap();

        let ds = DataSource::load(&path, 7).unwrap();
        assert_eq!(ds.name, "ds");
        assert!(ds.result_schema.is_none());
        assert!(matches!(
            DataSource::load(&path, 8),
            Err(Error::DataSourceNotFound(8))
        ));
    }
}
