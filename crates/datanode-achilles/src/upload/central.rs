// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Central system client.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::UploadError;
use crate::config::CentralConfig;

/// Header carrying the datanode token.
pub const AUTH_TOKEN_HEADER: &str = "Arachne-Auth-Token";

/// Content type the central system expects for result archives.
pub const PAYLOAD_CONTENT_TYPE: &str = "text/plain";

/// A file sent to the central system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    /// File name presented to the central system.
    pub file_name: String,
    /// MIME type of the part.
    pub content_type: String,
    /// File content.
    pub bytes: Vec<u8>,
}

impl FilePayload {
    /// Wrap archive bytes with the default content type.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: PAYLOAD_CONTENT_TYPE.to_string(),
            bytes,
        }
    }
}

/// Achilles report known to the central system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDescriptor {
    /// Report identifier.
    pub id: i64,
    /// Internal name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Position in the report list.
    #[serde(default)]
    pub sort_order: Option<i32>,
}

/// Network collaborator receiving Achilles results.
#[async_trait]
pub trait CentralClient: Send + Sync {
    /// Send one result file for the data source registered as `central_id`.
    async fn send_results(&self, central_id: &str, payload: FilePayload)
    -> Result<(), UploadError>;

    /// Reports the central system can display.
    async fn list_reports(&self) -> Result<Vec<ReportDescriptor>, UploadError>;
}

fn transport(err: reqwest::Error) -> UploadError {
    UploadError::Transport(err.to_string())
}

/// reqwest-backed [`CentralClient`].
#[derive(Debug, Clone)]
pub struct HttpCentralClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCentralClient {
    /// Build a client with the configured timeouts and proxy.
    pub fn new(config: &CentralConfig) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout);

        if let Some(proxy) = &config.proxy {
            let mut p = reqwest::Proxy::all(&proxy.url).map_err(transport)?;
            if let Some(username) = &proxy.username {
                p = p.basic_auth(username, proxy.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(p);
        }

        Ok(Self {
            client: builder.build().map_err(transport)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTH_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(UploadError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl CentralClient for HttpCentralClient {
    async fn send_results(
        &self,
        central_id: &str,
        payload: FilePayload,
    ) -> Result<(), UploadError> {
        let url = format!(
            "{}/api/v1/achilles/datanode/datasource/{}",
            self.base_url, central_id
        );
        let size = payload.bytes.len();
        let part = Part::bytes(payload.bytes)
            .file_name(payload.file_name.clone())
            .mime_str(&payload.content_type)
            .map_err(transport)?;
        let form = Form::new().part("file", part);

        let response = self
            .authorized(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;

        debug!(url = %url, file = %payload.file_name, size, "Results sent");
        Ok(())
    }

    async fn list_reports(&self) -> Result<Vec<ReportDescriptor>, UploadError> {
        let url = format!("{}/api/v1/achilles/reports", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(transport)?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str, token: Option<&str>) -> CentralConfig {
        CentralConfig {
            url: url.to_string(),
            token: token.map(str::to_string),
            timeout: Duration::from_secs(5),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn test_send_results_posts_multipart() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/achilles/datanode/datasource/42"))
            .and(header(AUTH_TOKEN_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpCentralClient::new(&config(&mock_server.uri(), Some("secret"))).unwrap();
        client
            .send_results("42", FilePayload::new("achilles_1", b"PK".to_vec()))
            .await
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains(r#"name="file""#));
        assert!(body.contains(r#"filename="achilles_1""#));
        assert!(body.contains("Content-Type: text/plain"));
    }

    #[tokio::test]
    async fn test_send_results_maps_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = HttpCentralClient::new(&config(&mock_server.uri(), None)).unwrap();
        let err = client
            .send_results("42", FilePayload::new("a", vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Status(503)));
    }

    #[tokio::test]
    async fn test_list_reports() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/achilles/reports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "name": "dashboard", "label": "Dashboard", "sortOrder": 1},
                {"id": 2, "name": "person", "label": "Person"}
            ])))
            .mount(&mock_server)
            .await;

        let base_url = format!("{}/", mock_server.uri());
        let client = HttpCentralClient::new(&config(&base_url, None)).unwrap();
        let reports = client.list_reports().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].sort_order, Some(1));
        assert_eq!(reports[1].label, "Person");
        assert_eq!(reports[1].sort_order, None);
    }
}
