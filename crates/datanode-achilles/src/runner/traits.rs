// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface the Achilles runner drives. Runtimes are
//! pure execution engines; they never touch the job store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from container runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Image was not present locally within the bounded wait.
    #[error("Image pull timed out after {0:?}")]
    PullTimeout(Duration),

    /// Image pull was rejected by the registry or runtime.
    #[error("Image pull failed: {0}")]
    PullFailed(String),

    /// Container runtime API call failed.
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// Container process exited with a non-zero code.
    #[error("Achilles exited with code {exit_code}, results lost")]
    NonZeroExit {
        /// Exit code of the container process.
        exit_code: i64,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Registry credentials for the image pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    /// Registry server address.
    pub address: String,
    /// Registry username.
    pub username: Option<String>,
    /// Registry password.
    pub password: Option<String>,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Environment as `NAME=value` entries.
    pub env: Vec<String>,
    /// Bind mounts as `host:container` entries.
    pub binds: Vec<String>,
    /// Container paths declared as volumes.
    pub volumes: Vec<String>,
    /// Network mode, runtime default when `None`.
    pub network_mode: Option<String>,
}

impl ContainerSpec {
    /// Volumes in the shape container runtimes expect.
    pub fn volume_map(&self) -> HashMap<String, HashMap<(), ()>> {
        self.volumes
            .iter()
            .map(|v| (v.clone(), HashMap::new()))
            .collect()
    }
}

/// Container runtime used to execute Achilles.
///
/// Implementations map one-to-one onto container engine calls; sequencing,
/// timeouts and log buffering live in [`ContainerRunner`](super::ContainerRunner).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime identifier (e.g. "docker", "mock").
    fn runtime_type(&self) -> &'static str;

    /// Pull an image, returning once it is present locally.
    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Follow stdout and stderr, sending one entry per line until the stream ends.
    async fn follow_logs(&self, container_id: &str, sink: mpsc::UnboundedSender<String>)
    -> Result<()>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    /// Read a single file out of the container filesystem.
    ///
    /// Returns `None` when the file does not exist.
    async fn copy_file_from_container(&self, container_id: &str, path: &str)
    -> Result<Option<Vec<u8>>>;

    /// Remove the container, optionally with its anonymous volumes.
    async fn remove_container(&self, container_id: &str, remove_volumes: bool) -> Result<()>;
}
