// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker runtime backed by the Docker Engine API.

use std::io::Read;

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::traits::*;

/// Container runtime talking to the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(runtime_error)?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

fn runtime_error(err: DockerError) -> RunnerError {
    RunnerError::Runtime(err.to_string())
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Split a raw log frame into lines.
fn frame_lines(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
    bytes
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
}

/// Extract the first regular file from a tar stream.
fn first_file_in_tar(archive: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(Some(content));
        }
    }
    Ok(None)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        info!(image = %image, "Pulling image");

        let credentials = auth.map(|auth| DockerCredentials {
            username: auth.username.clone(),
            password: auth.password.clone(),
            serveraddress: Some(auth.address.clone()),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            credentials,
        );

        while let Some(progress) = stream
            .try_next()
            .await
            .map_err(|e| RunnerError::PullFailed(e.to_string()))?
        {
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            volumes: Some(spec.volume_map()),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                network_mode: spec.network_mode.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(runtime_error)?;

        debug!(container_id = %response.id, "Container created");
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(runtime_error)
    }

    async fn follow_logs(
        &self,
        container_id: &str,
        sink: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let options = Some(LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        });
        let mut stream = self.docker.logs(container_id, options);

        while let Some(frame) = stream.next().await {
            let message = match frame.map_err(runtime_error)? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => message,
                LogOutput::StdIn { .. } => continue,
            };
            for line in frame_lines(&message) {
                if sink.send(line).is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let mut stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // The engine reports non-zero exits as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(runtime_error(e)),
            None => {
                let inspect = self
                    .docker
                    .inspect_container(container_id, None)
                    .await
                    .map_err(runtime_error)?;
                inspect
                    .state
                    .and_then(|state| state.exit_code)
                    .ok_or_else(|| {
                        RunnerError::Other("Wait stream closed without exit code".into())
                    })
            }
        }
    }

    async fn copy_file_from_container(
        &self,
        container_id: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>> {
        let options = Some(DownloadFromContainerOptions {
            path: path.to_string(),
        });
        let mut stream = self.docker.download_from_container(container_id, options);

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) if is_not_found(&e) => return Ok(None),
                Err(e) => return Err(runtime_error(e)),
            }
        }

        first_file_in_tar(&archive)
    }

    async fn remove_container(&self, container_id: &str, remove_volumes: bool) -> Result<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: remove_volumes,
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(runtime_error)
    }
}
