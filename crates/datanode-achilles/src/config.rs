// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for datanode-achilles.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::runner::RegistryAuth;
use crate::upload::{RetryPolicy, RetryStrategy};

/// Default Achilles image.
pub const DEFAULT_IMAGE_NAME: &str = "odysseusinc/achilles:latest";

/// Whether the datanode talks to the central system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionalMode {
    /// Results are uploaded to the central system.
    #[default]
    Network,
    /// No central system; pulled results stay local.
    Standalone,
}

impl FromStr for FunctionalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "standalone" => Ok(Self::Standalone),
            _ => Err(ConfigError::InvalidValue("DATANODE_MODE", s.to_string())),
        }
    }
}

/// Settings for Achilles runs, passed explicitly to the service.
#[derive(Debug, Clone)]
pub struct AchillesSettings {
    /// Image reference for the Achilles container.
    pub image_name: String,
    /// Registry credentials used for the image pull.
    pub registry_auth: Option<RegistryAuth>,
    /// Container network mode (runtime default when unset).
    pub network_mode: Option<String>,
    /// Bounded wait for the image pull.
    pub pull_timeout: Duration,
    /// Root directory for work directories and archives.
    pub tmp_dir: PathBuf,
    /// Host-side path that `tmp_dir` is visible under, when running in a container.
    pub tmp_location_on_host: Option<String>,
    /// Keep work directories and container volumes for post-mortem inspection.
    pub verbose: bool,
    /// Fail the whole pull when any report task fails.
    pub fail_on_task_error: bool,
    /// Network or standalone.
    pub mode: FunctionalMode,
    /// Retry policy for compress+send.
    pub retry: RetryPolicy,
    /// Maximum size of a single archive part.
    pub archive_split_size: Option<u64>,
    /// How often a running job refreshes its heartbeat.
    pub heartbeat_interval: Duration,
    /// Heartbeat age after which an `IN_PROGRESS` job counts as orphaned.
    ///
    /// Must be well above `heartbeat_interval`.
    pub heartbeat_timeout: Duration,
}

impl Default for AchillesSettings {
    fn default() -> Self {
        Self {
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            registry_auth: None,
            network_mode: None,
            pull_timeout: Duration::from_secs(300),
            tmp_dir: std::env::temp_dir(),
            tmp_location_on_host: None,
            verbose: false,
            fail_on_task_error: true,
            mode: FunctionalMode::Network,
            retry: RetryPolicy::default(),
            archive_split_size: None,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(120),
        }
    }
}

/// Optional HTTP proxy for the central client.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy URL (e.g. `http://proxy:3128`).
    pub url: String,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
}

/// Central system connection settings.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// Base URL of the central system.
    pub url: String,
    /// Datanode token sent with each request.
    pub token: Option<String>,
    /// Connect and read timeout.
    pub timeout: Duration,
    /// Optional proxy.
    pub proxy: Option<ProxyConfig>,
}

/// Datanode configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Job store URL (`sqlite:` or PostgreSQL).
    pub database_url: String,
    /// JSON file listing the data sources known to this datanode.
    pub data_sources_file: PathBuf,
    /// Central system settings (required in network mode).
    pub central: Option<CentralConfig>,
    /// Achilles run settings.
    pub achilles: AchillesSettings,
    /// Age after which leftover work directories are removed.
    pub cleanup_max_age: Duration,
}

fn env_opt(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(var) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var, raw.clone())),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env_opt("DATANODE_DATABASE_URL")
            .ok_or(ConfigError::MissingEnvVar("DATANODE_DATABASE_URL"))?;

        let data_sources_file = PathBuf::from(
            env_opt("DATANODE_DATA_SOURCES").unwrap_or_else(|| "datasources.json".to_string()),
        );

        let mode: FunctionalMode = env_parse("DATANODE_MODE", FunctionalMode::Network)?;

        let central = match (mode, env_opt("DATANODE_CENTRAL_URL")) {
            (_, Some(url)) => Some(CentralConfig {
                url,
                token: env_opt("DATANODE_CENTRAL_TOKEN"),
                timeout: Duration::from_secs(env_parse("DATANODE_HTTP_TIMEOUT_SECS", 60)?),
                proxy: env_opt("DATANODE_PROXY_URL").map(|url| ProxyConfig {
                    url,
                    username: env_opt("DATANODE_PROXY_USERNAME"),
                    password: env_opt("DATANODE_PROXY_PASSWORD"),
                }),
            }),
            (FunctionalMode::Network, None) => {
                return Err(ConfigError::MissingEnvVar("DATANODE_CENTRAL_URL"));
            }
            (FunctionalMode::Standalone, None) => None,
        };

        let registry_auth = env_opt("ACHILLES_REGISTRY_ADDRESS").map(|address| RegistryAuth {
            address,
            username: env_opt("ACHILLES_REGISTRY_USERNAME"),
            password: env_opt("ACHILLES_REGISTRY_PASSWORD"),
        });

        let strategy = match env_opt("ACHILLES_UPLOAD_RETRY_STRATEGY")
            .unwrap_or_else(|| "exponential".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "fixed" => RetryStrategy::Fixed,
            "exponential" => RetryStrategy::ExponentialBackoff,
            other => {
                return Err(ConfigError::InvalidValue(
                    "ACHILLES_UPLOAD_RETRY_STRATEGY",
                    other.to_string(),
                ));
            }
        };

        let retry = RetryPolicy::new(
            env_parse("ACHILLES_UPLOAD_MAX_ATTEMPTS", 3)?,
            Duration::from_millis(env_parse("ACHILLES_UPLOAD_RETRY_DELAY_MS", 1000)?),
            strategy,
        );
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "ACHILLES_UPLOAD_MAX_ATTEMPTS",
                "0".to_string(),
            ));
        }

        let heartbeat_interval =
            Duration::from_secs(env_parse("ACHILLES_HEARTBEAT_INTERVAL_SECS", 30)?);
        let heartbeat_timeout =
            Duration::from_secs(env_parse("ACHILLES_HEARTBEAT_TIMEOUT_SECS", 120)?);
        if heartbeat_interval.is_zero() || heartbeat_timeout <= heartbeat_interval {
            return Err(ConfigError::InvalidValue(
                "ACHILLES_HEARTBEAT_TIMEOUT_SECS",
                format!(
                    "{}s with a {}s interval",
                    heartbeat_timeout.as_secs(),
                    heartbeat_interval.as_secs()
                ),
            ));
        }

        let achilles = AchillesSettings {
            image_name: env_opt("ACHILLES_IMAGE_NAME")
                .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string()),
            registry_auth,
            network_mode: env_opt("ACHILLES_NETWORK_MODE"),
            pull_timeout: Duration::from_secs(env_parse("ACHILLES_PULL_TIMEOUT_SECS", 300)?),
            tmp_dir: env_opt("DATANODE_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            tmp_location_on_host: env_opt("TMP_LOCATION_ON_HOST"),
            verbose: env_bool("ACHILLES_VERBOSE", false),
            fail_on_task_error: env_bool("ACHILLES_FAIL_ON_TASK_ERROR", true),
            mode,
            retry,
            archive_split_size: match env_opt("ACHILLES_ARCHIVE_SPLIT_BYTES") {
                Some(raw) => Some(raw.parse().map_err(|_| {
                    ConfigError::InvalidValue("ACHILLES_ARCHIVE_SPLIT_BYTES", raw.clone())
                })?),
                None => None,
            },
            heartbeat_interval,
            heartbeat_timeout,
        };

        let cleanup_max_age =
            Duration::from_secs(env_parse("ACHILLES_CLEANUP_MAX_AGE_SECS", 24 * 3600)?);

        Ok(Self {
            database_url,
            data_sources_file,
            central,
            achilles,
            cleanup_max_age,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has a value that cannot be used.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
