// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runner for Achilles.
//!
//! - `traits` - the [`ContainerRuntime`] seam and shared types
//! - `docker` - Docker Engine backend
//! - `mock` - scripted backend for tests
//! - `achilles` - run sequencing, environment and bind path construction

pub mod achilles;
pub mod docker;
pub mod mock;
pub mod traits;

pub use achilles::{
    ContainerRun, ContainerRunner, ERROR_REPORT_MISSING, ERROR_REPORT_PATH, OUTPUT_VOLUME,
    achilles_container_spec, achilles_env, host_bind_path, locate_results_dir, strip_nul,
};
pub use docker::DockerRuntime;
pub use mock::{MockCall, MockRuntime};
pub use traits::{ContainerRuntime, ContainerSpec, RegistryAuth, RunnerError};
