// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Datanode Achilles - Data Profiling Job Orchestration
//!
//! This crate runs the Achilles profiling tool against a local CDM database
//! inside a container, pulls the resulting reports from the database and
//! ships them to the central system.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        AchillesService (service)                        │
//! │        admission check · status transitions · recovery sweep            │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │                     │                      │                │
//!        │ GENERATION          │ IMPORT               │ upload         │ jobs
//!        ▼                     ▼                      ▼                ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────┐  ┌────────────┐
//! │    runner    │   │     reports      │   │     upload     │  │    jobs    │
//! │ (bollard /   │   │ 13 tasks fanned  │   │ zip + split,   │  │ PostgreSQL │
//! │  mock)       │   │ out on a JoinSet │   │ retry, HTTP    │  │ / SQLite   │
//! └──────────────┘   └──────────────────┘   └────────────────┘  └────────────┘
//!        │                     │                      │
//!        ▼                     ▼                      ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────┐
//! │   Achilles   │   │      query       │   │ Central system │
//! │  container   │──►│  CDM database    │   │                │
//! └──────────────┘   └──────────────────┘   └────────────────┘
//! ```
//!
//! # Job Status State Machine
//!
//! ```text
//!      admission check
//!            │
//!            ▼
//!     ┌─────────────┐
//!     │ IN_PROGRESS │──────────────┐
//!     └──────┬──────┘              │
//!            │ success             │ error / stale heartbeat
//!            ▼                     ▼
//!     ┌────────────┐          ┌────────┐
//!     │ SUCCESSFUL │          │ FAILED │
//!     └────────────┘          └────────┘
//! ```
//!
//! At most one job per data source and workflow kind is `IN_PROGRESS`, and
//! a terminal status is written once. Running jobs refresh a heartbeat; the
//! recovery sweep fails only jobs whose heartbeat is older than the timeout.
//! A successful GENERATION whose results table has rows starts an IMPORT.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `DATANODE_DATABASE_URL` | Yes | - | Job store (`sqlite:` or PostgreSQL) |
//! | `DATANODE_DATA_SOURCES` | No | `datasources.json` | Data source list |
//! | `DATANODE_MODE` | No | `network` | `network` or `standalone` |
//! | `DATANODE_CENTRAL_URL` | Network mode | - | Central system base URL |
//! | `ACHILLES_IMAGE_NAME` | No | `odysseusinc/achilles:latest` | Achilles image |
//! | `ACHILLES_VERBOSE` | No | `false` | Keep work directories and volumes |
//! | `ACHILLES_HEARTBEAT_INTERVAL_SECS` | No | `30` | Running job heartbeat period |
//! | `ACHILLES_HEARTBEAT_TIMEOUT_SECS` | No | `120` | Heartbeat age that marks a job orphaned |
//!
//! See [`config`] for the full list.

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Analytical data sources profiled by Achilles.
pub mod datasource;

/// Error types.
pub mod error;

/// Job records and job store backends.
pub mod jobs;

/// Container runtime abstraction and the Achilles container runner.
pub mod runner;

/// Report query execution against the data source.
pub mod query;

/// Report catalog and concurrent report pull.
pub mod reports;

/// Archive, retry and central system delivery.
pub mod upload;

/// Job orchestration.
pub mod service;

/// Per-run temporary directories.
pub mod work_dir;

/// Background worker for cleaning up stale work directories and archives.
pub mod cleanup_worker;

pub use config::{AchillesSettings, Config, FunctionalMode};
pub use datasource::DataSource;
pub use error::{Error, Result};
pub use jobs::{Job, JobSource, JobStatus, JobStore};
pub use service::{AchillesService, JobHandle};
