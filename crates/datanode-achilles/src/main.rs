// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Datanode Achilles
//!
//! Usage:
//!   datanode-achilles <command> [options]
//!
//! Commands:
//!   generate <data_source_id>     Run Achilles, then import its results
//!   pull <data_source_id>         Pull and upload existing results
//!   check <data_source_id>        Check whether results are available
//!   jobs <data_source_id>         List Achilles jobs
//!   reports                       List reports known to the central system

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{info, warn};

use datanode_achilles::cleanup_worker::{CleanupWorker, CleanupWorkerConfig};
use datanode_achilles::jobs::{JobStore, PostgresJobStore, SqliteJobStore};
use datanode_achilles::query::PgConnector;
use datanode_achilles::runner::DockerRuntime;
use datanode_achilles::upload::HttpCentralClient;
use datanode_achilles::{AchillesService, Config, DataSource, JobStatus};

fn print_usage() {
    eprintln!(
        r#"Usage: datanode-achilles <command> [options]

Run Achilles against datanode data sources.

COMMANDS:
    generate <data_source_id>       Run Achilles, then import its results
    pull <data_source_id>           Pull and upload existing Achilles results
    check <data_source_id>          Check whether Achilles results are available
    jobs <data_source_id>           List Achilles jobs for a data source
    reports                         List reports known to the central system

ENVIRONMENT:
    DATANODE_DATABASE_URL           Job store URL (required)
    DATANODE_DATA_SOURCES           Data source list (default: datasources.json)
    DATANODE_MODE                   network or standalone (default: network)
    DATANODE_CENTRAL_URL            Central system URL (required in network mode)
    RUST_LOG                        Log filter (default: datanode_achilles=info)

EXAMPLES:
    # Profile data source 1 and upload the reports
    datanode-achilles generate 1

    # Re-upload reports from an earlier run
    datanode-achilles pull 1
"#
    );
}

#[derive(Debug)]
enum Command {
    Generate { data_source_id: i64 },
    Pull { data_source_id: i64 },
    Check { data_source_id: i64 },
    Jobs { data_source_id: i64 },
    Reports,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn data_source_arg(args: &[String]) -> Result<i64, String> {
    args.get(2)
        .ok_or("Data source ID required")?
        .parse()
        .map_err(|_| "Invalid data source ID".to_string())
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "generate" => Ok(Command::Generate {
            data_source_id: data_source_arg(args)?,
        }),
        "pull" => Ok(Command::Pull {
            data_source_id: data_source_arg(args)?,
        }),
        "check" => Ok(Command::Check {
            data_source_id: data_source_arg(args)?,
        }),
        "jobs" => Ok(Command::Jobs {
            data_source_id: data_source_arg(args)?,
        }),
        "reports" => Ok(Command::Reports),
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

async fn connect_store(database_url: &str) -> datanode_achilles::Result<Arc<dyn JobStore>> {
    if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteJobStore::connect(database_url, 5).await?))
    } else {
        Ok(Arc::new(PostgresJobStore::connect(database_url).await?))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datanode_achilles=info".into()),
        )
        .init();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    match run(cmd).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cmd: Command) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;

    info!(
        mode = ?config.achilles.mode,
        image = %config.achilles.image_name,
        tmp_dir = %config.achilles.tmp_dir.display(),
        "Starting datanode Achilles"
    );

    let store = connect_store(&config.database_url).await?;
    info!("Job store ready");

    let mut builder = AchillesService::builder()
        .store(store.clone())
        .runtime(Arc::new(DockerRuntime::connect()?))
        .connector(Arc::new(PgConnector))
        .settings(config.achilles.clone());
    if let Some(central) = &config.central {
        builder = builder.central(Arc::new(HttpCentralClient::new(central)?));
    }
    let service = builder.build()?;

    // Only jobs whose heartbeat went stale; live runs of other processes stay.
    service.recover_orphaned_jobs().await?;

    // Verbose runs keep their directories for inspection.
    let cleanup = (!config.achilles.verbose).then(|| {
        let worker = CleanupWorker::new(
            CleanupWorkerConfig {
                tmp_dir: config.achilles.tmp_dir.clone(),
                max_age: config.cleanup_max_age,
                ..CleanupWorkerConfig::default()
            },
            store.clone(),
        );
        let shutdown = worker.shutdown_handle();
        (tokio::spawn(async move { worker.run().await }), shutdown)
    });

    let code = execute_command(&service, &config, cmd).await;

    if let Some((handle, shutdown)) = cleanup {
        shutdown.notify_one();
        if let Err(e) = handle.await {
            warn!("Cleanup worker task panicked: {}", e);
        }
    }
    code
}

async fn execute_command(
    service: &AchillesService,
    config: &Config,
    cmd: Command,
) -> anyhow::Result<ExitCode> {
    match cmd {
        Command::Generate { data_source_id } => {
            let data_source = DataSource::load(&config.data_sources_file, data_source_id)?;
            let handle = service.execute_achilles(&data_source).await?;
            println!("Started Achilles job {}", handle.job().id);
            let status = handle.wait().await?;
            println!("Achilles job finished: {}", status);
            Ok(exit_code(status))
        }

        Command::Pull { data_source_id } => {
            let data_source = DataSource::load(&config.data_sources_file, data_source_id)?;
            let Some(job) = service.create_import_job(&data_source).await? else {
                eprintln!("Achilles results are not available for {}", data_source);
                return Ok(ExitCode::FAILURE);
            };
            println!("Started Achilles import job {}", job.id);
            let status = service.pull_achilles_data(job, &data_source).wait().await?;
            println!("Achilles import finished: {}", status);
            Ok(exit_code(status))
        }

        Command::Check { data_source_id } => {
            let data_source = DataSource::load(&config.data_sources_file, data_source_id)?;
            let available = service.has_achilles_result_table(&data_source).await;
            println!("{}", available);
            Ok(ExitCode::SUCCESS)
        }

        Command::Jobs { data_source_id } => {
            let data_source = DataSource::load(&config.data_sources_file, data_source_id)?;
            for job in service.jobs(&data_source).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    job.id,
                    job.source,
                    job.status,
                    job.started.to_rfc3339(),
                    job.finished
                        .map(|f| f.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Reports => {
            let reports = service.get_achilles_reports().await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(status: JobStatus) -> ExitCode {
    match status {
        JobStatus::Successful => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_data_source_commands() {
        assert!(matches!(
            parse_args_from_vec(&args(&["datanode-achilles", "generate", "7"])),
            Ok(Command::Generate { data_source_id: 7 })
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["datanode-achilles", "pull", "3"])),
            Ok(Command::Pull { data_source_id: 3 })
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["datanode-achilles", "reports"])),
            Ok(Command::Reports)
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args_from_vec(&args(&["datanode-achilles"])).is_err());
        assert!(parse_args_from_vec(&args(&["datanode-achilles", "check"])).is_err());
        assert!(parse_args_from_vec(&args(&["datanode-achilles", "jobs", "abc"])).is_err());
        assert!(parse_args_from_vec(&args(&["datanode-achilles", "explode"])).is_err());
    }
}
