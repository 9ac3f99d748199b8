// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Report pull tests: the full catalog against a scripted connector.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use uuid::Uuid;

use common::{HEEL_TABLE, data_source, results_connector, row};
use datanode_achilles::query::MockConnector;
use datanode_achilles::reports::{catalog, run_report_tasks};

const DRUG_ERA_TREEMAP: &str = "WHERE analysis_id = 900) ar1";

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_pull_runs_every_task_once() {
    let tmp = tempfile::TempDir::new().unwrap();
    let connector = results_connector(10);

    let summary = run_report_tasks(
        Arc::new(connector.clone()),
        &data_source(1),
        tmp.path(),
        catalog(),
    )
    .await
    .unwrap();

    assert_eq!(summary.lines.len(), 13);
    assert_eq!(summary.failures, 0);
    assert_eq!(connector.connections(), 13);

    // Lines follow catalog order regardless of completion order.
    for (line, task) in summary.lines.iter().zip(catalog()) {
        assert!(
            line.starts_with(&format!("Task {} proceed 0 record(s) completed in ", task.name)),
            "{}",
            line
        );
    }

    for file in ["achillesheel.json", "person.json", "dashboard.json", "drug_treemap.json"] {
        assert!(tmp.path().join(file).exists(), "{} missing", file);
    }
}

#[tokio::test]
async fn test_pull_waits_for_slowest_task() {
    let tmp = tempfile::TempDir::new().unwrap();
    let slow = [
        HEEL_TABLE,
        DRUG_ERA_TREEMAP,
        "WHERE analysis_id = 200) ar1",
        "WHERE analysis_id = 1800) ar1",
    ];

    let mut connector = results_connector(10);
    let mut delays = Vec::new();
    for pattern in slow {
        let delay = Duration::from_millis(200 + (Uuid::new_v4().as_u128() % 300) as u64);
        connector = connector.with_delay(pattern, delay);
        delays.push(delay);
    }
    let slowest = delays.iter().max().copied().unwrap();
    let total: Duration = delays.iter().sum();

    let start = Instant::now();
    let summary = run_report_tasks(Arc::new(connector), &data_source(1), tmp.path(), catalog())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(summary.lines.len(), 13);
    assert!(elapsed >= slowest, "{:?} < {:?}", elapsed, slowest);
    // Tasks overlap instead of running back to back.
    assert!(elapsed < total, "{:?} >= {:?}", elapsed, total);
    assert!(tmp.path().join("visit_treemap.json").exists());
}

#[tokio::test]
async fn test_treemap_writes_concept_reports() {
    let tmp = tempfile::TempDir::new().unwrap();
    let connector = results_connector(10).with_rows(
        DRUG_ERA_TREEMAP,
        vec![
            row(json!({
                "CONCEPT_ID": 1118084,
                "CONCEPT_PATH": "Drug||RxNorm||celecoxib",
                "NUM_PERSONS": 12
            })),
            row(json!({
                "CONCEPT_ID": 1124300,
                "CONCEPT_PATH": "Drug||RxNorm||diclofenac",
                "NUM_PERSONS": 7
            })),
        ],
    );

    let summary = run_report_tasks(Arc::new(connector), &data_source(1), tmp.path(), catalog())
        .await
        .unwrap();

    let drug_era = &summary.lines[1];
    assert!(drug_era.starts_with("Task DrugEra proceed 2 record(s)"), "{}", drug_era);

    let treemap = read_json(&tmp.path().join("drugera_treemap.json"));
    assert_eq!(treemap["CONCEPT_ID"], json!([1118084, 1124300]));
    assert_eq!(treemap["NUM_PERSONS"], json!([12, 7]));

    for concept in [1118084, 1124300] {
        let path = tmp.path().join("drugeras").join(format!("concept_{}.json", concept));
        assert!(read_json(&path).is_object(), "{}", path.display());
    }
}

#[tokio::test]
async fn test_missing_results_tables_complete_with_zero_records() {
    let tmp = tempfile::TempDir::new().unwrap();

    let summary = run_report_tasks(
        Arc::new(MockConnector::new()),
        &data_source(1),
        tmp.path(),
        catalog(),
    )
    .await
    .unwrap();

    assert_eq!(summary.failures, 0);
    assert_eq!(summary.records, 0);
    assert!(summary.lines.iter().all(|l| l.contains("proceed 0 record(s)")));
    assert!(!tmp.path().join("person.json").exists());
}

#[tokio::test]
async fn test_failed_task_recorded_others_complete() {
    let tmp = tempfile::TempDir::new().unwrap();
    let connector = results_connector(10).with_failure(DRUG_ERA_TREEMAP);

    let summary = run_report_tasks(Arc::new(connector), &data_source(1), tmp.path(), catalog())
        .await
        .unwrap();

    assert_eq!(summary.failures, 1);
    assert!(summary.lines[1].starts_with("Task DrugEra failed after "));
    assert_eq!(
        summary
            .lines
            .iter()
            .filter(|l| l.contains(" proceed "))
            .count(),
        12
    );
    assert!(summary.log_text().contains("Task Visit proceed"));
}
