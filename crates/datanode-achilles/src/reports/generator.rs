// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executes one report task against an open session.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use super::catalog::{CONCEPT_ID, ReportTask, Section, TaskKind};
use crate::query::executor::write_json;
use crate::query::{ConceptExtractor, ReportSession, Result, RowProcessor};

/// Run `task`, writing its output under `out_dir`. Returns the record count.
pub async fn run_task(
    task: &ReportTask,
    session: &mut ReportSession,
    out_dir: &Path,
) -> Result<usize> {
    session.require_table(task.prerequisite).await?;

    match task.kind {
        TaskKind::Query { file, section } => {
            session
                .execute(&section.query, &out_dir.join(file), section.processor, None)
                .await
        }
        TaskKind::Report { file, sections } => {
            let (document, records) = collect_sections(session, sections, None).await?;
            write_json(&out_dir.join(file), &document).await?;
            Ok(records)
        }
        TaskKind::Treemap {
            file,
            treemap,
            subdir,
            sections,
        } => {
            let mut concepts = Vec::new();
            let mut records = session
                .execute(
                    &treemap,
                    &out_dir.join(file),
                    RowProcessor::Columnar,
                    Some(ConceptExtractor {
                        column: CONCEPT_ID,
                        sink: &mut concepts,
                    }),
                )
                .await?;
            debug!(task = task.name, concepts = concepts.len(), "Treemap collected");

            let concept_dir = out_dir.join(subdir);
            tokio::fs::create_dir_all(&concept_dir).await?;
            for concept_id in concepts {
                let (document, count) =
                    collect_sections(session, sections, Some(concept_id)).await?;
                write_json(&concept_dir.join(format!("concept_{}.json", concept_id)), &document)
                    .await?;
                records += count;
            }
            Ok(records)
        }
    }
}

async fn collect_sections(
    session: &mut ReportSession,
    sections: &[Section],
    concept_id: Option<i64>,
) -> Result<(Value, usize)> {
    let mut document = Map::new();
    let mut records = 0;
    for section in sections {
        let (value, count) = session
            .collect(&section.query, concept_id, section.processor, None)
            .await?;
        document.insert(section.key.to_string(), value);
        records += count;
    }
    Ok((Value::Object(document), records))
}
