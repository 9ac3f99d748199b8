// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The fixed catalog of Achilles report tasks.
//!
//! Every clinical domain is described as data: which templates to run, with
//! which analysis ids, and where the output lands. One generic generator
//! executes all of them.

use crate::query::{QueryTemplate, RowProcessor};

const TREEMAP: &str = include_str!("../../sql/common/treemap.sql");
const PREVALENCE_BY_GENDER_AGE_YEAR: &str =
    include_str!("../../sql/common/prevalence_by_gender_age_year.sql");
const PREVALENCE_BY_MONTH: &str = include_str!("../../sql/common/prevalence_by_month.sql");
const BY_TYPE: &str = include_str!("../../sql/common/by_type.sql");
const DIST_BY_CATEGORY: &str = include_str!("../../sql/common/dist_by_category.sql");
const DIST: &str = include_str!("../../sql/common/dist.sql");
const CONCEPT_COUNTS: &str = include_str!("../../sql/common/concept_counts.sql");
const POPULATION: &str = include_str!("../../sql/common/population.sql");
const HISTOGRAM: &str = include_str!("../../sql/common/histogram.sql");
const ACHILLES_HEEL: &str = include_str!("../../sql/heel/achilles_heel.sql");
const YEAR_OF_BIRTH_STATS: &str = include_str!("../../sql/person/year_of_birth_stats.sql");
const DEATH_BY_GENDER_AGE_YEAR: &str =
    include_str!("../../sql/death/prevalence_by_gender_age_year.sql");
const DEATH_BY_MONTH: &str = include_str!("../../sql/death/prevalence_by_month.sql");
const DEATH_BY_TYPE: &str = include_str!("../../sql/death/death_by_type.sql");
const AGE_AT_DEATH: &str = include_str!("../../sql/death/age_at_death.sql");
const CUMULATIVE_DURATION: &str = include_str!("../../sql/dashboard/cumulative_duration.sql");
const OBSERVED_BY_MONTH: &str = include_str!("../../sql/dashboard/observed_by_month.sql");
const TOTAL_RECORDS: &str = include_str!("../../sql/datadensity/total_records.sql");
const RECORDS_PER_PERSON: &str = include_str!("../../sql/datadensity/records_per_person.sql");
const CONCEPTS_PER_PERSON: &str = include_str!("../../sql/datadensity/concepts_per_person.sql");

/// Column harvested from treemap results.
pub const CONCEPT_ID: &str = "CONCEPT_ID";

/// Table every task except Heel needs.
pub const RESULTS_TABLE: &str = "achilles_results";

/// Table the Heel task needs.
pub const HEEL_RESULTS_TABLE: &str = "achilles_heel_results";

/// One named query inside a combined report document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Key of the section in the output document.
    pub key: &'static str,
    /// Query producing the section.
    pub query: QueryTemplate,
    /// Result set shape.
    pub processor: RowProcessor,
}

impl Section {
    const fn new(key: &'static str, query: QueryTemplate) -> Self {
        Self {
            key,
            query,
            processor: RowProcessor::Columnar,
        }
    }
}

/// What a report task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// One query written as-is to `file`.
    Query {
        /// Output file name.
        file: &'static str,
        /// The query.
        section: Section,
    },
    /// Several queries combined into one document at `file`.
    Report {
        /// Output file name.
        file: &'static str,
        /// Sections of the document.
        sections: &'static [Section],
    },
    /// A treemap query whose concepts each get their own document in `subdir`.
    Treemap {
        /// Output file name of the treemap itself.
        file: &'static str,
        /// The treemap query; must return a `CONCEPT_ID` column.
        treemap: QueryTemplate,
        /// Directory holding one `concept_<id>.json` per concept.
        subdir: &'static str,
        /// Sections of each per-concept document.
        sections: &'static [Section],
    },
}

/// A named, independent unit of report work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportTask {
    /// Task name used in summary lines.
    pub name: &'static str,
    /// Table that must exist in the results schema.
    pub prerequisite: &'static str,
    /// Output shape.
    pub kind: TaskKind,
}

impl ReportTask {
    /// Relative paths this task writes at top level.
    pub fn output_name(&self) -> &'static str {
        match self.kind {
            TaskKind::Query { file, .. } | TaskKind::Report { file, .. } => file,
            TaskKind::Treemap { subdir, .. } => subdir,
        }
    }
}

macro_rules! template {
    ($sql:expr) => {
        QueryTemplate::new($sql)
    };
    ($sql:expr, $($name:literal = $value:expr),+) => {
        QueryTemplate::with_params($sql, &[$(($name, $value)),+])
    };
}

macro_rules! treemap {
    ($persons:literal, $records:literal) => {
        template!(TREEMAP, "person_analysis_id" = $persons, "record_analysis_id" = $records)
    };
}

const CONDITION_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 404),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 402)),
    Section::new("CONDITIONS_BY_TYPE", template!(BY_TYPE, "analysis_id" = 405)),
    Section::new("AGE_AT_FIRST_DIAGNOSIS", template!(DIST_BY_CATEGORY, "analysis_id" = 406)),
];

const CONDITION_ERA_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 1004),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 1002)),
    Section::new("AGE_AT_FIRST_DIAGNOSIS", template!(DIST_BY_CATEGORY, "analysis_id" = 1006)),
    Section::new("LENGTH_OF_ERA", template!(DIST, "analysis_id" = 1007)),
];

const DRUG_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 704),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 702)),
    Section::new("DRUGS_BY_TYPE", template!(BY_TYPE, "analysis_id" = 705)),
    Section::new("AGE_AT_FIRST_EXPOSURE", template!(DIST_BY_CATEGORY, "analysis_id" = 706)),
    Section::new("DAYS_SUPPLY_DISTRIBUTION", template!(DIST, "analysis_id" = 715)),
    Section::new("REFILLS_DISTRIBUTION", template!(DIST, "analysis_id" = 716)),
    Section::new("QUANTITY_DISTRIBUTION", template!(DIST, "analysis_id" = 717)),
];

const DRUG_ERA_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 904),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 902)),
    Section::new("AGE_AT_FIRST_EXPOSURE", template!(DIST_BY_CATEGORY, "analysis_id" = 906)),
    Section::new("LENGTH_OF_ERA", template!(DIST, "analysis_id" = 907)),
];

const PROCEDURE_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 604),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 602)),
    Section::new("PROCEDURES_BY_TYPE", template!(BY_TYPE, "analysis_id" = 605)),
    Section::new("AGE_AT_FIRST_OCCURRENCE", template!(DIST_BY_CATEGORY, "analysis_id" = 606)),
];

const MEASUREMENT_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 1804),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 1802)),
    Section::new("MEASUREMENTS_BY_TYPE", template!(BY_TYPE, "analysis_id" = 1805)),
    Section::new("AGE_AT_FIRST_OCCURRENCE", template!(DIST_BY_CATEGORY, "analysis_id" = 1806)),
    Section::new(
        "MEASUREMENT_VALUE_DISTRIBUTION",
        template!(DIST_BY_CATEGORY, "analysis_id" = 1815),
    ),
];

const OBSERVATION_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 804),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 802)),
    Section::new("OBSERVATIONS_BY_TYPE", template!(BY_TYPE, "analysis_id" = 805)),
    Section::new("AGE_AT_FIRST_OCCURRENCE", template!(DIST_BY_CATEGORY, "analysis_id" = 806)),
];

const VISIT_SECTIONS: &[Section] = &[
    Section::new(
        "PREVALENCE_BY_GENDER_AGE_YEAR",
        template!(PREVALENCE_BY_GENDER_AGE_YEAR, "analysis_id" = 204),
    ),
    Section::new("PREVALENCE_BY_MONTH", template!(PREVALENCE_BY_MONTH, "analysis_id" = 202)),
    Section::new("AGE_AT_FIRST_OCCURRENCE", template!(DIST_BY_CATEGORY, "analysis_id" = 206)),
    Section::new("VISIT_DURATION", template!(DIST, "analysis_id" = 211)),
];

const PERSON_SECTIONS: &[Section] = &[
    Section::new("SUMMARY", template!(POPULATION)),
    Section::new("GENDER_DATA", template!(CONCEPT_COUNTS, "analysis_id" = 2)),
    Section::new("RACE_DATA", template!(CONCEPT_COUNTS, "analysis_id" = 4)),
    Section::new("ETHNICITY_DATA", template!(CONCEPT_COUNTS, "analysis_id" = 5)),
    Section::new("BIRTH_YEAR_STATS", template!(YEAR_OF_BIRTH_STATS)),
    Section::new("BIRTH_YEAR_DATA", template!(HISTOGRAM, "analysis_id" = 3)),
];

const DEATH_SECTIONS: &[Section] = &[
    Section::new("PREVALENCE_BY_GENDER_AGE_YEAR", template!(DEATH_BY_GENDER_AGE_YEAR)),
    Section::new("PREVALENCE_BY_MONTH", template!(DEATH_BY_MONTH)),
    Section::new("DEATH_BY_TYPE", template!(DEATH_BY_TYPE)),
    Section::new("AGE_AT_DEATH", template!(AGE_AT_DEATH)),
];

const DASHBOARD_SECTIONS: &[Section] = &[
    Section::new("SUMMARY", template!(POPULATION)),
    Section::new("GENDER_DATA", template!(CONCEPT_COUNTS, "analysis_id" = 2)),
    Section::new("AGE_AT_FIRST_OBSERVATION_HISTOGRAM", template!(HISTOGRAM, "analysis_id" = 101)),
    Section::new("CUMULATIVE_DURATION", template!(CUMULATIVE_DURATION)),
    Section::new("OBSERVED_BY_MONTH", template!(OBSERVED_BY_MONTH)),
];

const DATA_DENSITY_SECTIONS: &[Section] = &[
    Section::new("TOTAL_RECORDS", template!(TOTAL_RECORDS)),
    Section::new("RECORDS_PER_PERSON", template!(RECORDS_PER_PERSON)),
    Section::new("CONCEPTS_PER_PERSON", template!(CONCEPTS_PER_PERSON)),
];

const fn treemap_task(
    name: &'static str,
    treemap: QueryTemplate,
    file: &'static str,
    subdir: &'static str,
    sections: &'static [Section],
) -> ReportTask {
    ReportTask {
        name,
        prerequisite: RESULTS_TABLE,
        kind: TaskKind::Treemap {
            file,
            treemap,
            subdir,
            sections,
        },
    }
}

const fn report_task(
    name: &'static str,
    file: &'static str,
    sections: &'static [Section],
) -> ReportTask {
    ReportTask {
        name,
        prerequisite: RESULTS_TABLE,
        kind: TaskKind::Report { file, sections },
    }
}

/// The full list of report tasks run by one pull.
pub fn catalog() -> Vec<ReportTask> {
    vec![
        ReportTask {
            name: "Heel",
            prerequisite: HEEL_RESULTS_TABLE,
            kind: TaskKind::Query {
                file: "achillesheel.json",
                section: Section {
                    key: "MESSAGES",
                    query: template!(ACHILLES_HEEL),
                    processor: RowProcessor::Columnar,
                },
            },
        },
        treemap_task(
            "DrugEra",
            treemap!(900, 901),
            "drugera_treemap.json",
            "drugeras",
            DRUG_ERA_SECTIONS,
        ),
        treemap_task("Drugs", treemap!(700, 701), "drug_treemap.json", "drugs", DRUG_SECTIONS),
        treemap_task(
            "Conditions",
            treemap!(400, 401),
            "condition_treemap.json",
            "conditions",
            CONDITION_SECTIONS,
        ),
        treemap_task(
            "ConditionEra",
            treemap!(1000, 1001),
            "conditionera_treemap.json",
            "conditioneras",
            CONDITION_ERA_SECTIONS,
        ),
        treemap_task(
            "Procedure",
            treemap!(600, 601),
            "procedure_treemap.json",
            "procedures",
            PROCEDURE_SECTIONS,
        ),
        report_task("Person", "person.json", PERSON_SECTIONS),
        report_task("Death", "death.json", DEATH_SECTIONS),
        report_task("Dashboard", "dashboard.json", DASHBOARD_SECTIONS),
        report_task("DataDensity", "datadensity.json", DATA_DENSITY_SECTIONS),
        treemap_task(
            "Measurement",
            treemap!(1800, 1801),
            "measurement_treemap.json",
            "measurements",
            MEASUREMENT_SECTIONS,
        ),
        treemap_task(
            "Observation",
            treemap!(800, 801),
            "observation_treemap.json",
            "observations",
            OBSERVATION_SECTIONS,
        ),
        treemap_task("Visit", treemap!(200, 201), "visit_treemap.json", "visits", VISIT_SECTIONS),
    ]
}
