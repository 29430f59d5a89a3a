//! Data types produced by the reconciliation pipeline.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::join::JoinStats;

/// Header of the per-region performance report, written even when there are no rows.
pub const PERFORMANCE_HEADER: [&str; 7] = [
    "agency_id",
    "agency_name",
    "timetable",
    "1-10",
    "11-20",
    "21-50",
    "51-1000",
];

pub const COVERAGE_HEADER: [&str; 5] = [
    "agency_id",
    "agency_name",
    "real",
    "timetable",
    "percentage_real_in_timetable",
];

/// Per-operator histogram of how often each scheduled trip was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub agency_id: String,
    pub agency_name: String,
    /// Active scheduled trip rows for the operator.
    #[serde(rename = "timetable")]
    pub timetable_trip_count: usize,
    #[serde(rename = "1-10")]
    pub bucket_1_10: usize,
    #[serde(rename = "11-20")]
    pub bucket_11_20: usize,
    #[serde(rename = "21-50")]
    pub bucket_21_50: usize,
    #[serde(rename = "51-1000")]
    pub bucket_51_1000: usize,
}

/// Observed trips as a share of timetabled trips for one operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    pub agency_id: String,
    pub agency_name: String,
    /// Distinct scheduled trips observed at least once.
    pub real: usize,
    pub timetable: usize,
    pub percentage_real_in_timetable: f64,
}

/// Output of one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub results: Vec<ReconciliationResult>,
    pub coverage: Vec<CoverageRow>,
    pub joins: Vec<JoinStats>,
}

/// Summary entry for one region in the run index.
#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub region: String,
    pub schedule_archive: PathBuf,
    pub active_services: usize,
    pub agencies: usize,
    pub performance_report: PathBuf,
    pub coverage_report: PathBuf,
    /// Timetable assembly joins followed by the reconciliation joins.
    pub joins: Vec<JoinStats>,
}

/// Top-level index of a reconciliation run, written as `YYYYMMDD_index.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationIndex {
    pub generated_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub consolidated_dataset: PathBuf,
    pub observations: usize,
    pub regions: Vec<RegionSummary>,
}
