//! Explicit pipeline configuration.
//!
//! Every stage receives a [`PipelineConfig`] value; dated input and output
//! locations are derived here so no stage has to know the archive layout.

use chrono::NaiveDate;
use std::path::PathBuf;

/// Name of the payload member inside each snapshot archive.
pub const DEFAULT_SNAPSHOT_MEMBER: &str = "gtfsrt.bin";

/// File name of the consolidated dataset inside a day directory.
pub const CONSOLIDATED_FILE_NAME: &str = "all_bus_locations_deduplicated.parquet";

pub const DEFAULT_REGIONS: &[&str] = &[
    "north_east",
    "north_west",
    "yorkshire",
    "east_anglia",
    "east_midlands",
    "west_midlands",
    "south_east",
    "south_west",
];

/// Tuning knobs for the streaming converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSettings {
    /// Number of decode workers running at once.
    pub concurrency: usize,
    /// Submitted-but-unretrieved decode tasks allowed before the coordinator drains.
    pub max_in_flight: usize,
    /// Accumulated observations that trigger a part-file flush.
    pub batch_size: usize,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            concurrency: 12,
            max_in_flight: 32,
            batch_size: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the local archive mirror (`<root>/<format>/YYYY/MM/DD/...`).
    pub archive_root: PathBuf,
    /// Scratch root; each date stages its part-files in its own subdirectory.
    pub staging_dir: PathBuf,
    /// Directory of loose snapshot files to ingest instead of the day archive.
    pub snapshot_dir: Option<PathBuf>,
    /// Directory receiving reconciliation reports.
    pub report_dir: PathBuf,
    pub snapshot_member: String,
    pub regions: Vec<String>,
    pub convert: ConvertSettings,
}

impl PipelineConfig {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        let archive_root = archive_root.into();
        Self {
            staging_dir: archive_root.join("tmp"),
            report_dir: archive_root.join("reports"),
            snapshot_dir: None,
            archive_root,
            snapshot_member: DEFAULT_SNAPSHOT_MEMBER.to_string(),
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            convert: ConvertSettings::default(),
        }
    }

    /// `<root>/<format>/YYYY/MM/DD`
    pub fn day_dir(&self, format: &str, date: NaiveDate) -> PathBuf {
        self.archive_root
            .join(format)
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string())
    }

    pub fn realtime_archive(&self, date: NaiveDate) -> PathBuf {
        self.day_dir("gtfsrt", date)
            .join(format!("gtfsrt-{}.zip", date_key(date)))
    }

    /// `<staging_dir>/YYYYMMDD`: part-files for one date only.
    pub fn staging_dir_for(&self, date: NaiveDate) -> PathBuf {
        self.staging_dir.join(date_key(date))
    }

    pub fn consolidated_dataset(&self, date: NaiveDate) -> PathBuf {
        self.day_dir("gtfsrt", date).join(CONSOLIDATED_FILE_NAME)
    }

    pub fn schedule_archive(&self, region: &str, date: NaiveDate) -> PathBuf {
        self.day_dir("timetables", date)
            .join(format!("itm_{}_gtfs_{}.zip", region, date_key(date)))
    }

    pub fn performance_report(&self, region: &str, date: NaiveDate) -> PathBuf {
        self.report_dir
            .join(format!("{}_{}_performance.csv", date_key(date), region))
    }

    pub fn coverage_report(&self, region: &str, date: NaiveDate) -> PathBuf {
        self.report_dir
            .join(format!("{}_{}_coverage.csv", date_key(date), region))
    }

    pub fn report_index(&self, date: NaiveDate) -> PathBuf {
        self.report_dir.join(format!("{}_index.json", date_key(date)))
    }
}

/// Formats a date as the `YYYYMMDD` key used in archive and report names.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
