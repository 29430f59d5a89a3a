//! CLI entry point for the GTFS-RT reconciliation tool.
//!
//! Provides subcommands for inspecting a single feed payload, ingesting a
//! day's realtime archive into a deduplicated dataset, and reconciling that
//! dataset against each region's timetable.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use gtfs_rt_reconcile::analyzers::analyzer::analyze_for_date;
use gtfs_rt_reconcile::config::{ConvertSettings, DEFAULT_SNAPSHOT_MEMBER, PipelineConfig};
use gtfs_rt_reconcile::ingest::ingest_for_date;
use gtfs_rt_reconcile::parser::{decode_observations, parse_feed};
use gtfs_rt_reconcile::stats::FeedStats;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_reconcile")]
#[command(about = "Ingest GTFS-RT archives and reconcile them against timetables", long_about = None)]
struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// Root of the local archive mirror
    #[arg(long, env = "BODS_ARCHIVE", default_value = "data", global = true)]
    archive_root: PathBuf,

    /// Scratch root for per-date part-files [default: <archive-root>/tmp]
    #[arg(long, env = "STAGING_DIR", global = true)]
    staging_dir: Option<PathBuf>,

    /// Directory receiving reports [default: <archive-root>/reports]
    #[arg(long, env = "REPORT_DIR", global = true)]
    report_dir: Option<PathBuf>,

    /// Ingest loose snapshot files (*.zip, *.bin) from this directory instead of the day archive
    #[arg(long, env = "SNAPSHOT_DIR", global = true)]
    snapshot_dir: Option<PathBuf>,

    /// Payload member inside each snapshot archive
    #[arg(long, env = "SNAPSHOT_MEMBER", default_value = DEFAULT_SNAPSHOT_MEMBER, global = true)]
    snapshot_member: String,

    /// Maximum number of concurrent decode workers
    #[arg(long, env = "DECODE_CONCURRENCY", default_value_t = ConvertSettings::default().concurrency, global = true)]
    concurrency: usize,

    /// Decode tasks allowed in flight before results are drained
    #[arg(long, env = "MAX_IN_FLIGHT", default_value_t = ConvertSettings::default().max_in_flight, global = true)]
    max_in_flight: usize,

    /// Observations per part-file
    #[arg(long, env = "BATCH_SIZE", default_value_t = ConvertSettings::default().batch_size, global = true)]
    batch_size: usize,
}

impl PipelineArgs {
    fn into_config(self, regions: Vec<String>) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.archive_root);
        if let Some(staging_dir) = self.staging_dir {
            config.staging_dir = staging_dir;
        }
        if let Some(report_dir) = self.report_dir {
            config.report_dir = report_dir;
        }
        if !regions.is_empty() {
            config.regions = regions;
        }
        config.snapshot_dir = self.snapshot_dir;
        config.snapshot_member = self.snapshot_member;
        config.convert = ConvertSettings {
            concurrency: self.concurrency,
            max_in_flight: self.max_in_flight,
            batch_size: self.batch_size,
        };
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one raw GTFS-RT payload and log what it contains
    Decode {
        /// Path to a protobuf FeedMessage
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },
    /// Convert and deduplicate one day's realtime archive
    Ingest {
        /// Service date (YYYY-MM-DD or YYYYMMDD) [default: yesterday]
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Reconcile a consolidated day against regional timetables
    Reconcile {
        /// Service date (YYYY-MM-DD or YYYYMMDD) [default: yesterday]
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Regions to reconcile (repeatable or comma separated) [default: all]
        #[arg(short, long = "region", env = "REGIONS", value_delimiter = ',')]
        regions: Vec<String>,
    },
    /// Ingest then reconcile
    Run {
        /// Service date (YYYY-MM-DD or YYYYMMDD) [default: yesterday]
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Regions to reconcile (repeatable or comma separated) [default: all]
        #[arg(short, long = "region", env = "REGIONS", value_delimiter = ',')]
        regions: Vec<String>,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|e| format!("invalid date '{s}': {e}"))
}

fn date_or_yesterday(date: Option<NaiveDate>) -> Result<NaiveDate> {
    match date {
        Some(date) => Ok(date),
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .context("no date before today"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_reconcile.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_reconcile.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { source } => {
            decode(&source)?;
        }
        Commands::Ingest { date } => {
            let date = date_or_yesterday(date)?;
            let config = cli.pipeline.into_config(Vec::new());
            ingest_for_date(&config, date)
                .await
                .with_context(|| format!("ingestion failed for {date}"))?;
        }
        Commands::Reconcile { date, regions } => {
            let date = date_or_yesterday(date)?;
            let config = cli.pipeline.into_config(regions);
            analyze_for_date(&config, date)
                .with_context(|| format!("reconciliation failed for {date}"))?;
        }
        Commands::Run { date, regions } => {
            let date = date_or_yesterday(date)?;
            let config = cli.pipeline.into_config(regions);
            ingest_for_date(&config, date)
                .await
                .with_context(|| format!("ingestion failed for {date}"))?;
            analyze_for_date(&config, date)
                .with_context(|| format!("reconciliation failed for {date}"))?;
        }
    }

    Ok(())
}

/// Decodes a payload file and logs its field coverage.
#[tracing::instrument(skip_all, fields(source = %source.display()))]
fn decode(source: &Path) -> Result<()> {
    let bytes = std::fs::read(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let feed = parse_feed(&bytes)?;
    let stats = FeedStats::from_feed(&feed);
    let observations = decode_observations(&bytes)?;

    info!(
        version = %stats.gtfs_realtime_version,
        header_timestamp = ?stats.header_timestamp,
        entities = stats.total_entities,
        vehicles = stats.vehicles,
        skipped = stats.skipped_entities(),
        observations = observations.len(),
        trip_id_pct = stats.trip_id_pct(),
        bearing_pct = stats.bearing_pct(),
        "Feed decoded"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
