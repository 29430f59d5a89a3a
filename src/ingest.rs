//! One day's realtime archive to one consolidated dataset.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::converter::{ConversionSummary, StreamingConverter, list_parts};
use crate::dedup::{Consolidation, consolidate, merge_files, remove_parts};
use crate::error::PipelineError;
use crate::snapshot::{DirectorySnapshots, NestedZipSnapshots};

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub date: NaiveDate,
    pub conversion: ConversionSummary,
    pub consolidation: Consolidation,
}

/// Converts the day's realtime archive into part-files and consolidates them.
///
/// Part-files are staged under [`PipelineConfig::staging_dir_for`], so only
/// this date's parts are ever merged into its dataset or deleted. When
/// `config.snapshot_dir` is set, snapshots are read from that directory
/// instead of the dated archive.
///
/// A day that yields no observations still publishes an empty dataset, so
/// reconciliation sees "nothing ran" rather than "ingestion missing".
///
/// # Errors
///
/// [`PipelineError::MissingData`] if the realtime archive (or snapshot
/// directory) is absent; any non-recoverable conversion or consolidation
/// failure.
#[tracing::instrument(skip_all, fields(date = %date))]
pub async fn ingest_for_date(
    config: &PipelineConfig,
    date: NaiveDate,
) -> Result<IngestSummary, PipelineError> {
    let output = config.consolidated_dataset(date);
    let staging_dir = config.staging_dir_for(date);

    let leftover = list_parts(&staging_dir)?;
    if !leftover.is_empty() {
        warn!(
            parts = leftover.len(),
            staging_dir = %staging_dir.display(),
            "Staging directory holds parts from an earlier run of this date; they will be consolidated too"
        );
    }

    let converter = StreamingConverter::new(&staging_dir, config.convert);
    let conversion = match &config.snapshot_dir {
        Some(dir) => {
            let snapshots = DirectorySnapshots::open(dir, &config.snapshot_member)?;
            info!(dir = %dir.display(), files = snapshots.len(), "Opened snapshot directory");
            converter.convert(snapshots).await?
        }
        None => {
            let archive = config.realtime_archive(date);
            let snapshots = NestedZipSnapshots::open(&archive, &config.snapshot_member)?;
            info!(archive = %archive.display(), entries = snapshots.len(), "Opened realtime archive");
            converter.convert(snapshots).await?
        }
    };

    let consolidation = if list_parts(&staging_dir)?.is_empty() {
        warn!("No observations decoded for this date, publishing an empty dataset");
        let consolidation = merge_files(&[], &output)?;
        remove_parts(&staging_dir, &[])?;
        consolidation
    } else {
        consolidate(&staging_dir, &output)?
    };

    info!(
        snapshots = conversion.snapshots_read,
        skipped = conversion.snapshots_skipped,
        rows = consolidation.output_rows,
        path = %output.display(),
        "Ingestion complete"
    );

    Ok(IngestSummary {
        date,
        conversion,
        consolidation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::part_file_name;
    use crate::observation::tests::observation;
    use crate::output::{read_observations, write_observations};
    use crate::output::tests::temp_dir;
    use crate::parser::tests::encoded_feed;
    use crate::snapshot::tests::zip_bytes;
    use std::fs;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 7).unwrap()
    }

    fn write_day_archive(config: &PipelineConfig, feeds: &[Vec<u8>]) {
        let inner: Vec<Vec<u8>> = feeds
            .iter()
            .map(|feed| zip_bytes(&[("gtfsrt.bin", feed.as_slice())]))
            .collect();
        let names: Vec<String> = (0..inner.len())
            .map(|i| format!("gtfsrt-20250707T{:06}.zip", i * 10))
            .collect();
        let members: Vec<(&str, &[u8])> = names
            .iter()
            .zip(&inner)
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
            .collect();

        let path = config.realtime_archive(date());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, zip_bytes(&members)).unwrap();
    }

    #[tokio::test]
    async fn test_repeated_snapshots_collapse_to_unique_rows() {
        let dir = temp_dir("ingest_repeated");
        let config = PipelineConfig::new(&dir);
        // the same capture three times plus one with an extra vehicle
        let feeds = vec![
            encoded_feed(2, 1),
            encoded_feed(2, 1),
            encoded_feed(2, 1),
            encoded_feed(3, 0),
        ];
        write_day_archive(&config, &feeds);

        let summary = ingest_for_date(&config, date()).await.unwrap();

        assert_eq!(summary.conversion.snapshots_read, 4);
        assert_eq!(summary.consolidation.input_rows, 9);
        assert_eq!(summary.consolidation.output_rows, 3);
        assert_eq!(read_observations(&config.consolidated_dataset(date())).unwrap().len(), 3);
        assert!(!config.staging_dir_for(date()).exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_day_without_vehicles_publishes_empty_dataset() {
        let dir = temp_dir("ingest_empty");
        let config = PipelineConfig::new(&dir);
        write_day_archive(&config, &[encoded_feed(0, 5)]);

        let summary = ingest_for_date(&config, date()).await.unwrap();

        assert_eq!(summary.consolidation.output_rows, 0);
        assert!(config.consolidated_dataset(date()).exists());
        assert!(!config.staging_dir_for(date()).exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_realtime_archive_is_missing_data() {
        let dir = temp_dir("ingest_missing");
        let config = PipelineConfig::new(&dir);

        let result = ingest_for_date(&config, date()).await;
        assert!(matches!(result, Err(PipelineError::MissingData { .. })));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_parts_left_by_another_day_are_not_consumed() {
        let dir = temp_dir("ingest_other_day_parts");
        let config = PipelineConfig::new(&dir);
        write_day_archive(&config, &[encoded_feed(2, 0)]);

        // a crashed run for the day before left a part behind
        let sunday = date().pred_opt().unwrap();
        let mut foreign = observation("T9", 42);
        foreign.start_date = "20250706".to_string();
        let foreign_part = config.staging_dir_for(sunday).join(part_file_name(0));
        fs::create_dir_all(foreign_part.parent().unwrap()).unwrap();
        write_observations(&foreign_part, &[foreign]).unwrap();

        let summary = ingest_for_date(&config, date()).await.unwrap();

        assert_eq!(summary.consolidation.output_rows, 2);
        let rows = read_observations(&config.consolidated_dataset(date())).unwrap();
        assert!(rows.iter().all(|r| r.start_date == "20250707"));
        assert!(foreign_part.exists());
        assert!(!config.staging_dir_for(date()).exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_directory_replaces_day_archive() {
        let dir = temp_dir("ingest_snapshot_dir");
        let mut config = PipelineConfig::new(&dir);
        let loose = dir.join("loose");
        fs::create_dir_all(&loose).unwrap();
        fs::write(loose.join("a.bin"), encoded_feed(2, 1)).unwrap();
        fs::write(
            loose.join("b.zip"),
            zip_bytes(&[("gtfsrt.bin", encoded_feed(3, 0).as_slice())]),
        )
        .unwrap();
        config.snapshot_dir = Some(loose);

        let summary = ingest_for_date(&config, date()).await.unwrap();

        assert_eq!(summary.conversion.snapshots_read, 2);
        assert_eq!(summary.consolidation.input_rows, 5);
        assert_eq!(summary.consolidation.output_rows, 3);
        assert!(config.consolidated_dataset(date()).exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
