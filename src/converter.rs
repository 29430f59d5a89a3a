//! Streaming conversion of feed snapshots into immutable Parquet part-files.
//!
//! One coordinator walks the snapshot source in order and hands each payload
//! to a bounded pool of blocking decode workers. Results are pulled back on
//! the coordinator once the in-flight cap is reached, accumulated, and
//! flushed as `part-NNNNNN.parquet` whenever the batch threshold is hit.
//!
//! Row order across snapshots in the part-files is not meaningful and not
//! guaranteed; deduplication downstream does not depend on it.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConvertSettings;
use crate::error::PipelineError;
use crate::observation::VehicleObservation;
use crate::output::write_observations;
use crate::parser::decode_observations;
use crate::snapshot::Snapshot;

const PART_PREFIX: &str = "part-";
const PART_EXTENSION: &str = "parquet";

/// Snapshots between progress log lines.
const PROGRESS_EVERY: usize = 100;

/// One flushed batch of observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartArtifact {
    pub index: usize,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct ConversionSummary {
    pub parts: Vec<PartArtifact>,
    pub snapshots_read: usize,
    pub snapshots_skipped: usize,
    pub observations: usize,
    /// Most decode tasks awaiting retrieval at any one time.
    pub peak_in_flight: usize,
    /// Most decode workers running at any one time.
    pub peak_workers: usize,
}

pub fn part_file_name(index: usize) -> String {
    format!("{PART_PREFIX}{index:06}.{PART_EXTENSION}")
}

fn part_index(path: &Path) -> Option<usize> {
    if path.extension().and_then(|e| e.to_str()) != Some(PART_EXTENSION) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(PART_PREFIX)?
        .parse()
        .ok()
}

/// Part-files in `staging_dir`, ordered by their index.
pub fn list_parts(staging_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !staging_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut parts = Vec::new();
    for entry in fs::read_dir(staging_dir).map_err(|e| PipelineError::io(staging_dir, e))? {
        let path = entry.map_err(|e| PipelineError::io(staging_dir, e))?.path();
        if let Some(index) = part_index(&path) {
            parts.push((index, path));
        }
    }
    parts.sort();

    Ok(parts.into_iter().map(|(_, path)| path).collect())
}

type DecodeTask = JoinHandle<Result<Vec<VehicleObservation>, PipelineError>>;

/// Blocking decode workers behind a semaphore, with results retrieved in
/// submission order by the single coordinator.
struct DecodePool {
    permits: Arc<Semaphore>,
    in_flight: VecDeque<(String, DecodeTask)>,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
}

impl DecodePool {
    fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: VecDeque::new(),
            running: Arc::new(AtomicUsize::new(0)),
            peak_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn peak_workers(&self) -> usize {
        self.peak_running.load(Ordering::Relaxed)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Waits for a free worker, then starts decoding `snapshot` on it.
    async fn submit(&mut self, snapshot: Snapshot) -> Result<(), PipelineError> {
        let Snapshot { name, payload } = snapshot;
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Worker {
                snapshot: name.clone(),
                reason: e.to_string(),
            })?;

        let running = self.running.clone();
        let peak_running = self.peak_running.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak_running.fetch_max(now, Ordering::SeqCst);
            let decoded = decode_observations(&payload);
            running.fetch_sub(1, Ordering::SeqCst);
            decoded
        });
        self.in_flight.push_back((name, handle));
        Ok(())
    }

    /// Retrieves every outstanding result into `batch`. Failed snapshots are logged and counted.
    async fn drain(&mut self, batch: &mut Vec<VehicleObservation>, summary: &mut ConversionSummary) {
        while let Some((name, handle)) = self.in_flight.pop_front() {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(PipelineError::Worker {
                    snapshot: name.clone(),
                    reason: e.to_string(),
                })
            });

            match outcome {
                Ok(observations) => {
                    debug!(snapshot = %name, observations = observations.len(), "Snapshot decoded");
                    summary.observations += observations.len();
                    batch.extend(observations);
                }
                Err(e) => {
                    summary.snapshots_skipped += 1;
                    warn!(snapshot = %name, error = %e, "Snapshot decode failed, skipping");
                }
            }
        }
    }
}

/// Converts an ordered snapshot source into part-files under one staging directory.
pub struct StreamingConverter {
    staging_dir: PathBuf,
    settings: ConvertSettings,
}

impl StreamingConverter {
    pub fn new(staging_dir: impl Into<PathBuf>, settings: ConvertSettings) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            settings,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Decodes every snapshot and writes the observations as part-files.
    ///
    /// Recoverable per-snapshot failures are logged and skipped. Part
    /// numbering continues after any part already in the staging
    /// directory, so existing artifacts are never overwritten.
    ///
    /// # Errors
    ///
    /// Non-recoverable source errors and any failure to write a part-file.
    #[tracing::instrument(skip(self, snapshots), fields(staging_dir = %self.staging_dir.display()))]
    pub async fn convert<I>(&self, snapshots: I) -> Result<ConversionSummary, PipelineError>
    where
        I: IntoIterator<Item = Result<Snapshot, PipelineError>>,
    {
        fs::create_dir_all(&self.staging_dir).map_err(|e| PipelineError::io(&self.staging_dir, e))?;

        let mut next_index = list_parts(&self.staging_dir)?
            .last()
            .and_then(|p| part_index(p))
            .map_or(0, |i| i + 1);

        let max_in_flight = self.settings.max_in_flight.max(1);
        let batch_size = self.settings.batch_size.max(1);

        let snapshots = snapshots.into_iter();
        let total = snapshots.size_hint().1;

        let mut pool = DecodePool::new(self.settings.concurrency);
        let mut batch: Vec<VehicleObservation> = Vec::with_capacity(batch_size);
        let mut summary = ConversionSummary::default();

        for item in snapshots {
            summary.snapshots_read += 1;

            match item {
                Ok(snapshot) => {
                    pool.submit(snapshot).await?;
                    summary.peak_in_flight = summary.peak_in_flight.max(pool.in_flight());
                }
                Err(e) if e.is_recoverable() => {
                    summary.snapshots_skipped += 1;
                    warn!(error = %e, "Snapshot unreadable, skipping");
                }
                Err(e) => return Err(e),
            }

            if pool.in_flight() >= max_in_flight {
                pool.drain(&mut batch, &mut summary).await;
            }

            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut next_index, &mut summary)?;
            }

            if summary.snapshots_read % PROGRESS_EVERY == 0 {
                match total {
                    Some(total) if total > 0 => info!(
                        processed = summary.snapshots_read,
                        total,
                        percent = summary.snapshots_read * 100 / total,
                        "Conversion progress"
                    ),
                    _ => info!(processed = summary.snapshots_read, "Conversion progress"),
                }
            }
        }

        pool.drain(&mut batch, &mut summary).await;
        summary.peak_workers = pool.peak_workers();
        if !batch.is_empty() {
            self.flush(&mut batch, &mut next_index, &mut summary)?;
        }

        info!(
            snapshots = summary.snapshots_read,
            skipped = summary.snapshots_skipped,
            observations = summary.observations,
            parts = summary.parts.len(),
            "Conversion complete"
        );
        Ok(summary)
    }

    fn flush(
        &self,
        batch: &mut Vec<VehicleObservation>,
        next_index: &mut usize,
        summary: &mut ConversionSummary,
    ) -> Result<(), PipelineError> {
        let index = *next_index;
        let path = self.staging_dir.join(part_file_name(index));
        write_observations(&path, batch)?;

        info!(path = %path.display(), rows = batch.len(), "Wrote part");
        summary.parts.push(PartArtifact {
            index,
            path,
            rows: batch.len(),
        });

        *next_index += 1;
        batch.clear();
        batch.shrink_to(self.settings.batch_size);
        Ok(())
    }
}
