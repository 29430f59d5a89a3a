//! Consolidation of a day's part-files into one deduplicated dataset.
//!
//! Duplicates share a [`DedupKey`]. When several observations share a key the
//! survivor is the one with the smallest `(entity_id, bearing)`, so the result
//! does not depend on the order in which parts were written.
//!
//! The consolidated file is staged under a temporary name, fsynced and renamed
//! into place, and the containing directory is fsynced; part-files are removed
//! only after that.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::converter::list_parts;
use crate::error::PipelineError;
use crate::observation::{DedupKey, VehicleObservation};
use crate::output::{count_rows, read_observations_into, write_observations};

const STAGING_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Serialize)]
pub struct Consolidation {
    pub path: PathBuf,
    pub input_rows: usize,
    pub output_rows: usize,
    pub inputs: usize,
}

impl Consolidation {
    pub fn duplicates_removed(&self) -> usize {
        self.input_rows - self.output_rows
    }

    /// Fraction of input rows dropped as duplicates, in `[0, 1]`.
    pub fn duplicate_fraction(&self) -> f64 {
        if self.input_rows == 0 {
            0.0
        } else {
            self.duplicates_removed() as f64 / self.input_rows as f64
        }
    }
}

fn survivor_order(a: &VehicleObservation, b: &VehicleObservation) -> Ordering {
    a.entity_id.cmp(&b.entity_id).then_with(|| {
        let a = a.bearing.map(f32::to_bits);
        let b = b.bearing.map(f32::to_bits);
        a.cmp(&b)
    })
}

/// Keeps exactly one observation per dedup key, in key order.
pub fn deduplicate(rows: impl IntoIterator<Item = VehicleObservation>) -> Vec<VehicleObservation> {
    let mut unique: BTreeMap<DedupKey, VehicleObservation> = BTreeMap::new();

    for row in rows {
        let row = row.normalized();
        match unique.entry(row.dedup_key()) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                if survivor_order(&row, slot.get()) == Ordering::Less {
                    slot.insert(row);
                }
            }
        }
    }

    unique.into_values().collect()
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("consolidated"));
    name.push(STAGING_SUFFIX);
    output.with_file_name(name)
}

/// Flushes a directory entry so a rename inside it survives a crash.
fn sync_dir(dir: &Path) -> Result<(), PipelineError> {
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| PipelineError::io(dir, e))
}

/// Loads every input, deduplicates, and publishes the result at `output`.
///
/// Inputs are left untouched, so this can be rerun on its own output.
#[tracing::instrument(skip_all, fields(inputs = inputs.len(), output = %output.display()))]
pub fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<Consolidation, PipelineError> {
    let mut expected = 0usize;
    for path in inputs {
        expected += count_rows(path)?;
    }

    let mut rows = Vec::new();
    rows.try_reserve_exact(expected).map_err(|e| {
        PipelineError::ResourceExhausted(format!("reserving {expected} rows for consolidation: {e}"))
    })?;
    for path in inputs {
        read_observations_into(path, &mut rows)?;
    }

    let input_rows = rows.len();
    let unique = deduplicate(rows);

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let staged = staging_path(output);
    if staged.exists() {
        warn!(path = %staged.display(), "Removing stale staged file from an earlier run");
        fs::remove_file(&staged).map_err(|e| PipelineError::io(&staged, e))?;
    }
    write_observations(&staged, &unique)?;
    fs::rename(&staged, output).map_err(|e| PipelineError::io(output, e))?;
    if let Some(parent) = output.parent() {
        sync_dir(parent)?;
    }

    let consolidation = Consolidation {
        path: output.to_path_buf(),
        input_rows,
        output_rows: unique.len(),
        inputs: inputs.len(),
    };
    info!(
        input_rows,
        output_rows = consolidation.output_rows,
        duplicate_pct = consolidation.duplicate_fraction() * 100.0,
        "Published consolidated dataset"
    );
    Ok(consolidation)
}

/// Consolidates all part-files in `staging_dir` into `output`, then deletes them.
///
/// # Errors
///
/// [`PipelineError::MissingData`] when the staging directory holds no
/// part-files. On any failure the part-files are left in place.
pub fn consolidate(staging_dir: &Path, output: &Path) -> Result<Consolidation, PipelineError> {
    let parts = list_parts(staging_dir)?;
    if parts.is_empty() {
        return Err(PipelineError::missing("part-files", staging_dir));
    }

    let consolidation = merge_files(&parts, output)?;
    remove_parts(staging_dir, &parts)?;
    Ok(consolidation)
}

/// Deletes consumed part-files, then the staging directory if nothing else is in it.
pub fn remove_parts(staging_dir: &Path, parts: &[PathBuf]) -> Result<(), PipelineError> {
    for part in parts {
        fs::remove_file(part).map_err(|e| PipelineError::io(part, e))?;
    }

    let is_empty = fs::read_dir(staging_dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        fs::remove_dir(staging_dir).map_err(|e| PipelineError::io(staging_dir, e))?;
    }

    info!(removed = parts.len(), staging_dir = %staging_dir.display(), "Cleaned up part-files");
    Ok(())
}
