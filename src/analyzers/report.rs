use std::fs::{self, File};
use std::path::Path;

use csv::WriterBuilder;
use serde::Serialize;

use crate::analyzers::types::{COVERAGE_HEADER, CoverageRow, PERFORMANCE_HEADER, ReconciliationResult};
use crate::error::PipelineError;

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    Ok(())
}

/// Writes `rows` as CSV under an explicit header, so an empty report still has one.
fn write_csv<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;

    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(file);
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

pub fn write_performance_report(path: &Path, rows: &[ReconciliationResult]) -> Result<(), PipelineError> {
    write_csv(path, &PERFORMANCE_HEADER, rows)
}

pub fn write_coverage_report(path: &Path, rows: &[CoverageRow]) -> Result<(), PipelineError> {
    write_csv(path, &COVERAGE_HEADER, rows)
}

/// Serializes a value as pretty-printed JSON to `path`.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}
