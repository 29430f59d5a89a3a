//! Columnar persistence for vehicle observations.
//!
//! Part-files and the consolidated dataset share one Parquet layout built
//! from [`observation_schema`].

use std::fs::{File, OpenOptions};
use std::path::Path;

use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use crate::error::PipelineError;
use crate::observation::{
    VehicleObservation, extend_from_record_batch, observation_schema, to_record_batch,
};

/// Rows per Arrow batch when reading Parquet back.
const READ_BATCH_SIZE: usize = 8192;

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

/// Writes `rows` to a new Parquet file at `path`.
///
/// Fails if `path` already exists; artifacts are written exactly once.
/// The file is fsynced before returning.
pub fn write_observations(path: &Path, rows: &[VehicleObservation]) -> Result<(), PipelineError> {
    debug!(path = %path.display(), rows = rows.len(), "Writing observations");

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| PipelineError::io(path, e))?;
    let sync_handle = file.try_clone().map_err(|e| PipelineError::io(path, e))?;

    let mut writer = ArrowWriter::try_new(file, observation_schema(), Some(writer_properties()))
        .map_err(|e| PipelineError::parquet(path, e))?;

    if !rows.is_empty() {
        let batch = to_record_batch(rows)?;
        writer
            .write(&batch)
            .map_err(|e| PipelineError::parquet(path, e))?;
    }
    writer.close().map_err(|e| PipelineError::parquet(path, e))?;

    sync_handle
        .sync_all()
        .map_err(|e| PipelineError::io(path, e))?;

    Ok(())
}

fn open_reader(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| PipelineError::parquet(path, e))
}

/// Row count recorded in the Parquet footer, without reading any data pages.
pub fn count_rows(path: &Path) -> Result<usize, PipelineError> {
    let builder = open_reader(path)?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as usize)
}

/// Appends every observation stored at `path` to `out`, returning how many were read.
pub fn read_observations_into(
    path: &Path,
    out: &mut Vec<VehicleObservation>,
) -> Result<usize, PipelineError> {
    let before = out.len();
    let reader = open_reader(path)?
        .with_batch_size(READ_BATCH_SIZE)
        .build()
        .map_err(|e| PipelineError::parquet(path, e))?;

    for batch in reader {
        extend_from_record_batch(&batch?, path, out)?;
    }

    Ok(out.len() - before)
}

/// Reads a whole observation file, reserving its row count up front.
pub fn read_observations(path: &Path) -> Result<Vec<VehicleObservation>, PipelineError> {
    let expected = count_rows(path)?;
    let mut rows = Vec::new();
    rows.try_reserve_exact(expected).map_err(|e| {
        PipelineError::ResourceExhausted(format!(
            "reserving {expected} rows for {}: {e}",
            path.display()
        ))
    })?;
    read_observations_into(path, &mut rows)?;
    Ok(rows)
}
