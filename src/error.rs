//! Error taxonomy for the ingestion and reconciliation pipeline.

use std::path::{Path, PathBuf};

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Remedy attached to every missing-input failure.
pub const RUN_INGESTION_FIRST: &str = "run ingestion for this date first";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Failed to decode feed message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Snapshot '{snapshot}' has no member named '{member}'")]
    MissingArchiveMember { snapshot: String, member: String },

    #[error("Failed to read archive '{name}': {source}")]
    Archive {
        name: String,
        source: zip::result::ZipError,
    },

    #[error("Decode worker failed for snapshot '{snapshot}': {reason}")]
    Worker { snapshot: String, reason: String },

    #[error("{artifact} not found at {}: {remedy}", .path.display())]
    MissingData {
        artifact: String,
        path: PathBuf,
        remedy: &'static str,
    },

    #[error("Resource exhausted while {0}")]
    ResourceExhausted(String),

    #[error("I/O failure on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parquet failure on {}: {source}", .path.display())]
    Parquet { path: PathBuf, source: ParquetError },

    #[error("Failed to build record batch: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Column '{column}' missing or mistyped in {}", .path.display())]
    Schema { path: PathBuf, column: &'static str },

    #[error("Malformed table '{table}': {source}")]
    Table { table: String, source: csv::Error },

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Per-snapshot failures that are logged and skipped instead of aborting a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_)
                | PipelineError::MissingArchiveMember { .. }
                | PipelineError::Archive { .. }
                | PipelineError::Worker { .. }
        )
    }

    pub fn missing(artifact: impl Into<String>, path: &Path) -> Self {
        PipelineError::MissingData {
            artifact: artifact.into(),
            path: path.to_path_buf(),
            remedy: RUN_INGESTION_FIRST,
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn parquet(path: &Path, source: ParquetError) -> Self {
        PipelineError::Parquet {
            path: path.to_path_buf(),
            source,
        }
    }
}
