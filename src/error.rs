//! Errors that escalate out of an extraction run.
//!
//! Per-file and per-segment failures (`DecodeError`, `ShapeMismatch`,
//! per-segment `TransformError`) are absorbed by the pipeline and never reach
//! this type. Only configuration and final persistence failures do.

use std::path::PathBuf;
use thiserror::Error;

use crate::dataset::DatasetError;
use crate::transform::TransformError;

/// Invalid run configuration. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("segment_count must be > 0")]
    ZeroSegmentCount,
    #[error("sample_rate must be > 0")]
    ZeroSampleRate,
    #[error("track duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f64),
    #[error("hop_length must be > 0")]
    ZeroHopLength,
    #[error("workers must be > 0")]
    ZeroWorkers,
    #[error("dataset root not found: {0}")]
    MissingDatasetRoot(PathBuf),
    #[error("dataset root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error(
        "pretrained extractor expects {expected} segments per {duration}s track, got {actual}"
    )]
    SegmentCountLocked {
        expected: usize,
        actual: usize,
        duration: f64,
    },
}

/// Fatal extraction failure surfaced to the caller.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("transform setup failed: {0}")]
    Transform(#[from] TransformError),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("failed to serialize dataset: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to write dataset to {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
