//! Feature extraction for audio genre classification datasets.
//!
//! Single-pass, deterministic dataset builder with:
//! - Sorted genre-directory traversal (label id = sorted position)
//! - Audio decoding (symphonia) and resampling (rubato)
//! - Fixed-length segmentation of each track
//! - One of three transforms: MFCC, dB mel spectrogram, AST filterbank
//! - Strict frame-count validation
//! - One pretty-printed JSON document per run

pub mod config;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod fbank;
pub mod pipeline;
pub mod segment;
pub mod spectrogram;
pub mod transform;
pub mod validate;

pub use config::{
    ChannelMode, ExtractionConfig, MelSpecConfig, MfccConfig, PretrainedConfig, TransformConfig,
};
pub use dataset::Dataset;
pub use error::{ConfigError, ExtractError};
pub use pipeline::{Driver, RunSummary};
pub use segment::{FrameRule, SegmentPlan};
pub use transform::{FeatureExtractor, FeatureKey, FeatureMatrix};
