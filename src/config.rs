//! Run configuration.
//!
//! One immutable [`ExtractionConfig`] is built up front (by the CLI or by a
//! library caller) and handed to the pipeline driver. Nothing is read from
//! process-wide state.

use std::path::PathBuf;

use crate::error::ConfigError;

/// How multi-channel audio is reduced to the mono track the transforms expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Keep only the first channel.
    #[default]
    First,
    /// Average all channels.
    Mean,
}

/// Cepstral coefficient transform settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MfccConfig {
    pub n_coefficients: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_coefficients: 13,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
        }
    }
}

/// Decibel mel spectrogram settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MelSpecConfig {
    pub n_mels: usize,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
}

impl Default for MelSpecConfig {
    fn default() -> Self {
        Self {
            n_mels: 64,
            n_fft: 4096,
            win_length: 1024,
            hop_length: 512,
        }
    }
}

/// Settings of the fixed-size filterbank fed to a pretrained spectrogram transformer.
///
/// These mirror what the model was trained on and are not meant to be tuned.
#[derive(Debug, Clone, PartialEq)]
pub struct PretrainedConfig {
    pub target_sample_rate: u32,
    pub max_frames: usize,
    pub frame_shift_ms: f32,
}

impl Default for PretrainedConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            max_frames: 1024,
            frame_shift_ms: 10.0,
        }
    }
}

impl PretrainedConfig {
    /// Seconds of audio covered by `max_frames` frames.
    pub fn window_seconds(&self) -> f64 {
        self.max_frames as f64 * self.frame_shift_ms as f64 / 1000.0
    }

    /// Segment count implied by the fixed model input for a track of `duration` seconds.
    ///
    /// 30 s tracks give 3 segments of roughly 10 s each.
    pub fn segment_count(&self, duration_seconds: f64) -> usize {
        ((duration_seconds / self.window_seconds()).round() as usize).max(1)
    }
}

/// Which feature transform a run applies.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformConfig {
    Mfcc(MfccConfig),
    MelSpec(MelSpecConfig),
    Pretrained(PretrainedConfig),
}

impl TransformConfig {
    /// Default number of segments per track for this transform.
    pub fn default_segment_count(&self, duration_seconds: f64) -> usize {
        match self {
            TransformConfig::Mfcc(_) | TransformConfig::MelSpec(_) => 10,
            TransformConfig::Pretrained(p) => p.segment_count(duration_seconds),
        }
    }
}

/// Complete configuration of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    pub dataset_path: PathBuf,
    pub output_path: PathBuf,
    pub sample_rate: u32,
    pub track_duration_seconds: f64,
    pub segment_count: usize,
    pub transform: TransformConfig,
    pub channel_mode: ChannelMode,
    /// Number of files extracted concurrently. `1` runs fully sequentially.
    pub workers: usize,
}

impl ExtractionConfig {
    pub const DEFAULT_SAMPLE_RATE: u32 = 22050;
    pub const DEFAULT_TRACK_DURATION: f64 = 30.0;

    /// Config with default rate, duration and the transform's default segment count.
    pub fn new(
        dataset_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        transform: TransformConfig,
    ) -> Self {
        let segment_count = transform.default_segment_count(Self::DEFAULT_TRACK_DURATION);
        Self {
            dataset_path: dataset_path.into(),
            output_path: output_path.into(),
            sample_rate: Self::DEFAULT_SAMPLE_RATE,
            track_duration_seconds: Self::DEFAULT_TRACK_DURATION,
            segment_count,
            transform,
            channel_mode: ChannelMode::default(),
            workers: 1,
        }
    }

    /// Check everything that can be checked without touching audio.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if !self.track_duration_seconds.is_finite() || self.track_duration_seconds <= 0.0 {
            return Err(ConfigError::InvalidDuration(self.track_duration_seconds));
        }
        if self.segment_count == 0 {
            return Err(ConfigError::ZeroSegmentCount);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if let TransformConfig::Pretrained(p) = &self.transform {
            let expected = p.segment_count(self.track_duration_seconds);
            if self.segment_count != expected {
                return Err(ConfigError::SegmentCountLocked {
                    expected,
                    actual: self.segment_count,
                    duration: self.track_duration_seconds,
                });
            }
        }
        if !self.dataset_path.exists() {
            return Err(ConfigError::MissingDatasetRoot(self.dataset_path.clone()));
        }
        if !self.dataset_path.is_dir() {
            return Err(ConfigError::NotADirectory(self.dataset_path.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path, transform: TransformConfig) -> ExtractionConfig {
        ExtractionConfig::new(dir, dir.join("out.json"), transform)
    }

    #[test]
    fn test_default_segment_counts() {
        let mfcc = TransformConfig::Mfcc(MfccConfig::default());
        let mel = TransformConfig::MelSpec(MelSpecConfig::default());
        let ast = TransformConfig::Pretrained(PretrainedConfig::default());

        assert_eq!(mfcc.default_segment_count(30.0), 10);
        assert_eq!(mel.default_segment_count(30.0), 10);
        // 1024 frames * 10 ms = 10.24 s per segment
        assert_eq!(ast.default_segment_count(30.0), 3);
        assert_eq!(ast.default_segment_count(2.0), 1);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), TransformConfig::Mfcc(MfccConfig::default()));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let base = config_in(dir.path(), TransformConfig::Mfcc(MfccConfig::default()));

        let mut config = base.clone();
        config.segment_count = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSegmentCount));

        let mut config = base.clone();
        config.sample_rate = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSampleRate));

        let mut config = base.clone();
        config.track_duration_seconds = -1.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDuration(-1.0)));

        let mut config = base;
        config.workers = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn test_validate_locks_pretrained_segment_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(
            dir.path(),
            TransformConfig::Pretrained(PretrainedConfig::default()),
        );
        assert_eq!(config.segment_count, 3);
        assert_eq!(config.validate(), Ok(()));

        config.segment_count = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SegmentCountLocked {
                expected: 3,
                actual: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let config = ExtractionConfig::new(
            &missing,
            dir.path().join("out.json"),
            TransformConfig::MelSpec(MelSpecConfig::default()),
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingDatasetRoot(missing))
        );
    }
}
