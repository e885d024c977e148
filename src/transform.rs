//! Feature extractors behind one segment-in, matrix-out contract.
//!
//! Three implementations:
//! - [`Mfcc`]: mel power spectrogram -> dB (80 dB floor) -> orthonormal DCT-II
//! - [`MelSpec`]: mel power spectrogram -> dB (80 dB floor)
//! - [`Pretrained`]: resample to the model rate, then a [`FixedLengthExtractor`]
//!
//! Every extractor emits time-major matrices. Inputs too short to frame yield
//! an empty matrix rather than an error; the validator drops those.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MelSpecConfig, MfccConfig, PretrainedConfig, TransformConfig};
use crate::decode::resample;
use crate::fbank::{AstFeatureExtractor, FbankConfig};
use crate::segment::FrameRule;
use crate::spectrogram::{dct_matrix, power_to_db, MelSpectrogram, SpectrogramConfig};

/// Dynamic range kept below the loudest bin of a segment.
pub const TOP_DB: f32 = 80.0;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("invalid transform configuration: {0}")]
    InvalidConfig(String),
    #[error("expected audio at {expected} Hz, got {actual} Hz")]
    SampleRate { expected: u32, actual: u32 },
    #[error("FFT error: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("resampler setup failed: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Time-major feature matrix: one row per frame, one column per feature channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureMatrix {
    rows: Vec<Vec<f32>>,
}

impl FeatureMatrix {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.rows
    }

    /// Number of time frames (rows).
    pub fn n_frames(&self) -> usize {
        self.rows.len()
    }

    /// Width of the first row, zero for an empty matrix.
    pub fn n_channels(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Dataset document key the features are stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKey {
    Mfcc,
    MelSpec,
}

impl FeatureKey {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKey::Mfcc => "mfcc",
            FeatureKey::MelSpec => "melspec",
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segment-level feature extractor.
pub trait FeatureExtractor: Send + Sync {
    /// Extract features from one mono segment sampled at `sample_rate`.
    fn extract(&self, segment: &[f32], sample_rate: u32) -> Result<FeatureMatrix, TransformError>;

    /// Key the features are stored under.
    fn feature_key(&self) -> FeatureKey;

    /// How many frames a full-length segment must produce.
    fn frame_rule(&self) -> FrameRule;
}

/// Padding behaviour requested from a [`FixedLengthExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Pad or truncate to the extractor's maximum frame count.
    MaxLength,
    /// Return however many frames the input yields.
    DoNotPad,
}

/// Feature extractor with a model-defined input rate and output length.
pub trait FixedLengthExtractor: Send + Sync {
    /// Rate the extractor expects its samples at.
    fn sample_rate(&self) -> u32;

    /// Frame count produced under [`Padding::MaxLength`].
    fn frame_count(&self) -> usize;

    fn extract(
        &self,
        samples: &[f32],
        sampling_rate: u32,
        padding: Padding,
    ) -> Result<FeatureMatrix, TransformError>;
}

fn check_rate(expected: u32, actual: u32) -> Result<(), TransformError> {
    if actual == 0 {
        return Err(TransformError::InvalidConfig("sample_rate must be > 0".into()));
    }
    if expected != actual {
        return Err(TransformError::SampleRate { expected, actual });
    }
    Ok(())
}

/// Mel-frequency cepstral coefficients.
#[derive(Debug)]
pub struct Mfcc {
    spectrogram: MelSpectrogram,
    dct: Vec<Vec<f32>>,
    n_coefficients: usize,
}

impl Mfcc {
    pub fn new(sample_rate: u32, config: &MfccConfig) -> Result<Self, TransformError> {
        if config.n_coefficients == 0 || config.n_coefficients > config.n_mels {
            return Err(TransformError::InvalidConfig(format!(
                "n_coefficients must be in 1..={}, got {}",
                config.n_mels, config.n_coefficients
            )));
        }
        let spectrogram = MelSpectrogram::new(SpectrogramConfig::full_band(
            sample_rate,
            config.n_fft,
            config.hop_length,
            config.n_mels,
        ))?;

        Ok(Self {
            spectrogram,
            dct: dct_matrix(config.n_coefficients, config.n_mels),
            n_coefficients: config.n_coefficients,
        })
    }
}

impl FeatureExtractor for Mfcc {
    fn extract(&self, segment: &[f32], sample_rate: u32) -> Result<FeatureMatrix, TransformError> {
        check_rate(self.spectrogram.config().sample_rate, sample_rate)?;

        let mut mel = self.spectrogram.transform(segment)?;
        if mel.is_empty() {
            return Ok(FeatureMatrix::default());
        }
        power_to_db(&mut mel, Some(TOP_DB));

        let rows = mel
            .iter()
            .map(|frame| {
                (0..self.n_coefficients)
                    .map(|k| {
                        frame
                            .iter()
                            .zip(&self.dct)
                            .map(|(v, basis)| v * basis[k])
                            .sum()
                    })
                    .collect()
            })
            .collect();

        Ok(FeatureMatrix::from_rows(rows))
    }

    fn feature_key(&self) -> FeatureKey {
        FeatureKey::Mfcc
    }

    fn frame_rule(&self) -> FrameRule {
        FrameRule::Hop(self.spectrogram.config().hop_length)
    }
}

/// Mel spectrogram in decibels.
///
/// The dB conversion runs after the mel projection, on mel power. Prior
/// datasets were produced in this order and must stay reproducible.
#[derive(Debug)]
pub struct MelSpec {
    spectrogram: MelSpectrogram,
}

impl MelSpec {
    pub fn new(sample_rate: u32, config: &MelSpecConfig) -> Result<Self, TransformError> {
        let spectrogram = MelSpectrogram::new(SpectrogramConfig {
            sample_rate,
            n_fft: config.n_fft,
            win_length: config.win_length,
            hop_length: config.hop_length,
            n_mels: config.n_mels,
            f_min: 0.0,
            f_max: sample_rate as f32 / 2.0,
        })?;
        Ok(Self { spectrogram })
    }
}

impl FeatureExtractor for MelSpec {
    fn extract(&self, segment: &[f32], sample_rate: u32) -> Result<FeatureMatrix, TransformError> {
        check_rate(self.spectrogram.config().sample_rate, sample_rate)?;

        let mut mel = self.spectrogram.transform(segment)?;
        if !mel.is_empty() {
            power_to_db(&mut mel, Some(TOP_DB));
        }
        Ok(FeatureMatrix::from_rows(mel))
    }

    fn feature_key(&self) -> FeatureKey {
        FeatureKey::MelSpec
    }

    fn frame_rule(&self) -> FrameRule {
        FrameRule::Hop(self.spectrogram.config().hop_length)
    }
}

/// Resample to the model rate and delegate to a fixed-length extractor.
#[derive(Debug)]
pub struct Pretrained<E = AstFeatureExtractor> {
    extractor: E,
}

impl Pretrained<AstFeatureExtractor> {
    pub fn new(config: &PretrainedConfig) -> Result<Self, TransformError> {
        let extractor = AstFeatureExtractor::new(FbankConfig {
            sample_rate: config.target_sample_rate,
            frame_shift_ms: config.frame_shift_ms,
            max_frames: config.max_frames,
            ..FbankConfig::default()
        })?;
        Ok(Self { extractor })
    }
}

impl<E: FixedLengthExtractor> Pretrained<E> {
    pub fn with_extractor(extractor: E) -> Self {
        Self { extractor }
    }
}

impl<E: FixedLengthExtractor> FeatureExtractor for Pretrained<E> {
    fn extract(&self, segment: &[f32], sample_rate: u32) -> Result<FeatureMatrix, TransformError> {
        if sample_rate == 0 {
            return Err(TransformError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if segment.is_empty() {
            return Ok(FeatureMatrix::default());
        }

        let target = self.extractor.sample_rate();
        let samples = resample(segment, sample_rate, target)?;
        self.extractor.extract(&samples, target, Padding::MaxLength)
    }

    fn feature_key(&self) -> FeatureKey {
        FeatureKey::MelSpec
    }

    fn frame_rule(&self) -> FrameRule {
        FrameRule::Fixed(self.extractor.frame_count())
    }
}

/// Build the extractor a transform configuration names.
pub fn build_extractor(
    sample_rate: u32,
    config: &TransformConfig,
) -> Result<Box<dyn FeatureExtractor>, TransformError> {
    Ok(match config {
        TransformConfig::Mfcc(c) => Box::new(Mfcc::new(sample_rate, c)?),
        TransformConfig::MelSpec(c) => Box::new(MelSpec::new(sample_rate, c)?),
        TransformConfig::Pretrained(c) => Box::new(Pretrained::new(c)?),
    })
}
