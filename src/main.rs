use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use genre_features::{
    ChannelMode, Driver, ExtractionConfig, MelSpecConfig, MfccConfig, PretrainedConfig,
    TransformConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "genre-features",
    version,
    about = "Extract segment-level audio features for genre classification",
    long_about = "Extract segment-level audio features for genre classification.\n\n\
        Every sub-directory of DATASET is a genre. Label ids follow the sorted \
        order of the genre directory names, not the filesystem's listing order."
)]
struct Cli {
    /// Directory whose sub-directories are genres
    #[arg(env = "GENRE_FEATURES_DATASET")]
    dataset: PathBuf,

    /// Path of the JSON document to write
    #[arg(env = "GENRE_FEATURES_OUTPUT")]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = Transform::Mfcc, env = "GENRE_FEATURES_TRANSFORM")]
    transform: Transform,

    /// Sample rate every input file must have
    #[arg(long, default_value_t = ExtractionConfig::DEFAULT_SAMPLE_RATE, env = "GENRE_FEATURES_SAMPLE_RATE")]
    sample_rate: u32,

    /// Nominal track duration in seconds
    #[arg(long, default_value_t = ExtractionConfig::DEFAULT_TRACK_DURATION, env = "GENRE_FEATURES_DURATION")]
    duration: f64,

    /// Segments per track (default: 10, or derived for the pretrained transform)
    #[arg(long, env = "GENRE_FEATURES_SEGMENTS")]
    segments: Option<usize>,

    #[arg(long, env = "GENRE_FEATURES_N_MFCC")]
    n_mfcc: Option<usize>,

    /// Mel bands for melspec (mfcc always uses 128)
    #[arg(long, env = "GENRE_FEATURES_N_MELS")]
    n_mels: Option<usize>,

    #[arg(long, env = "GENRE_FEATURES_N_FFT")]
    n_fft: Option<usize>,

    #[arg(long, env = "GENRE_FEATURES_WIN_LENGTH")]
    win_length: Option<usize>,

    #[arg(long, env = "GENRE_FEATURES_HOP_LENGTH")]
    hop_length: Option<usize>,

    /// How multi-channel files are reduced to mono
    #[arg(long, value_enum, default_value_t = Channels::First, env = "GENRE_FEATURES_CHANNELS")]
    channels: Channels,

    /// Files extracted concurrently
    #[arg(long, default_value_t = 1, env = "GENRE_FEATURES_WORKERS")]
    workers: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Transform {
    /// Cepstral coefficients, stored under "mfcc"
    Mfcc,
    /// Mel spectrogram in dB, stored under "melspec"
    Melspec,
    /// Audio spectrogram transformer filterbank, stored under "melspec"
    #[value(alias = "ast")]
    Pretrained,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Channels {
    First,
    Mean,
}

impl Cli {
    fn transform_config(&self) -> TransformConfig {
        match self.transform {
            Transform::Mfcc => {
                if self.win_length.is_some() {
                    warn!("--win-length is ignored by the mfcc transform");
                }
                // Cepstra are always taken over 128 mel bands
                if self.n_mels.is_some() {
                    warn!("--n-mels is ignored by the mfcc transform");
                }
                let defaults = MfccConfig::default();
                TransformConfig::Mfcc(MfccConfig {
                    n_coefficients: self.n_mfcc.unwrap_or(defaults.n_coefficients),
                    n_fft: self.n_fft.unwrap_or(defaults.n_fft),
                    hop_length: self.hop_length.unwrap_or(defaults.hop_length),
                    ..defaults
                })
            }
            Transform::Melspec => {
                if self.n_mfcc.is_some() {
                    warn!("--n-mfcc is ignored by the melspec transform");
                }
                let defaults = MelSpecConfig::default();
                TransformConfig::MelSpec(MelSpecConfig {
                    n_mels: self.n_mels.unwrap_or(defaults.n_mels),
                    n_fft: self.n_fft.unwrap_or(defaults.n_fft),
                    win_length: self.win_length.unwrap_or(defaults.win_length),
                    hop_length: self.hop_length.unwrap_or(defaults.hop_length),
                })
            }
            Transform::Pretrained => {
                let knobs = [
                    self.n_mfcc,
                    self.n_mels,
                    self.n_fft,
                    self.win_length,
                    self.hop_length,
                ];
                if knobs.iter().any(Option::is_some) {
                    warn!("spectral options are fixed by the pretrained transform and ignored");
                }
                TransformConfig::Pretrained(PretrainedConfig::default())
            }
        }
    }

    fn into_config(self) -> ExtractionConfig {
        let transform = self.transform_config();
        let segment_count = self
            .segments
            .unwrap_or_else(|| transform.default_segment_count(self.duration));

        ExtractionConfig {
            dataset_path: self.dataset,
            output_path: self.output,
            sample_rate: self.sample_rate,
            track_duration_seconds: self.duration,
            segment_count,
            transform,
            channel_mode: match self.channels {
                Channels::First => ChannelMode::First,
                Channels::Mean => ChannelMode::Mean,
            },
            workers: self.workers,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();
    info!(
        dataset = %config.dataset_path.display(),
        output = %config.output_path.display(),
        segments = config.segment_count,
        "Starting feature extraction"
    );

    let driver = Driver::new(config).context("Failed to set up extraction")?;
    let summary = driver.run().context("Extraction failed")?;

    info!(
        accepted = summary.segments_accepted,
        skipped_files = summary.files_skipped,
        "Done"
    );
    Ok(())
}
