//! Kaldi-compatible log-mel filterbank for audio spectrogram transformers.
//!
//! Produces the fixed `[1024][128]` input an AST-style model is trained on:
//! 25 ms Hann frames every 10 ms at 16 kHz, DC removal, pre-emphasis,
//! 128 triangular bins on Kaldi's mel scale, natural log, then padding or
//! truncation to `max_frames` and mean/std normalisation.

use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::transform::{FeatureMatrix, FixedLengthExtractor, Padding, TransformError};

/// Filterbank and normalisation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FbankConfig {
    pub sample_rate: u32,
    pub frame_length_ms: f32,
    pub frame_shift_ms: f32,
    pub num_mel_bins: usize,
    pub low_freq: f32,
    /// Upper edge in Hz. Values `<= 0` are an offset from Nyquist.
    pub high_freq: f32,
    pub preemphasis: f32,
    pub max_frames: usize,
    pub mean: f32,
    pub std: f32,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_length_ms: 25.0,
            frame_shift_ms: 10.0,
            num_mel_bins: 128,
            low_freq: 20.0,
            high_freq: 0.0,
            preemphasis: 0.97,
            max_frames: 1024,
            // AudioSet statistics the pretrained checkpoints were normalised with
            mean: -4.2677393,
            std: 4.5689974,
        }
    }
}

#[derive(Debug, Clone)]
struct MelBin {
    first_bin: usize,
    weights: Vec<f32>,
}

/// Fixed-length filterbank extractor matching the AST preprocessing.
pub struct AstFeatureExtractor {
    config: FbankConfig,
    window_size: usize,
    window_shift: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_bins: Vec<MelBin>,
}

impl std::fmt::Debug for AstFeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstFeatureExtractor")
            .field("config", &self.config)
            .field("window_size", &self.window_size)
            .field("window_shift", &self.window_shift)
            .finish_non_exhaustive()
    }
}

impl AstFeatureExtractor {
    pub fn new(config: FbankConfig) -> Result<Self, TransformError> {
        if config.sample_rate == 0 {
            return Err(TransformError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if config.num_mel_bins == 0 || config.max_frames == 0 {
            return Err(TransformError::InvalidConfig(
                "num_mel_bins and max_frames must be > 0".into(),
            ));
        }
        if config.std <= 0.0 {
            return Err(TransformError::InvalidConfig("std must be > 0".into()));
        }

        let window_size =
            (config.sample_rate as f64 * config.frame_length_ms as f64 / 1000.0) as usize;
        let window_shift =
            (config.sample_rate as f64 * config.frame_shift_ms as f64 / 1000.0) as usize;
        if window_size < 2 || window_shift == 0 {
            return Err(TransformError::InvalidConfig(format!(
                "frame length/shift too small for {} Hz",
                config.sample_rate
            )));
        }

        let padded_size = window_size.next_power_of_two();
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(padded_size);

        // Symmetric Hann window
        let window = (0..window_size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (window_size - 1) as f32).cos())
            .collect();

        let nyquist = config.sample_rate as f32 / 2.0;
        let high_freq = if config.high_freq <= 0.0 {
            nyquist + config.high_freq
        } else {
            config.high_freq
        };
        if !(config.low_freq >= 0.0 && high_freq > config.low_freq && high_freq <= nyquist) {
            return Err(TransformError::InvalidConfig(format!(
                "bad filterbank range {}..{} Hz",
                config.low_freq, high_freq
            )));
        }

        let mel_bins = create_kaldi_mel_bins(
            config.num_mel_bins,
            padded_size,
            config.sample_rate,
            config.low_freq,
            high_freq,
        );

        Ok(Self {
            config,
            window_size,
            window_shift,
            fft,
            window,
            mel_bins,
        })
    }

    /// Number of frames before padding for `n_samples` input samples.
    pub fn n_frames(&self, n_samples: usize) -> usize {
        if n_samples < self.window_size {
            0
        } else {
            1 + (n_samples - self.window_size) / self.window_shift
        }
    }

    /// Raw log-mel energies, `[n_frames][num_mel_bins]`.
    fn fbank(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>, TransformError> {
        let n_frames = self.n_frames(samples.len());
        let mut frames = Vec::with_capacity(n_frames);

        let mut frame_buf = vec![0.0f32; self.window_size];
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; spectrum.len()];

        for frame in 0..n_frames {
            let start = frame * self.window_shift;
            frame_buf.copy_from_slice(&samples[start..start + self.window_size]);

            // Remove DC offset
            let mean = frame_buf.iter().sum::<f32>() / self.window_size as f32;
            frame_buf.iter_mut().for_each(|x| *x -= mean);

            // Pre-emphasis, first sample against itself
            for i in (1..self.window_size).rev() {
                frame_buf[i] -= self.config.preemphasis * frame_buf[i - 1];
            }
            frame_buf[0] -= self.config.preemphasis * frame_buf[0];

            input.fill(0.0);
            for (i, (x, w)) in frame_buf.iter().zip(&self.window).enumerate() {
                input[i] = x * w;
            }

            self.fft.process(&mut input, &mut spectrum)?;

            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                *p = c.norm_sqr();
            }

            let energies: Vec<f32> = self
                .mel_bins
                .iter()
                .map(|bin| {
                    let energy: f32 = bin
                        .weights
                        .iter()
                        .zip(&power[bin.first_bin..])
                        .map(|(w, p)| w * p)
                        .sum();
                    energy.max(f32::EPSILON).ln()
                })
                .collect();
            frames.push(energies);
        }

        Ok(frames)
    }
}

impl FixedLengthExtractor for AstFeatureExtractor {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn frame_count(&self) -> usize {
        self.config.max_frames
    }

    fn extract(
        &self,
        samples: &[f32],
        sampling_rate: u32,
        padding: Padding,
    ) -> Result<FeatureMatrix, TransformError> {
        if sampling_rate != self.config.sample_rate {
            return Err(TransformError::SampleRate {
                expected: self.config.sample_rate,
                actual: sampling_rate,
            });
        }

        let mut frames = self.fbank(samples)?;
        if frames.is_empty() {
            return Ok(FeatureMatrix::default());
        }

        if padding == Padding::MaxLength {
            frames.resize(self.config.max_frames, vec![0.0; self.config.num_mel_bins]);
        }

        let scale = 1.0 / (2.0 * self.config.std);
        for v in frames.iter_mut().flat_map(|row| row.iter_mut()) {
            *v = (*v - self.config.mean) * scale;
        }

        Ok(FeatureMatrix::from_rows(frames))
    }
}

/// Kaldi triangular bins over the first `padded_size / 2` FFT bins.
///
/// The Nyquist bin carries no weight.
fn create_kaldi_mel_bins(
    num_bins: usize,
    padded_size: usize,
    sample_rate: u32,
    low_freq: f32,
    high_freq: f32,
) -> Vec<MelBin> {
    let mel = |hz: f32| 1127.0 * (1.0 + hz / 700.0).ln();

    let num_fft_bins = padded_size / 2;
    let fft_bin_width = sample_rate as f32 / padded_size as f32;

    let mel_low = mel(low_freq);
    let mel_high = mel(high_freq);
    let mel_delta = (mel_high - mel_low) / (num_bins + 1) as f32;

    let bin_mels: Vec<f32> = (0..num_fft_bins)
        .map(|i| mel(fft_bin_width * i as f32))
        .collect();

    (0..num_bins)
        .map(|b| {
            let left = mel_low + b as f32 * mel_delta;
            let center = mel_low + (b + 1) as f32 * mel_delta;
            let right = mel_low + (b + 2) as f32 * mel_delta;

            let weights: Vec<f32> = bin_mels
                .iter()
                .map(|&m| {
                    let up = (m - left) / (center - left);
                    let down = (right - m) / (right - center);
                    up.min(down).max(0.0)
                })
                .collect();

            let first_bin = weights.iter().position(|&w| w > 0.0).unwrap_or(0);
            let last_bin = weights
                .iter()
                .rposition(|&w| w > 0.0)
                .map_or(first_bin, |i| i + 1);

            MelBin {
                first_bin,
                weights: weights[first_bin..last_bin].to_vec(),
            }
        })
        .collect()
}
