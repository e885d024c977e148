//! Spectrogram computation: centered STFT -> power -> HTK mel filterbank.
//!
//! Frame layout, windowing and filter shapes follow torchaudio's
//! `MelSpectrogram` defaults so features line up with models trained on
//! torchaudio output: reflect padding of `n_fft / 2` on both sides, periodic
//! Hann window of `win_length` centered inside `n_fft`, no filter area
//! normalisation.

use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::transform::TransformError;

/// Floor applied to power values before taking the logarithm.
const AMIN: f32 = 1e-10;

/// Spectrogram configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: f32,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 2048,
            win_length: 2048,
            hop_length: 512,
            n_mels: 128,
            f_min: 0.0,
            f_max: 11025.0, // Nyquist for 22.05kHz
        }
    }
}

impl SpectrogramConfig {
    /// Full-band config for `sample_rate` with `win_length == n_fft`.
    pub fn full_band(sample_rate: u32, n_fft: usize, hop_length: usize, n_mels: usize) -> Self {
        Self {
            sample_rate,
            n_fft,
            win_length: n_fft,
            hop_length,
            n_mels,
            f_min: 0.0,
            f_max: sample_rate as f32 / 2.0,
        }
    }
}

/// Non-zero span of one triangular mel filter.
#[derive(Debug, Clone)]
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

/// Precomputed power mel spectrogram transform.
pub struct MelSpectrogram {
    config: SpectrogramConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<MelFilter>,
}

impl std::fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MelSpectrogram {
    pub fn new(config: SpectrogramConfig) -> Result<Self, TransformError> {
        if config.sample_rate == 0 {
            return Err(TransformError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if config.n_fft < 2 {
            return Err(TransformError::InvalidConfig("n_fft must be >= 2".into()));
        }
        if config.win_length == 0 || config.win_length > config.n_fft {
            return Err(TransformError::InvalidConfig(format!(
                "win_length must be in 1..={}, got {}",
                config.n_fft, config.win_length
            )));
        }
        if config.hop_length == 0 {
            return Err(TransformError::InvalidConfig("hop_length must be > 0".into()));
        }
        if config.n_mels == 0 {
            return Err(TransformError::InvalidConfig("n_mels must be > 0".into()));
        }
        if !(config.f_min >= 0.0 && config.f_max > config.f_min) {
            return Err(TransformError::InvalidConfig(format!(
                "need 0 <= f_min < f_max, got {}..{}",
                config.f_min, config.f_max
            )));
        }

        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        // Periodic Hann window, zero-padded on both sides up to n_fft
        let offset = (config.n_fft - config.win_length) / 2;
        let mut window = vec![0.0f32; config.n_fft];
        for i in 0..config.win_length {
            window[offset + i] =
                0.5 - 0.5 * (2.0 * PI * i as f32 / config.win_length as f32).cos();
        }

        let mel_filterbank = create_mel_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.f_min,
            config.f_max,
        );

        Ok(Self {
            config,
            fft,
            window,
            mel_filterbank,
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Number of frames produced for `n_samples` input samples.
    ///
    /// Zero when the input is too short to be reflect-padded.
    pub fn n_frames(&self, n_samples: usize) -> usize {
        let pad = self.config.n_fft / 2;
        if n_samples <= pad {
            return 0;
        }
        let padded = n_samples + 2 * pad;
        if padded < self.config.n_fft {
            return 0;
        }
        (padded - self.config.n_fft) / self.config.hop_length + 1
    }

    /// Compute the power mel spectrogram of mono `samples`.
    ///
    /// Output: `[n_frames][n_mels]`, time-major. Empty for inputs too short to
    /// frame.
    pub fn transform(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>, TransformError> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_frames = self.n_frames(samples.len());

        if n_frames == 0 {
            return Ok(Vec::new());
        }

        let padded = reflect_pad(samples, n_fft / 2);
        let mut spectrogram = Vec::with_capacity(n_frames);

        // Scratch buffers
        let mut input = self.fft.make_input_vec();
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; spectrum.len()];

        for frame in 0..n_frames {
            let start = frame * hop;

            for (i, slot) in input.iter_mut().enumerate() {
                *slot = padded[start + i] * self.window[i];
            }

            self.fft.process(&mut input, &mut spectrum)?;

            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                *p = c.norm_sqr();
            }

            let mels: Vec<f32> = self
                .mel_filterbank
                .iter()
                .map(|filter| {
                    filter
                        .weights
                        .iter()
                        .zip(&power[filter.first_bin..])
                        .map(|(w, p)| w * p)
                        .sum()
                })
                .collect();
            spectrogram.push(mels);
        }

        Ok(spectrogram)
    }
}

/// Mirror `pad` samples on each side, excluding the edge sample itself.
///
/// Requires `pad < samples.len()`.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    let mut padded = Vec::with_capacity(n + 2 * pad);
    padded.extend((1..=pad).rev().map(|i| samples[i]));
    padded.extend_from_slice(samples);
    padded.extend((1..=pad).map(|i| samples[n - 1 - i]));
    padded
}

/// Convert a power spectrogram to decibels in place (`ref = 1.0`).
///
/// With `top_db`, values are floored at `max - top_db` where `max` is taken
/// over the whole matrix.
pub fn power_to_db(spectrogram: &mut [Vec<f32>], top_db: Option<f32>) {
    let mut max = f32::NEG_INFINITY;
    for v in spectrogram.iter_mut().flat_map(|row| row.iter_mut()) {
        *v = 10.0 * v.max(AMIN).log10();
        max = max.max(*v);
    }

    if let Some(top_db) = top_db {
        let floor = max - top_db;
        for v in spectrogram.iter_mut().flat_map(|row| row.iter_mut()) {
            *v = v.max(floor);
        }
    }
}

/// Orthonormal DCT-II basis as a `[n_mels][n_coefficients]` matrix.
pub fn dct_matrix(n_coefficients: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n = n_mels as f32;
    (0..n_mels)
        .map(|m| {
            (0..n_coefficients)
                .map(|k| {
                    let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
                    scale * (PI / n * (m as f32 + 0.5) * k as f32).cos()
                })
                .collect()
        })
        .collect()
}

/// Create HTK-scale triangular mel filters over `n_fft / 2 + 1` linear bins.
fn create_mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    f_min: f32,
    f_max: f32,
) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;

    // Convert Hz to Mel
    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0);

    // Center frequency of every FFT bin
    let nyquist = sample_rate as f32 / 2.0;
    let bin_freqs: Vec<f32> = (0..n_bins)
        .map(|i| nyquist * i as f32 / (n_bins - 1) as f32)
        .collect();

    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);

    // Mel points (n_mels + 2 for edges), back in Hz
    let hz_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let weights: Vec<f32> = bin_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - left) / (center - left);
                    let falling = (right - f) / (right - center);
                    rising.min(falling).max(0.0)
                })
                .collect();

            let first_bin = weights.iter().position(|&w| w > 0.0).unwrap_or(0);
            let last_bin = weights
                .iter()
                .rposition(|&w| w > 0.0)
                .map_or(first_bin, |i| i + 1);

            MelFilter {
                first_bin,
                weights: weights[first_bin..last_bin].to_vec(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_spectrogram_output_shape() {
        let transform = MelSpectrogram::new(SpectrogramConfig::default()).unwrap();

        // One 3 s segment at 22.05kHz
        let samples = sine(440.0, 22050, 66150);
        let spec = transform.transform(&samples).unwrap();

        // 1 + 66150 / 512 = 130
        assert_eq!(transform.n_frames(66150), 130);
        assert_eq!(spec.len(), 130);
        assert!(spec.iter().all(|row| row.len() == 128));
    }

    #[test]
    fn test_short_input_is_empty() {
        let transform = MelSpectrogram::new(SpectrogramConfig::default()).unwrap();
        assert!(transform.transform(&[]).unwrap().is_empty());
        assert!(transform.transform(&vec![0.1; 1024]).unwrap().is_empty());
        assert_eq!(transform.transform(&vec![0.1; 1025]).unwrap().len(), 3);
    }

    #[test]
    fn test_sine_energy_lands_in_matching_band() {
        let config = SpectrogramConfig::full_band(22050, 2048, 512, 64);
        let transform = MelSpectrogram::new(config).unwrap();
        let spec = transform.transform(&sine(1000.0, 22050, 22050)).unwrap();

        let frame = &spec[spec.len() / 2];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();

        // 1 kHz sits roughly a fifth of the way up a 0..11025 Hz HTK scale
        let mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
        let expected = (mel(1000.0) / mel(11025.0) * 65.0) as usize;
        assert!(peak.abs_diff(expected) <= 1, "peak {peak}, expected ~{expected}");
    }

    #[test]
    fn test_rejects_bad_config() {
        let mut config = SpectrogramConfig::default();
        config.win_length = 4096;
        assert!(MelSpectrogram::new(config).is_err());

        let mut config = SpectrogramConfig::default();
        config.sample_rate = 0;
        assert!(MelSpectrogram::new(config).is_err());

        let mut config = SpectrogramConfig::default();
        config.hop_length = 0;
        assert!(MelSpectrogram::new(config).is_err());
    }

    #[test]
    fn test_reflect_pad() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_filters_are_triangles() {
        let filters = create_mel_filterbank(22050, 2048, 128, 0.0, 11025.0);
        assert_eq!(filters.len(), 128);
        for filter in &filters {
            assert!(filter.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
            assert!(filter.first_bin + filter.weights.len() <= 1025);
        }
    }

    #[test]
    fn test_power_to_db_floor() {
        let mut spec = vec![vec![1.0, 0.1], vec![1e-12, 0.0]];
        power_to_db(&mut spec, Some(20.0));

        assert!((spec[0][0] - 0.0).abs() < 1e-5);
        assert!((spec[0][1] + 10.0).abs() < 1e-4);
        // -100 dB and the amin floor are both clamped to max - top_db
        assert_eq!(spec[1][0], -20.0);
        assert_eq!(spec[1][1], -20.0);
    }

    #[test]
    fn test_power_to_db_without_floor() {
        let mut spec = vec![vec![100.0, 0.0]];
        power_to_db(&mut spec, None);
        assert!((spec[0][0] - 20.0).abs() < 1e-4);
        assert!((spec[0][1] + 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_dct_is_orthonormal() {
        let dct = dct_matrix(13, 40);
        for a in 0..13 {
            for b in 0..13 {
                let dot: f32 = (0..40).map(|m| dct[m][a] * dct[m][b]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "({a}, {b}) -> {dot}");
            }
        }
    }
}
