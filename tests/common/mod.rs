//! Shared fixtures: small genre trees of synthetic WAV files.

#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::Path;

/// Write a mono 16-bit WAV holding a tone at `freq` Hz.
pub fn write_tone(path: &Path, sample_rate: u32, seconds: f32, freq: f32) {
    write_wav(path, sample_rate, 1, &tone(sample_rate, seconds, freq));
}

pub fn tone(sample_rate: u32, seconds: f32, freq: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Write interleaved `samples` as a 16-bit WAV.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer
            .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .unwrap();
    }
    writer.finalize().unwrap();
}

/// One tone file per `(genre, file, seconds)` under `root`.
pub fn genre_tree(root: &Path, sample_rate: u32, files: &[(&str, &str, f32)]) {
    for (i, (genre, name, seconds)) in files.iter().enumerate() {
        let freq = 220.0 * (i + 1) as f32;
        write_tone(&root.join(genre).join(name), sample_rate, *seconds, freq);
    }
}
