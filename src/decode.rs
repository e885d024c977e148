//! Track loading: symphonia decodes any container it can probe, rubato
//! converts between sample rates for the pretrained transform.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

use crate::config::ChannelMode;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot open file: {0}")]
    Io(#[from] std::io::Error),
    #[error("container/codec error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("no audio track in container")]
    NoAudioTrack,
    #[error("stream does not report a sample rate or channel layout")]
    UnsupportedCodec,
    #[error("stream decoded to zero samples")]
    Empty,
}

/// Decoded audio samples, interleaved.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Mono sample buffer at a known rate.
#[derive(Debug, Clone)]
pub struct Track {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Track {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

impl DecodedAudio {
    /// Convert to mono by averaging channels.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }

    /// Keep only the first channel.
    pub fn first_channel(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples.iter().step_by(self.channels).copied().collect()
    }

    /// Reduce to a mono [`Track`].
    pub fn into_track(self, mode: ChannelMode) -> Track {
        let samples = match (mode, self.channels) {
            (_, 0 | 1) => self.samples,
            (ChannelMode::First, _) => self.first_channel(),
            (ChannelMode::Mean, _) => self.to_mono(),
        };
        Track {
            samples,
            sample_rate: self.sample_rate,
        }
    }
}

/// Resample mono audio using sinc interpolation (rubato).
///
/// Output length is `round(len * to / from)`. `SincFixedIn` output is
/// aligned with its input, so nothing is trimmed from the front.
pub fn resample(
    mono: &[f32],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, crate::transform::TransformError> {
    if from_rate == to_rate || mono.is_empty() {
        return Ok(mono.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let resample_ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;

    // max_resample_ratio_relative must cover actual ratio (e.g., 8kHz→32kHz = 4x)
    let max_ratio = resample_ratio.max(1.0 / resample_ratio) * 1.1;

    let mut resampler = SincFixedIn::<f32>::new(
        resample_ratio,
        max_ratio,
        params,
        chunk_size,
        1, // mono
    )?;

    let expected_len = (mono.len() as f64 * resample_ratio).round() as usize;
    let mut output = Vec::with_capacity(expected_len + chunk_size);
    let mut pos = 0;

    // Process in chunks, padding the last one with silence
    while pos < mono.len() || output.len() < expected_len {
        let end = (pos + chunk_size).min(mono.len());
        let mut chunk = mono[pos.min(end)..end].to_vec();
        chunk.resize(chunk_size, 0.0);

        let input = vec![chunk];
        let resampled = resampler.process(&input, None)?;
        output.extend_from_slice(&resampled[0]);

        pos += chunk_size;
    }

    output.truncate(expected_len);

    Ok(output)
}

/// Decode every packet of the first audio track in `path` to interleaved f32.
///
/// The extension is only a probe hint; content decides the format.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let mut format = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?
        .format;

    let track = format
        .default_track()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| {
            format
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        })
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packet, the stream itself is still usable
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = %path.display(), error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        // Packets can grow (e.g. variable block sizes), so regrow the buffer
        let needed = decoded.capacity() * spec.channels.count();
        let buf = match buffer.take() {
            Some(buf) if buf.capacity() >= needed => buffer.insert(buf),
            _ => buffer.insert(SampleBuffer::new(decoded.capacity() as u64, spec)),
        };
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    let (Some(sample_rate), Some(channels)) = (sample_rate, channels) else {
        return Err(DecodeError::UnsupportedCodec);
    };
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_resample() {
        let samples: Vec<f32> = (0..44100).map(|i| (i as f32 / 44100.0).sin()).collect();

        let resampled = resample(&samples, 44100, 22050).unwrap();
        assert_eq!(resampled.len(), 22050);
    }

    #[test]
    fn test_resample_preserves_slow_signal() {
        // 5 Hz sine survives 22.05k -> 16k with its phase intact
        let tone = |rate: f32, n: usize| -> Vec<f32> {
            (0..n)
                .map(|i| (2.0 * std::f32::consts::PI * 5.0 * i as f32 / rate).sin())
                .collect()
        };
        let resampled = resample(&tone(22050.0, 22050), 22050, 16000).unwrap();
        let expected = tone(16000.0, 16000);

        assert_eq!(resampled.len(), 16000);
        for i in (2000..14000).step_by(500) {
            assert!((resampled[i] - expected[i]).abs() < 0.02, "sample {i}");
        }
    }

    #[test]
    fn test_resample_keeps_head_and_tail() {
        let ones = vec![1.0f32; 22050];
        let resampled = resample(&ones, 22050, 16000).unwrap();

        assert_eq!(resampled.len(), 16000);
        // No samples lost at the front, no silence appended at the back
        assert!(resampled[..100].iter().all(|&s| s > 0.5), "head");
        assert!(resampled[15900..].iter().all(|&s| s > 0.5), "tail");
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.25f32; 100];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
        assert!(resample(&[], 22050, 16000).unwrap().is_empty());
    }

    #[test]
    fn test_channel_reduction() {
        let audio = DecodedAudio {
            samples: vec![1.0, 3.0, -1.0, 1.0],
            sample_rate: 22050,
            channels: 2,
        };
        assert_eq!(audio.first_channel(), vec![1.0, -1.0]);
        assert_eq!(audio.to_mono(), vec![2.0, 0.0]);
        assert_eq!(audio.clone().into_track(ChannelMode::First).samples, vec![1.0, -1.0]);
        assert_eq!(audio.into_track(ChannelMode::Mean).samples, vec![2.0, 0.0]);
    }

    #[test]
    fn test_decode_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let frames: Vec<Vec<i16>> = (0..2205).map(|i| vec![(i % 100) as i16 * 100, -16384]).collect();
        write_wav(&path, 2, 22050, &frames);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.samples.len(), 4410);

        let track = audio.into_track(ChannelMode::First);
        assert_eq!(track.samples.len(), 2205);
        assert!((track.samples[1] - 100.0 / 32768.0).abs() < 1e-6);
        assert!((track.duration_seconds() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(decode_file(&path).is_err());

        assert!(matches!(
            decode_file(&dir.path().join("missing.wav")),
            Err(DecodeError::Io(_))
        ));
    }
}
