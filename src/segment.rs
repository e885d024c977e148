//! Fixed-length segmentation of a nominal-duration track.
//!
//! The plan is derived from configuration only. It knows nothing about the
//! actual length of a decoded file: short tracks produce short or empty slices
//! that the validator later rejects.

use crate::error::ConfigError;

/// How a transform's expected frame count is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRule {
    /// One frame per `hop_length` samples, rounded up.
    Hop(usize),
    /// Transform always emits this many frames.
    Fixed(usize),
}

/// Segment geometry shared by every file of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    pub segment_count: usize,
    pub samples_per_segment: usize,
    pub expected_frame_count: usize,
}

impl SegmentPlan {
    pub fn new(
        sample_rate: u32,
        duration_seconds: f64,
        segment_count: usize,
        rule: FrameRule,
    ) -> Result<Self, ConfigError> {
        if segment_count == 0 {
            return Err(ConfigError::ZeroSegmentCount);
        }
        if sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(ConfigError::InvalidDuration(duration_seconds));
        }

        let samples_per_track = (sample_rate as f64 * duration_seconds).floor() as usize;
        let samples_per_segment = samples_per_track / segment_count;

        let expected_frame_count = match rule {
            FrameRule::Fixed(frames) => frames,
            FrameRule::Hop(0) => return Err(ConfigError::ZeroHopLength),
            FrameRule::Hop(hop) => samples_per_segment.div_ceil(hop),
        };

        Ok(Self {
            segment_count,
            samples_per_segment,
            expected_frame_count,
        })
    }

    /// True when `rule` is a hop that divides `samples_per_segment` exactly.
    ///
    /// A centered STFT then emits `samples_per_segment / hop + 1` frames, one
    /// more than the expected count, so every full segment is rejected.
    pub fn hop_aligned(&self, rule: FrameRule) -> bool {
        matches!(rule, FrameRule::Hop(hop) if hop > 0 && self.samples_per_segment % hop == 0)
    }

    /// Nominal `[start, end)` sample range of a segment. Not clamped to any buffer.
    pub fn bounds(&self, index: usize) -> (usize, usize) {
        let start = self.samples_per_segment * index;
        (start, start + self.samples_per_segment)
    }

    /// Slice of `samples` covered by a segment, clamped to the buffer.
    ///
    /// Past the end of the buffer this is shorter than `samples_per_segment`
    /// or empty.
    pub fn slice<'a>(&self, samples: &'a [f32], index: usize) -> &'a [f32] {
        let (start, end) = self.bounds(index);
        let start = start.min(samples.len());
        let end = end.min(samples.len());
        &samples[start..end]
    }
}
