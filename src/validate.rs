//! Frame-count gate between extraction and the dataset.
//!
//! Strict equality only: a near miss is dropped, never padded or trimmed.

use thiserror::Error;

use crate::transform::FeatureMatrix;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("expected {expected} frames, got {actual}")]
pub struct ShapeMismatch {
    pub expected: usize,
    pub actual: usize,
}

pub fn check(matrix: &FeatureMatrix, expected_frame_count: usize) -> Result<(), ShapeMismatch> {
    let actual = matrix.n_frames();
    if actual == expected_frame_count {
        Ok(())
    } else {
        Err(ShapeMismatch {
            expected: expected_frame_count,
            actual,
        })
    }
}

/// True iff `matrix` has exactly `expected_frame_count` rows.
pub fn accept(matrix: &FeatureMatrix, expected_frame_count: usize) -> bool {
    check(matrix, expected_frame_count).is_ok()
}
