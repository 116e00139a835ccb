//! Min-max score normalization.
//!
//! Detector confidences, grounding similarities and segmentation quality
//! predictions live on unrelated scales. Each family is rescaled onto `[0, 1]`
//! before any two of them are multiplied together.

/// Linearly rescale `scores` so the minimum maps to 0 and the maximum to 1.
///
/// A degenerate input (every value equal, including a single value) maps to
/// all zeros, the same result a min-max scaler gives for a zero data range.
/// An empty slice yields an empty vector.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if range <= 0.0 {
        return vec![0.0; scores.len()];
    }

    scores
        .iter()
        .map(|&s| {
            if s == max {
                1.0
            } else {
                ((s - min) / range).clamp(0.0, 1.0)
            }
        })
        .collect()
}
