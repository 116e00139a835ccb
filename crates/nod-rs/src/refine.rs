//! Box refinement from segmentation masks, and the final re-ranking.

use tracing::debug;

use crate::boxes::BBox;
use crate::detection::DetectionSet;
use crate::error::{NodError, Result};
use crate::mask::BinaryMask;
use crate::normalize::min_max_normalize;

/// Segmentation output for one box prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskPrediction {
    pub mask: BinaryMask,
    /// Predicted mask quality (IoU estimate) on the model's own scale.
    pub quality: f32,
}

/// Tight corner-form box of a mask's positive region.
pub fn mask_to_box(mask: &BinaryMask, index: usize) -> Result<BBox> {
    let [x1, y1, x2, y2] = mask.tight_box().ok_or(NodError::EmptyMask { index })?;
    Ok(BBox::xyxy([x1 as f32, y1 as f32, x2 as f32, y2 as f32]))
}

#[derive(Debug, Clone)]
pub struct MaskRefiner {
    top_k: usize,
}

impl MaskRefiner {
    pub fn new(top_k: usize) -> Self {
        MaskRefiner { top_k }
    }

    /// Replace every box with its mask's tight box and weight the fused score
    /// by the normalized mask quality.
    ///
    /// An empty mask keeps the detection's original box. `predictions[i]`
    /// belongs to the `i`-th detection of `set`.
    pub fn refine(
        &self,
        set: DetectionSet,
        predictions: &[MaskPrediction],
    ) -> Result<DetectionSet> {
        if set.len() != predictions.len() {
            return Err(NodError::MaskCountMismatch {
                expected: set.len(),
                actual: predictions.len(),
            });
        }

        let qualities: Vec<f32> = predictions.iter().map(|p| p.quality).collect();
        let qualities = min_max_normalize(&qualities);

        let mut refined = set;
        let mut kept_original = 0usize;
        for (i, (det, pred)) in refined.as_mut_slice().iter_mut().zip(predictions).enumerate() {
            match mask_to_box(&pred.mask, i) {
                Ok(bbox) => det.bbox = bbox,
                Err(NodError::EmptyMask { .. }) => {
                    det.bbox = det.bbox.to_xyxy();
                    kept_original += 1;
                }
                Err(e) => return Err(e),
            }
            det.score *= qualities[i];
        }
        if kept_original > 0 {
            debug!(kept_original, "empty masks, original boxes kept");
        }

        refined.rank(self.top_k);
        Ok(refined)
    }
}
