//! Zero-shot classification of region embeddings against text embeddings.
//!
//! Background-class boxes of the closed-set detector are cropped, embedded by
//! an image-text model and labelled with the most similar category prompt.

use crate::error::{NodError, Result};

/// Logit scale applied to cosine similarities before the softmax.
pub const LOGIT_SCALE: f32 = 100.0;

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// One unit-length text embedding per category, indexed by shared category id.
#[derive(Debug, Clone)]
pub struct TextEmbeddings {
    dim: usize,
    features: Vec<Vec<f32>>,
}

impl TextEmbeddings {
    pub fn new(features: Vec<Vec<f32>>) -> Result<Self> {
        let dim = features.first().map_or(0, |f| f.len());
        if dim == 0 {
            return Err(NodError::InvalidConfig(
                "text embeddings must be non-empty".into(),
            ));
        }
        if features.iter().any(|f| f.len() != dim) {
            return Err(NodError::InvalidConfig(
                "text embeddings have mixed dimensions".into(),
            ));
        }
        Ok(TextEmbeddings {
            dim,
            features: features.iter().map(|f| l2_normalize(f)).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Best category for one region embedding: `(softmax probability, category)`.
    pub fn classify(&self, region: &[f32]) -> Result<(f32, u32)> {
        if region.len() != self.dim {
            return Err(NodError::InvalidConfig(format!(
                "region embedding has {} dims, text embeddings have {}",
                region.len(),
                self.dim
            )));
        }
        let region = l2_normalize(region);
        let logits: Vec<f32> = self
            .features
            .iter()
            .map(|t| LOGIT_SCALE * t.iter().zip(&region).map(|(a, b)| a * b).sum::<f32>())
            .collect();

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f32 = exps.iter().sum();

        let (best, &best_exp) = exps
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
            .ok_or_else(|| NodError::InvalidConfig("no text embeddings".into()))?;
        Ok((best_exp / total, best as u32))
    }
}
