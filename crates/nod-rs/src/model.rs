//! Contracts of the pretrained models the pipeline drives.
//!
//! Implementations own model loading, pre-processing and image decoding; the
//! pipeline only sees the narrow inputs and outputs below. Every method may
//! fail with an arbitrary boxed error, which the pipeline wraps with the
//! image id and stage.

use std::path::PathBuf;

use crate::error::ModelError;
use crate::fusion::GroundingChunk;
use crate::refine::MaskPrediction;

pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// One image handed to the models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub image_id: u64,
    pub file_name: PathBuf,
    /// Original height in pixels.
    pub height: u32,
    /// Original width in pixels.
    pub width: u32,
}

/// Closed-set detector output in original-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// Corner form `(x1, y1, x2, y2)`.
    pub bbox: [f32; 4],
    pub score: f32,
    /// Native class index; the background class is a dedicated index.
    pub class_id: u32,
}

pub trait ClosedSetDetector {
    fn detect(&self, image: &ImageInput) -> ModelResult<Vec<RawDetection>>;
}

/// Image-text embedding model, image side: one embedding per region crop.
pub trait RegionEmbedder {
    fn embed_regions(&self, image: &ImageInput, boxes: &[[f32; 4]]) -> ModelResult<Vec<Vec<f32>>>;
}

/// Image-text embedding model, text side: one embedding per prompt.
pub trait TextEncoder {
    fn encode(&self, prompts: &[String]) -> ModelResult<Vec<Vec<f32>>>;
}

/// Open-vocabulary grounding detector, run once per text prompt.
pub trait GroundingDetector {
    /// Returns one chunk per prompt, in prompt order.
    fn ground(&self, image: &ImageInput, prompts: &[String]) -> ModelResult<Vec<GroundingChunk>>;
}

/// Promptable segmentation model.
pub trait Segmenter {
    /// Returns one mask per corner-form box prompt, in prompt order.
    fn segment(&self, image: &ImageInput, boxes: &[[f32; 4]]) -> ModelResult<Vec<MaskPrediction>>;
}
