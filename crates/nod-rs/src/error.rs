use std::fmt;

use thiserror::Error;

use crate::remap::LabelSpace;

/// Boxed error returned by model collaborators.
pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, NodError>;

/// Stage of the per-image pipeline, attached to fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ClosedSet,
    RegionClassifier,
    Grounding,
    Fusion,
    Segmentation,
    Refinement,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::ClosedSet => "closed-set detection",
            PipelineStage::RegionClassifier => "background re-classification",
            PipelineStage::Grounding => "grounding detection",
            PipelineStage::Fusion => "fusion",
            PipelineStage::Segmentation => "segmentation",
            PipelineStage::Refinement => "mask refinement",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum NodError {
    #[error("category {id} is not mapped in the {space} label space")]
    UnknownCategory { id: u64, space: LabelSpace },

    #[error("invalid category mapping: {0}")]
    InvalidMapping(String),

    #[error("image {image_id}: every detection source is empty")]
    EmptyDetectionSet { image_id: u64 },

    #[error("mask {index} has no positive pixels")]
    EmptyMask { index: usize },

    #[error("invalid mask: {0}")]
    InvalidMask(String),

    #[error("expected {expected} masks, segmentation returned {actual}")]
    MaskCountMismatch { expected: usize, actual: usize },

    #[error("grounding output does not match the fusion layout: {0}")]
    InvalidGroundingShape(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("text encoding failed: {0}")]
    TextEncoding(#[source] ModelError),

    #[error("image {image_id} failed during {stage}: {source}")]
    Stage {
        image_id: u64,
        stage: PipelineStage,
        #[source]
        source: ModelError,
    },

    #[error("result references image {0} which is not in the ground truth")]
    UnknownImage(u64),

    #[error("evaluate() and accumulate() must run before summarizing")]
    NotAccumulated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint encoding error: {0}")]
    Checkpoint(#[from] bincode::Error),
}

impl NodError {
    /// Wrap any failure raised while processing `image_id` at `stage`.
    pub fn at_stage(image_id: u64, stage: PipelineStage, source: impl Into<ModelError>) -> Self {
        NodError::Stage {
            image_id,
            stage,
            source: source.into(),
        }
    }
}
