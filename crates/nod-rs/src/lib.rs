pub mod boxes;
pub mod checkpoint;
pub mod config;
pub mod detection;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod evaluator;
pub mod fusion;
pub mod inference;
pub mod lvis;
pub mod mask;
pub mod model;
pub mod normalize;
pub mod params;
pub mod pipeline;
pub mod refine;
pub mod remap;
pub mod summary;
pub mod types;

pub use boxes::{BBox, BoxFormat};
pub use config::NodConfig;
pub use detection::{Detection, DetectionSet, DetectionSource};
pub use error::{NodError, PipelineStage, Result};
pub use eval::{LvisEval, PrecisionRecallTable};
pub use evaluator::{DatasetEvaluator, EvaluationReport, LvisEvaluator};
pub use fusion::{DetectionFuser, FusionConfig};
pub use inference::{inference, run_inference, LoopConfig};
pub use lvis::Lvis;
pub use params::Params;
pub use pipeline::NovelObjectDetector;
pub use refine::MaskRefiner;
pub use remap::{CategoryMapping, LabelRemapper, LabelSpace};
pub use summary::{CategorySubset, EvaluationResult, SubsetSummarizer};
pub use types::{Annotation, Category, Dataset, Image, ImagePredictions, ResultAnnotation};
