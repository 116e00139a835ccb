//! Per-image novel object detection: closed-set detection, background
//! re-classification, grounding, fusion and mask refinement.

use tracing::debug;

use crate::boxes::BBox;
use crate::config::NodConfig;
use crate::detection::{Detection, DetectionSet, DetectionSource};
use crate::embedding::TextEmbeddings;
use crate::error::{ModelError, NodError, PipelineStage, Result};
use crate::fusion::{DetectionFuser, FusionSources, ImageSize, PositiveMap};
use crate::model::{
    ClosedSetDetector, GroundingDetector, ImageInput, RawDetection, RegionEmbedder, Segmenter,
    TextEncoder,
};
use crate::refine::MaskRefiner;
use crate::remap::{LabelRemapper, LabelSpace};

/// One grounding text prompt and the token span of each category it names.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptChunk {
    pub text: String,
    pub positive_map: PositiveMap,
}

/// Category vocabulary in both forms the models consume.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Text embeddings indexed by shared category id.
    pub text_embeddings: TextEmbeddings,
    /// Grounding prompts, chunk `i` naming categories
    /// `[i * chunk_size, (i + 1) * chunk_size)`.
    pub prompts: Vec<PromptChunk>,
}

impl Vocabulary {
    /// Embed one text per category with `encoder`.
    pub fn encode<T: TextEncoder>(
        encoder: &T,
        category_texts: &[String],
        prompts: Vec<PromptChunk>,
    ) -> Result<Self> {
        let features = encoder.encode(category_texts).map_err(NodError::TextEncoding)?;
        Ok(Vocabulary {
            text_embeddings: TextEmbeddings::new(features)?,
            prompts,
        })
    }
}

/// The four model collaborators.
#[derive(Debug, Clone)]
pub struct Models<C, E, G, S> {
    pub closed_set: C,
    pub embedder: E,
    pub grounding: G,
    pub segmenter: S,
}

pub struct NovelObjectDetector<C, E, G, S> {
    models: Models<C, E, G, S>,
    vocabulary: Vocabulary,
    prompt_texts: Vec<String>,
    positive_maps: Vec<PositiveMap>,
    remapper: LabelRemapper,
    background_class_id: u32,
    fuser: DetectionFuser,
    refiner: MaskRefiner,
}

/// A box survives as a crop only if it covers at least one whole pixel
/// in each direction.
fn has_pixels(bbox: &[f32; 4]) -> bool {
    bbox[2].floor() - bbox[0].floor() >= 1.0 && bbox[3].floor() - bbox[1].floor() >= 1.0
}

impl<C, E, G, S> NovelObjectDetector<C, E, G, S>
where
    C: ClosedSetDetector,
    E: RegionEmbedder,
    G: GroundingDetector,
    S: Segmenter,
{
    /// `remapper` must map [`LabelSpace::ClosedSet`] classes into the shared space.
    pub fn new(
        models: Models<C, E, G, S>,
        vocabulary: Vocabulary,
        remapper: LabelRemapper,
        config: &NodConfig,
    ) -> Result<Self> {
        let fusion = config.fusion_config()?;
        if vocabulary.prompts.len() != fusion.num_chunks() {
            return Err(NodError::InvalidConfig(format!(
                "{} grounding prompts for {} prompt chunks",
                vocabulary.prompts.len(),
                fusion.num_chunks()
            )));
        }
        if vocabulary.text_embeddings.len() != fusion.num_categories() {
            return Err(NodError::InvalidConfig(format!(
                "{} text embeddings for {} categories",
                vocabulary.text_embeddings.len(),
                fusion.num_categories()
            )));
        }
        if remapper.mapping(LabelSpace::ClosedSet).is_none() {
            return Err(NodError::InvalidConfig(
                "no closed-set label mapping".into(),
            ));
        }
        let prompt_texts = vocabulary.prompts.iter().map(|p| p.text.clone()).collect();
        let positive_maps = vocabulary
            .prompts
            .iter()
            .map(|p| p.positive_map.clone())
            .collect();
        Ok(NovelObjectDetector {
            models,
            vocabulary,
            prompt_texts,
            positive_maps,
            remapper,
            background_class_id: config.background_class_id,
            fuser: DetectionFuser::new(fusion),
            refiner: MaskRefiner::new(config.top_k),
        })
    }

    /// Known-class detections, remapped to the shared space, and the
    /// background boxes.
    fn split_closed_set(
        &self,
        image_id: u64,
        raw: Vec<RawDetection>,
    ) -> Result<(DetectionSet, Vec<[f32; 4]>)> {
        let mut known = DetectionSet::new();
        let mut background = Vec::new();
        for det in raw {
            if det.class_id == self.background_class_id {
                background.push(det.bbox);
                continue;
            }
            let category = self
                .remapper
                .to_shared(u64::from(det.class_id), LabelSpace::ClosedSet)
                .map_err(|e| NodError::at_stage(image_id, PipelineStage::ClosedSet, e))?;
            known.push(Detection::new(
                BBox::xyxy(det.bbox),
                det.score,
                category,
                DetectionSource::ClosedSet,
            ));
        }
        Ok((known, background))
    }

    fn reclassify_background(
        &self,
        image: &ImageInput,
        boxes: Vec<[f32; 4]>,
    ) -> Result<DetectionSet> {
        let boxes: Vec<[f32; 4]> = boxes.into_iter().filter(has_pixels).collect();
        if boxes.is_empty() {
            return Ok(DetectionSet::new());
        }
        let stage =
            |e: ModelError| NodError::at_stage(image.image_id, PipelineStage::RegionClassifier, e);

        let embeddings = self
            .models
            .embedder
            .embed_regions(image, &boxes)
            .map_err(stage)?;
        if embeddings.len() != boxes.len() {
            return Err(stage(
                format!(
                    "{} region embeddings for {} boxes",
                    embeddings.len(),
                    boxes.len()
                )
                .into(),
            ));
        }

        boxes
            .iter()
            .zip(&embeddings)
            .map(|(bbox, emb)| {
                let (score, category) = self
                    .vocabulary
                    .text_embeddings
                    .classify(emb)
                    .map_err(|e| stage(e.into()))?;
                Ok(Detection::new(
                    BBox::xyxy(*bbox),
                    score,
                    category,
                    DetectionSource::BackgroundReclassified,
                ))
            })
            .collect()
    }

    /// Run the full pipeline on one image.
    pub fn infer(&self, image: &ImageInput) -> Result<DetectionSet> {
        let image_id = image.image_id;

        let raw = self
            .models
            .closed_set
            .detect(image)
            .map_err(|e| NodError::at_stage(image_id, PipelineStage::ClosedSet, e))?;
        let (known, background_boxes) = self.split_closed_set(image_id, raw)?;
        let background = self.reclassify_background(image, background_boxes)?;

        let chunks = self
            .models
            .grounding
            .ground(image, &self.prompt_texts)
            .map_err(|e| NodError::at_stage(image_id, PipelineStage::Grounding, e))?;
        let fusion_err = |e: NodError| NodError::at_stage(image_id, PipelineStage::Fusion, e);
        let similarity = self
            .fuser
            .project(&chunks, &self.positive_maps)
            .map_err(fusion_err)?;

        let size = ImageSize {
            image_id,
            width: image.width,
            height: image.height,
        };
        let fused = self
            .fuser
            .fuse(
                size,
                FusionSources {
                    closed_set: &known,
                    background: &background,
                    similarity: &similarity,
                    grounding: &chunks,
                },
            )
            .map_err(fusion_err)?;

        let prompts: Vec<[f32; 4]> = fused.iter().map(|d| d.bbox.to_xyxy().coords()).collect();
        let masks = self
            .models
            .segmenter
            .segment(image, &prompts)
            .map_err(|e| NodError::at_stage(image_id, PipelineStage::Segmentation, e))?;

        let refined = self
            .refiner
            .refine(fused, &masks)
            .map_err(|e| NodError::at_stage(image_id, PipelineStage::Refinement, e))?;

        debug!(
            image_id,
            known = known.len(),
            background = background.len(),
            detections = refined.len(),
            "image done"
        );
        Ok(refined)
    }

    /// Run the pipeline on every image of a batch, stopping at the first failure.
    pub fn infer_batch(&self, batch: &[ImageInput]) -> Result<Vec<DetectionSet>> {
        batch.iter().map(|image| self.infer(image)).collect()
    }
}
