//! Merging of closed-set, re-classified background and grounding detections.
//!
//! The grounding detector scores categories in fixed-size prompt chunks: the
//! category list is split into chunks of `categories_per_prompt` names, each
//! chunk becomes one text prompt, and the image is run once per prompt. After
//! projection every query holds one similarity per category, laid out chunk
//! after chunk, so category `c` lives in chunk `c / categories_per_prompt`.

use tracing::debug;

use crate::boxes::BBox;
use crate::detection::{Detection, DetectionSet, DetectionSource};
use crate::error::{NodError, Result};
use crate::normalize::min_max_normalize;

/// Layout and ranking parameters of the fuser.
///
/// Invariants: `top_k`, `categories_per_prompt` and `num_categories` are
/// non-zero; chunk `i` covers categories
/// `[i * categories_per_prompt, min((i + 1) * categories_per_prompt, num_categories))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionConfig {
    top_k: usize,
    categories_per_prompt: usize,
    num_categories: usize,
}

impl FusionConfig {
    pub fn new(top_k: usize, categories_per_prompt: usize, num_categories: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(NodError::InvalidConfig("top_k must be positive".into()));
        }
        if categories_per_prompt == 0 {
            return Err(NodError::InvalidConfig(
                "categories_per_prompt must be positive".into(),
            ));
        }
        if num_categories == 0 {
            return Err(NodError::InvalidConfig(
                "num_categories must be positive".into(),
            ));
        }
        Ok(FusionConfig {
            top_k,
            categories_per_prompt,
            num_categories,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn categories_per_prompt(&self) -> usize {
        self.categories_per_prompt
    }

    pub fn num_categories(&self) -> usize {
        self.num_categories
    }

    pub fn num_chunks(&self) -> usize {
        self.num_categories.div_ceil(self.categories_per_prompt)
    }

    /// Number of categories scored by chunk `chunk`.
    pub fn chunk_len(&self, chunk: usize) -> usize {
        let start = chunk * self.categories_per_prompt;
        self.num_categories
            .saturating_sub(start)
            .min(self.categories_per_prompt)
    }
}

/// Raw grounding output for one prompt chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingChunk {
    pub num_queries: usize,
    pub num_tokens: usize,
    /// Row-major `num_queries x num_tokens` logits.
    pub logits: Vec<f32>,
    /// One normalized center-form `(cx, cy, w, h)` box per query.
    pub boxes: Vec<[f32; 4]>,
}

/// Token-to-category assignment of one prompt chunk.
///
/// Row `c` spreads category `c` of the chunk over the prompt tokens that name it.
#[derive(Debug, Clone, PartialEq)]
pub struct PositiveMap {
    pub num_categories: usize,
    pub num_tokens: usize,
    /// Row-major `num_categories x num_tokens` weights.
    pub weights: Vec<f32>,
}

/// Per-query similarity to every category, flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySimilarity {
    pub num_queries: usize,
    pub num_categories: usize,
    pub values: Vec<f32>,
}

impl CategorySimilarity {
    pub fn get(&self, query: usize, category: usize) -> f32 {
        self.values[query * self.num_categories + category]
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Indices of the `k` largest values, best first.
///
/// Exact ties resolve towards the lower index, so the selection is
/// deterministic for a given input order but not across reorderings.
fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let k = k.min(values.len());
    if k == 0 {
        return Vec::new();
    }
    let cmp = |a: &usize, b: &usize| values[*b].total_cmp(&values[*a]).then(a.cmp(b));
    let mut idx: Vec<usize> = (0..values.len()).collect();
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, cmp);
        idx.truncate(k);
    }
    idx.sort_unstable_by(cmp);
    idx
}

/// Image identity and size needed to place grounding boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub image_id: u64,
    pub width: u32,
    pub height: u32,
}

/// Per-source candidates for one image.
#[derive(Debug, Clone, Copy)]
pub struct FusionSources<'a> {
    /// Surviving known-class closed-set detections, corner form.
    pub closed_set: &'a DetectionSet,
    /// Background boxes re-labelled by the region classifier, corner form.
    pub background: &'a DetectionSet,
    pub similarity: &'a CategorySimilarity,
    pub grounding: &'a [GroundingChunk],
}

#[derive(Debug, Clone)]
pub struct DetectionFuser {
    config: FusionConfig,
}

impl DetectionFuser {
    pub fn new(config: FusionConfig) -> Self {
        DetectionFuser { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Turn per-chunk token logits into per-category similarities.
    ///
    /// Each chunk contributes `sigmoid(logits) x positive_map^T`; chunk results
    /// are concatenated along the category axis.
    pub fn project(
        &self,
        chunks: &[GroundingChunk],
        maps: &[PositiveMap],
    ) -> Result<CategorySimilarity> {
        if chunks.len() != maps.len() || chunks.len() != self.config.num_chunks() {
            return Err(NodError::InvalidGroundingShape(format!(
                "expected {} prompt chunks, got {} outputs and {} positive maps",
                self.config.num_chunks(),
                chunks.len(),
                maps.len()
            )));
        }
        let num_queries = chunks.first().map_or(0, |c| c.num_queries);
        let num_categories = self.config.num_categories;
        let mut values = vec![0.0f32; num_queries * num_categories];

        let mut offset = 0usize;
        for (i, (chunk, map)) in chunks.iter().zip(maps).enumerate() {
            let expected = self.config.chunk_len(i);
            if map.num_categories != expected {
                return Err(NodError::InvalidGroundingShape(format!(
                    "chunk {} maps {} categories, expected {}",
                    i, map.num_categories, expected
                )));
            }
            if chunk.num_queries != num_queries
                || chunk.num_tokens != map.num_tokens
                || chunk.logits.len() != chunk.num_queries * chunk.num_tokens
                || map.weights.len() != map.num_categories * map.num_tokens
            {
                return Err(NodError::InvalidGroundingShape(format!(
                    "chunk {} has inconsistent query/token dimensions",
                    i
                )));
            }

            let t = chunk.num_tokens;
            for q in 0..num_queries {
                let probs: Vec<f32> = chunk.logits[q * t..(q + 1) * t]
                    .iter()
                    .map(|&l| sigmoid(l))
                    .collect();
                for c in 0..map.num_categories {
                    let row = &map.weights[c * t..(c + 1) * t];
                    let dot: f32 = probs.iter().zip(row).map(|(p, w)| p * w).sum();
                    values[q * num_categories + offset + c] = dot;
                }
            }
            offset += map.num_categories;
        }

        Ok(CategorySimilarity {
            num_queries,
            num_categories,
            values,
        })
    }

    /// Top-K grounding candidates, decoded and placed in pixel corner form.
    pub fn grounding_candidates(
        &self,
        image: ImageSize,
        similarity: &CategorySimilarity,
        chunks: &[GroundingChunk],
    ) -> Result<DetectionSet> {
        self.check_similarity(similarity, chunks)?;
        let (w, h) = (image.width as f32, image.height as f32);
        let per_prompt = self.config.categories_per_prompt;
        let num_categories = similarity.num_categories;

        Ok(top_k_indices(&similarity.values, self.config.top_k)
            .into_iter()
            .map(|flat| {
                let query = flat / num_categories;
                let category = flat % num_categories;
                let chunk = category / per_prompt;
                let bbox = BBox::cxcywh(chunks[chunk].boxes[query])
                    .scale(w, h)
                    .to_xyxy()
                    .clamp(w, h);
                Detection::new(
                    bbox,
                    similarity.values[flat],
                    category as u32,
                    DetectionSource::OpenVocabulary,
                )
            })
            .collect())
    }

    fn check_similarity(
        &self,
        similarity: &CategorySimilarity,
        chunks: &[GroundingChunk],
    ) -> Result<()> {
        if similarity.num_categories != self.config.num_categories {
            return Err(NodError::InvalidGroundingShape(format!(
                "similarity covers {} categories, fuser expects {}",
                similarity.num_categories, self.config.num_categories
            )));
        }
        if similarity.values.len() != similarity.num_queries * similarity.num_categories {
            return Err(NodError::InvalidGroundingShape(
                "similarity size is not num_queries x num_categories".into(),
            ));
        }
        if similarity.num_queries == 0 {
            return Ok(());
        }
        if chunks.len() != self.config.num_chunks() {
            return Err(NodError::InvalidGroundingShape(format!(
                "expected {} prompt chunks, got {}",
                self.config.num_chunks(),
                chunks.len()
            )));
        }
        if let Some(i) = chunks
            .iter()
            .position(|c| c.boxes.len() != similarity.num_queries)
        {
            return Err(NodError::InvalidGroundingShape(format!(
                "chunk {} has {} boxes for {} queries",
                i,
                chunks[i].boxes.len(),
                similarity.num_queries
            )));
        }
        Ok(())
    }

    /// Merge every source into one ranked set of at most `top_k` candidates.
    ///
    /// Empty sources are skipped. Scores are min-max normalized once over the
    /// concatenation, so the best candidate scores 1 and the worst 0.
    pub fn fuse(&self, image: ImageSize, sources: FusionSources<'_>) -> Result<DetectionSet> {
        let grounding = self.grounding_candidates(image, sources.similarity, sources.grounding)?;

        let mut merged = DetectionSet::new();
        for source in [sources.closed_set, sources.background, &grounding] {
            if source.is_empty() {
                continue;
            }
            merged.extend(source.iter().copied());
        }
        if merged.is_empty() {
            return Err(NodError::EmptyDetectionSet {
                image_id: image.image_id,
            });
        }

        debug!(
            image_id = image.image_id,
            closed_set = sources.closed_set.len(),
            background = sources.background.len(),
            grounding = grounding.len(),
            "fusing candidates"
        );

        let normalized = min_max_normalize(&merged.scores());
        for (det, score) in merged.as_mut_slice().iter_mut().zip(normalized) {
            det.score = score;
        }
        merged.rank(self.config.top_k);
        Ok(merged)
    }
}
