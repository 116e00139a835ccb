//! Collects per-image predictions and scores them against the ground truth.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::detection::DetectionSet;
use crate::error::{NodError, Result};
use crate::eval::LvisEval;
use crate::lvis::Lvis;
use crate::model::ImageInput;
use crate::params::Params;
use crate::remap::{LabelRemapper, LabelSpace};
use crate::summary::{iou_range, lvis_metrics, EvaluationResult};
use crate::types::{ImagePredictions, ResultAnnotation};

/// Name of the result file written to the output directory.
pub const RESULTS_FILE_NAME: &str = "lvis_instances_results.json";

/// Receives model outputs batch by batch and produces metrics at the end.
pub trait DatasetEvaluator {
    type Output;

    /// Drop everything collected so far.
    fn reset(&mut self);

    /// Record the outputs of one batch; `outputs[i]` belongs to `inputs[i]`.
    fn process(&mut self, inputs: &[ImageInput], outputs: Vec<DetectionSet>) -> Result<()>;

    /// Everything collected since the last reset.
    fn predictions(&self) -> &[ImagePredictions];

    fn evaluate(&mut self) -> Result<Self::Output>;
}

/// Scores for the whole taxonomy and, when known category ids are configured,
/// for the known and novel subsets.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub all: EvaluationResult,
    pub known: Option<EvaluationResult>,
    pub novel: Option<EvaluationResult>,
}

/// Convert one image's detections into result-file records.
///
/// Boxes become `[x, y, w, h]`; category ids stay in the shared index space.
pub fn instances_to_results(image_id: u64, detections: &DetectionSet) -> Vec<ResultAnnotation> {
    detections
        .iter()
        .map(|d| {
            let [x, y, w, h] = d.bbox.to_xywh().coords();
            ResultAnnotation {
                image_id,
                category_id: u64::from(d.category_id),
                bbox: [f64::from(x), f64::from(y), f64::from(w), f64::from(h)],
                score: f64::from(d.score),
            }
        })
        .collect()
}

/// Federated LVIS evaluation with an optional known/novel breakdown.
pub struct LvisEvaluator {
    lvis_gt: Lvis,
    remapper: LabelRemapper,
    known_class_ids: Option<Vec<u64>>,
    max_dets_per_image: usize,
    output_dir: Option<PathBuf>,
    predictions: Vec<ImagePredictions>,
}

impl LvisEvaluator {
    /// `remapper` must map [`LabelSpace::Dataset`] ids to the shared space.
    pub fn new(lvis_gt: Lvis, remapper: LabelRemapper, max_dets_per_image: usize) -> Result<Self> {
        if remapper.mapping(LabelSpace::Dataset).is_none() {
            return Err(NodError::InvalidConfig("no dataset label mapping".into()));
        }
        Ok(LvisEvaluator {
            lvis_gt,
            remapper,
            known_class_ids: None,
            max_dets_per_image,
            output_dir: None,
            predictions: Vec::new(),
        })
    }

    /// Also report scores for these dataset category ids and for the rest.
    pub fn with_known_class_ids(mut self, known_class_ids: Vec<u64>) -> Self {
        self.known_class_ids = Some(known_class_ids);
        self
    }

    /// Write the result file into `dir`.
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    /// Replace the collected predictions, e.g. with a loaded checkpoint.
    pub fn set_predictions(&mut self, predictions: Vec<ImagePredictions>) {
        self.predictions = predictions;
    }

    /// Every collected record with its category id mapped back to the dataset.
    fn dataset_results(&self) -> Result<Vec<ResultAnnotation>> {
        self.predictions
            .iter()
            .flat_map(|p| p.instances.iter())
            .map(|r| {
                let shared = u32::try_from(r.category_id).map_err(|_| NodError::UnknownCategory {
                    id: r.category_id,
                    space: LabelSpace::Dataset,
                })?;
                Ok(ResultAnnotation {
                    category_id: self.remapper.from_shared(shared, LabelSpace::Dataset)?,
                    ..r.clone()
                })
            })
            .collect()
    }

    fn no_data(&self, subset: &str) -> EvaluationResult {
        EvaluationResult {
            subset: subset.to_string(),
            max_dets: self.max_dets_per_image,
            iou_range: iou_range(&Params::new(self.max_dets_per_image)),
            metrics: lvis_metrics(self.max_dets_per_image)
                .into_iter()
                .map(|m| (m, -1.0))
                .collect(),
        }
    }
}

impl DatasetEvaluator for LvisEvaluator {
    type Output = EvaluationReport;

    fn reset(&mut self) {
        self.predictions.clear();
    }

    fn process(&mut self, inputs: &[ImageInput], outputs: Vec<DetectionSet>) -> Result<()> {
        if inputs.len() != outputs.len() {
            return Err(NodError::InvalidConfig(format!(
                "{} outputs for a batch of {} images",
                outputs.len(),
                inputs.len()
            )));
        }
        for (input, output) in inputs.iter().zip(&outputs) {
            self.predictions.push(ImagePredictions {
                image_id: input.image_id,
                instances: instances_to_results(input.image_id, output),
            });
        }
        Ok(())
    }

    fn predictions(&self) -> &[ImagePredictions] {
        &self.predictions
    }

    fn evaluate(&mut self) -> Result<EvaluationReport> {
        info!("preparing results in the LVIS format");
        let results = self.dataset_results()?;

        if let Some(dir) = &self.output_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(RESULTS_FILE_NAME);
            info!("saving results to {}", path.display());
            let file = std::fs::File::create(&path)?;
            serde_json::to_writer(std::io::BufWriter::new(file), &results)?;
        }

        let with_subsets = self.known_class_ids.is_some();
        if results.is_empty() {
            warn!("no predictions from the model");
            return Ok(EvaluationReport {
                all: self.no_data("all"),
                known: with_subsets.then(|| self.no_data("known")),
                novel: with_subsets.then(|| self.no_data("novel")),
            });
        }

        info!(
            max_dets = self.max_dets_per_image,
            "evaluating {} detections",
            results.len()
        );
        let lvis_dt = self.lvis_gt.load_res_anns(results, self.max_dets_per_image)?;
        let mut lvis_eval = LvisEval::new(self.lvis_gt.clone(), lvis_dt);
        lvis_eval.params.max_dets = self.max_dets_per_image;
        lvis_eval.run()?;
        lvis_eval.print_results()?;

        let all = lvis_eval.summarize()?;
        info!("evaluation results for bbox:\n{}", all.small_table());

        let (known, novel) = match &self.known_class_ids {
            Some(known_ids) => {
                let split = lvis_eval.subset_summarizer()?.summarize_known_novel(known_ids)?;
                info!(
                    "evaluation results for bbox (known classes only):\n{}",
                    split.known.small_table()
                );
                info!(
                    "evaluation results for bbox (novel classes only):\n{}",
                    split.novel.small_table()
                );
                (Some(split.known), Some(split.novel))
            }
            None => (None, None),
        };

        Ok(EvaluationReport { all, known, novel })
    }
}
