//! The batch loop that drives a detector over a dataset and feeds the evaluator.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::info;

use crate::checkpoint;
use crate::detection::DetectionSet;
use crate::error::Result;
use crate::evaluator::DatasetEvaluator;
use crate::model::ImageInput;

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Upper bound on the batches excluded from timing.
    pub max_warmup: usize,
    /// Minimum time between two progress lines.
    pub log_interval: Duration,
    /// Snapshot the predictions every this many processed batches.
    pub checkpoint_interval: usize,
    /// Where snapshots go; `None` disables them.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            max_warmup: 5,
            log_interval: Duration::from_secs(5),
            checkpoint_interval: 2500,
            checkpoint_dir: None,
        }
    }
}

/// What the loop did.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStats {
    pub total_batches: usize,
    pub num_warmup: usize,
    /// Time spent after the warmup batches.
    pub total_time: Duration,
    pub checkpoints: Vec<PathBuf>,
}

/// Lets a message through at most once per interval, the first one always.
struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    fn new(interval: Duration) -> Self {
        LogThrottle {
            interval,
            last: None,
        }
    }

    fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// `H:MM:SS`
fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Run `infer` on every batch and hand the outputs to `evaluator`.
///
/// The first error aborts the loop and is returned as is.
pub fn run_inference<I, F, E>(
    batches: I,
    mut infer: F,
    evaluator: &mut E,
    config: &LoopConfig,
) -> Result<LoopStats>
where
    I: IntoIterator<Item = Vec<ImageInput>>,
    I::IntoIter: ExactSizeIterator,
    F: FnMut(&[ImageInput]) -> Result<Vec<DetectionSet>>,
    E: DatasetEvaluator,
{
    let batches = batches.into_iter();
    let total = batches.len();
    info!("start inference on {} batches", total);

    let num_warmup = config.max_warmup.min(total.saturating_sub(1));
    let mut throttle = LogThrottle::new(config.log_interval);
    let mut checkpoints = Vec::new();
    let mut start_time = Instant::now();

    for (idx, inputs) in batches.enumerate() {
        if idx == num_warmup {
            start_time = Instant::now();
        }

        let outputs = infer(&inputs)?;
        evaluator.process(&inputs, outputs)?;

        let processed = idx + 1;
        let iters_after_start = if idx >= num_warmup {
            processed - num_warmup
        } else {
            processed
        };
        let seconds_per_iter = start_time.elapsed().as_secs_f64() / iters_after_start as f64;
        if idx >= num_warmup * 2 && throttle.ready(Instant::now()) {
            let eta = Duration::from_secs_f64(seconds_per_iter * (total - processed) as f64);
            info!(
                "Inference done {}/{}. Total: {:.4} s/iter. ETA={}",
                processed,
                total,
                seconds_per_iter,
                format_hms(eta)
            );
        }

        if let Some(dir) = &config.checkpoint_dir {
            if config.checkpoint_interval > 0 && processed % config.checkpoint_interval == 0 {
                checkpoints.push(checkpoint::save(dir, processed, evaluator.predictions())?);
            }
        }
    }

    let total_time = if total == 0 {
        Duration::ZERO
    } else {
        start_time.elapsed()
    };
    let timed = total.saturating_sub(num_warmup).max(1);
    info!(
        "Total inference time: {} ({:.6} s / iter per device)",
        format_hms(total_time),
        total_time.as_secs_f64() / timed as f64
    );

    Ok(LoopStats {
        total_batches: total,
        num_warmup,
        total_time,
        checkpoints,
    })
}

/// Reset `evaluator`, run the loop and evaluate what it collected.
pub fn inference<I, F, E>(
    batches: I,
    infer: F,
    evaluator: &mut E,
    config: &LoopConfig,
) -> Result<E::Output>
where
    I: IntoIterator<Item = Vec<ImageInput>>,
    I::IntoIter: ExactSizeIterator,
    F: FnMut(&[ImageInput]) -> Result<Vec<DetectionSet>>,
    E: DatasetEvaluator,
{
    evaluator.reset();
    run_inference(batches, infer, evaluator, config)?;
    evaluator.evaluate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NodError, PipelineStage};
    use crate::types::ImagePredictions;

    #[derive(Default)]
    struct Collect {
        predictions: Vec<ImagePredictions>,
        resets: usize,
    }

    impl DatasetEvaluator for Collect {
        type Output = usize;

        fn reset(&mut self) {
            self.resets += 1;
            self.predictions.clear();
        }

        fn process(&mut self, inputs: &[ImageInput], _outputs: Vec<DetectionSet>) -> Result<()> {
            self.predictions
                .extend(inputs.iter().map(|i| ImagePredictions {
                    image_id: i.image_id,
                    instances: Vec::new(),
                }));
            Ok(())
        }

        fn predictions(&self) -> &[ImagePredictions] {
            &self.predictions
        }

        fn evaluate(&mut self) -> Result<usize> {
            Ok(self.predictions.len())
        }
    }

    fn batches(n: usize) -> Vec<Vec<ImageInput>> {
        (0..n as u64)
            .map(|id| {
                vec![ImageInput {
                    image_id: id,
                    file_name: format!("{}.jpg", id).into(),
                    height: 10,
                    width: 10,
                }]
            })
            .collect()
    }

    fn empty_outputs(inputs: &[ImageInput]) -> Result<Vec<DetectionSet>> {
        Ok(vec![DetectionSet::new(); inputs.len()])
    }

    #[test]
    fn test_checkpoint_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoopConfig {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            ..LoopConfig::default()
        };
        let mut evaluator = Collect::default();
        let stats = run_inference(batches(2600), empty_outputs, &mut evaluator, &config).unwrap();

        assert_eq!(stats.num_warmup, 5);
        assert_eq!(stats.checkpoints.len(), 1);
        let path = dir.path().join("predictions_2500.bin");
        assert_eq!(stats.checkpoints[0], path);
        let saved = checkpoint::load(&path).unwrap();
        assert_eq!(saved.len(), 2500);
        assert_eq!(evaluator.predictions.len(), 2600);
    }

    #[test]
    fn test_empty_source() {
        let mut evaluator = Collect::default();
        let out = inference(
            Vec::<Vec<ImageInput>>::new(),
            empty_outputs,
            &mut evaluator,
            &LoopConfig::default(),
        )
        .unwrap();
        assert_eq!(out, 0);
        assert_eq!(evaluator.resets, 1);
    }

    #[test]
    fn test_warmup_bounded_by_length() {
        let mut evaluator = Collect::default();
        let config = LoopConfig::default();
        let stats = run_inference(batches(3), empty_outputs, &mut evaluator, &config).unwrap();
        assert_eq!(stats.num_warmup, 2);
        assert!(stats.checkpoints.is_empty());
    }

    #[test]
    fn test_first_error_aborts() {
        let mut evaluator = Collect::default();
        let mut calls = 0;
        let err = run_inference(
            batches(10),
            |inputs: &[ImageInput]| {
                calls += 1;
                if inputs[0].image_id == 3 {
                    Err(NodError::at_stage(3, PipelineStage::Grounding, "model crashed"))
                } else {
                    empty_outputs(inputs)
                }
            },
            &mut evaluator,
            &LoopConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NodError::Stage {
                image_id: 3,
                stage: PipelineStage::Grounding,
                ..
            }
        ));
        assert_eq!(calls, 4);
        assert_eq!(evaluator.predictions.len(), 3);
    }

    #[test]
    fn test_throttle() {
        let mut throttle = LogThrottle::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(throttle.ready(t0));
        assert!(!throttle.ready(t0 + Duration::from_secs(1)));
        assert!(throttle.ready(t0 + Duration::from_secs(6)));
        assert_eq!(format_hms(Duration::from_secs(3725)), "1:02:05");
    }
}
