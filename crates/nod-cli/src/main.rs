use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use nod_rs::evaluator::DatasetEvaluator;
use nod_rs::{
    checkpoint, CategoryMapping, LabelRemapper, LabelSpace, Lvis, LvisEval, LvisEvaluator,
    NodConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nod-eval")]
#[command(about = "LVIS box evaluation with a known/novel category breakdown")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON params file; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dataset ids of the known categories (comma-separated); overrides the params file
    #[arg(long, value_delimiter = ',', global = true)]
    known_ids: Option<Vec<u64>>,

    /// Max detections per image; overrides the params file
    #[arg(long, global = true)]
    max_dets: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a result file of dataset category ids
    Eval {
        /// Path to ground truth annotations JSON file
        #[arg(long)]
        gt: PathBuf,

        /// Path to detection results JSON file
        #[arg(long)]
        dt: PathBuf,

        /// Filter to specific image IDs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        img_ids: Option<Vec<u64>>,
    },
    /// Evaluate a prediction checkpoint written during inference
    Checkpoint {
        /// Path to ground truth annotations JSON file
        #[arg(long)]
        gt: PathBuf,

        /// Path to a predictions_<n>.bin file
        #[arg(long)]
        checkpoint: PathBuf,

        /// Also write the result file here
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<NodConfig> {
    let mut config = match &cli.config {
        Some(path) => NodConfig::from_file(path)
            .with_context(|| format!("loading params from {}", path.display()))?,
        None => NodConfig::default(),
    };
    if let Some(ids) = &cli.known_ids {
        config.known_class_ids = ids.clone();
    }
    if let Some(max_dets) = cli.max_dets {
        config.max_dets_per_image = max_dets;
    }
    config.validate()?;
    Ok(config)
}

fn load_gt(path: &Path) -> anyhow::Result<Lvis> {
    Lvis::new(path).with_context(|| format!("loading ground truth from {}", path.display()))
}

fn eval_results(
    config: &NodConfig,
    gt: &Path,
    dt: &Path,
    img_ids: Option<Vec<u64>>,
) -> anyhow::Result<()> {
    let lvis_gt = load_gt(gt)?;
    let lvis_dt = lvis_gt
        .load_res(dt, config.max_dets_per_image)
        .with_context(|| format!("loading detections from {}", dt.display()))?;

    let mut lvis_eval = LvisEval::new(lvis_gt, lvis_dt);
    lvis_eval.params.max_dets = config.max_dets_per_image;
    if let Some(img_ids) = img_ids {
        lvis_eval.params.img_ids = img_ids;
    }
    lvis_eval.run()?;
    lvis_eval.print_results()?;

    if !config.known_class_ids.is_empty() {
        let split = lvis_eval
            .subset_summarizer()?
            .summarize_known_novel(&config.known_class_ids)?;
        for result in [&split.known, &split.novel] {
            println!("\n{} classes only:\n{}", result.subset, result.small_table());
        }
    }
    Ok(())
}

fn eval_checkpoint(
    config: &NodConfig,
    gt: &Path,
    path: &Path,
    out_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let lvis_gt = load_gt(gt)?;
    let predictions = checkpoint::load(path)
        .with_context(|| format!("loading checkpoint {}", path.display()))?;
    info!(images = predictions.len(), "loaded {}", path.display());

    let mapping = CategoryMapping::from_categories(&lvis_gt.dataset.categories)?;
    let remapper = LabelRemapper::new().with_mapping(LabelSpace::Dataset, mapping);
    let mut evaluator = LvisEvaluator::new(lvis_gt, remapper, config.max_dets_per_image)?;
    if !config.known_class_ids.is_empty() {
        evaluator = evaluator.with_known_class_ids(config.known_class_ids.clone());
    }
    if let Some(dir) = out_dir {
        evaluator = evaluator.with_output_dir(dir);
    }
    evaluator.set_predictions(predictions);
    evaluator.evaluate()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Eval { gt, dt, img_ids } => eval_results(&config, &gt, &dt, img_ids),
        Commands::Checkpoint {
            gt,
            checkpoint,
            out_dir,
        } => eval_checkpoint(&config, &gt, &checkpoint, out_dir),
    }
}
