use std::path::PathBuf;

use nod_rs::evaluator::DatasetEvaluator;
use nod_rs::{
    checkpoint, CategoryMapping, CategorySubset, EvaluationResult, ImagePredictions, LabelRemapper,
    LabelSpace, Lvis, LvisEval, LvisEvaluator, ResultAnnotation,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn evaluated() -> LvisEval {
    let lvis_gt = Lvis::new(&fixtures_dir().join("gt.json")).expect("Failed to load GT");
    let lvis_dt = lvis_gt
        .load_res(&fixtures_dir().join("dt.json"), 300)
        .expect("Failed to load DT");
    let mut lvis_eval = LvisEval::new(lvis_gt, lvis_dt);
    lvis_eval.run().expect("Failed to evaluate");
    lvis_eval
}

fn assert_close(result: &EvaluationResult, name: &str, expected: f64) {
    let actual = result.get(name).unwrap();
    assert!(
        (actual - expected).abs() < 1e-9,
        "{} {}: expected {}, got {}",
        result.subset,
        name,
        expected,
        actual
    );
}

fn bits(result: &EvaluationResult) -> Vec<u64> {
    result.metrics.iter().map(|(_, v)| v.to_bits()).collect()
}

#[test]
fn test_load_gt() {
    let lvis = Lvis::new(&fixtures_dir().join("gt.json")).expect("Failed to load GT");
    assert_eq!(lvis.dataset.images.len(), 3);
    assert_eq!(lvis.dataset.annotations.len(), 6);
    assert_eq!(lvis.dataset.categories.len(), 3);
    assert_eq!(lvis.get_img(2).unwrap().not_exhaustive_category_ids, vec![1]);
}

#[test]
fn test_load_res() {
    let lvis_gt = Lvis::new(&fixtures_dir().join("gt.json")).expect("Failed to load GT");
    let lvis_dt = lvis_gt
        .load_res(&fixtures_dir().join("dt.json"), 300)
        .expect("Failed to load DT");
    assert_eq!(lvis_dt.dataset.annotations.len(), 7);
    for ann in &lvis_dt.dataset.annotations {
        assert!(ann.score.is_some());
        assert!(ann.id > 0);
    }
}

#[test]
fn test_eval_dimensions() {
    let lvis_eval = evaluated();
    let table = lvis_eval.eval.as_ref().unwrap();
    assert_eq!(table.t, 10);
    assert_eq!(table.r, 101);
    assert_eq!(table.k, 3);
    assert_eq!(table.a, 4);
}

#[test]
fn test_federated_metrics() {
    let lvis_eval = evaluated();
    let all = lvis_eval.summarize().unwrap();

    // person and dog are found exactly; okapi only has a false positive
    // on an image where it is verified absent.
    assert_close(&all, "AP", 2.0 / 3.0);
    assert_close(&all, "AP50", 2.0 / 3.0);
    assert_close(&all, "APr", 0.0);
    assert_close(&all, "APc", 1.0);
    assert_close(&all, "APf", 1.0);
    assert_close(&all, "AR@300", 2.0 / 3.0);
}

#[test]
fn test_known_novel_split() {
    let lvis_eval = evaluated();
    let split = lvis_eval
        .subset_summarizer()
        .unwrap()
        .summarize_known_novel(&[1, 2])
        .unwrap();

    assert_close(&split.all, "AP", 2.0 / 3.0);
    assert_close(&split.known, "AP", 1.0);
    assert_close(&split.known, "APr", -1.0);
    assert_close(&split.novel, "AP", 0.0);
    assert_eq!(split.novel.get("APf"), Some(-1.0));
    assert!(split.novel.percent("APf").unwrap().is_nan());
    assert_eq!(split.known.percent("AP"), Some(100.0));
}

#[test]
fn test_unrestricted_subset_matches_baseline() {
    let lvis_eval = evaluated();
    let baseline = lvis_eval.summarize().unwrap();
    let summarizer = lvis_eval.subset_summarizer().unwrap();

    assert_eq!(bits(&summarizer.summarize(None)), bits(&baseline));
    let all = CategorySubset::all(3);
    assert_eq!(bits(&summarizer.summarize(Some(&all))), bits(&baseline));
}

#[test]
fn test_subset_depends_only_on_membership() {
    let lvis_eval = evaluated();
    let summarizer = lvis_eval.subset_summarizer().unwrap();

    let by_id = CategorySubset::known(&[2, 1, 2], &lvis_eval.params.cat_ids).unwrap();
    let by_index = CategorySubset::new("x", vec![1, 0]);
    assert_eq!(by_id.indices(), by_index.indices());
    assert_eq!(
        bits(&summarizer.summarize(Some(&by_id))),
        bits(&summarizer.summarize(Some(&by_index)))
    );
}

#[test]
fn test_checkpoint_evaluation() {
    let lvis_gt = Lvis::new(&fixtures_dir().join("gt.json")).expect("Failed to load GT");
    let results: Vec<ResultAnnotation> = serde_json::from_str(
        &std::fs::read_to_string(fixtures_dir().join("dt.json")).unwrap(),
    )
    .unwrap();

    // Checkpoints hold shared (0-based) category ids.
    let mut predictions: Vec<ImagePredictions> = Vec::new();
    for r in results {
        let shared = ResultAnnotation {
            category_id: r.category_id - 1,
            ..r
        };
        match predictions.iter_mut().find(|p| p.image_id == shared.image_id) {
            Some(p) => p.instances.push(shared),
            None => predictions.push(ImagePredictions {
                image_id: shared.image_id,
                instances: vec![shared],
            }),
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint::save(dir.path(), predictions.len(), &predictions).unwrap();
    let loaded = checkpoint::load(&path).unwrap();
    assert_eq!(loaded, predictions);

    let mapping = CategoryMapping::from_categories(&lvis_gt.dataset.categories).unwrap();
    let remapper = LabelRemapper::new().with_mapping(LabelSpace::Dataset, mapping);
    let mut evaluator = LvisEvaluator::new(lvis_gt, remapper, 300)
        .unwrap()
        .with_known_class_ids(vec![1, 2]);
    evaluator.set_predictions(loaded);
    let report = evaluator.evaluate().unwrap();

    assert_close(&report.all, "AP", 2.0 / 3.0);
    assert_close(report.known.as_ref().unwrap(), "AP", 1.0);
    assert_close(report.novel.as_ref().unwrap(), "AP", 0.0);
}
