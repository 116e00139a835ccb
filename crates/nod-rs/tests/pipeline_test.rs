use nod_rs::fusion::{GroundingChunk, PositiveMap};
use nod_rs::mask::BinaryMask;
use nod_rs::model::{
    ClosedSetDetector, GroundingDetector, ImageInput, ModelResult, RawDetection, RegionEmbedder,
    Segmenter, TextEncoder,
};
use nod_rs::pipeline::{Models, PromptChunk, Vocabulary};
use nod_rs::refine::MaskPrediction;
use nod_rs::types::{Annotation, Category, Frequency, Image};
use nod_rs::{
    inference, CategoryMapping, Dataset, DetectionSource, LabelRemapper, LabelSpace, LoopConfig,
    Lvis, LvisEvaluator, NodConfig, NodError, NovelObjectDetector, PipelineStage,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const BACKGROUND: u32 = 80;

struct FixedDetector;

impl ClosedSetDetector for FixedDetector {
    fn detect(&self, _image: &ImageInput) -> ModelResult<Vec<RawDetection>> {
        Ok(vec![
            RawDetection {
                bbox: [4.0, 4.0, 20.0, 20.0],
                score: 0.9,
                class_id: 0,
            },
            RawDetection {
                bbox: [30.0, 10.0, 50.0, 40.0],
                score: 0.7,
                class_id: BACKGROUND,
            },
        ])
    }
}

struct UnitEmbedder;

impl RegionEmbedder for UnitEmbedder {
    fn embed_regions(&self, _image: &ImageInput, boxes: &[[f32; 4]]) -> ModelResult<Vec<Vec<f32>>> {
        Ok(boxes.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

impl TextEncoder for UnitEmbedder {
    fn encode(&self, prompts: &[String]) -> ModelResult<Vec<Vec<f32>>> {
        Ok(prompts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct BrokenEncoder;

impl TextEncoder for BrokenEncoder {
    fn encode(&self, _prompts: &[String]) -> ModelResult<Vec<Vec<f32>>> {
        Err("tokenizer missing".into())
    }
}

/// One query centered in the image.
struct SingleQuery;

impl GroundingDetector for SingleQuery {
    fn ground(&self, _image: &ImageInput, prompts: &[String]) -> ModelResult<Vec<GroundingChunk>> {
        Ok(prompts
            .iter()
            .map(|_| GroundingChunk {
                num_queries: 1,
                num_tokens: 2,
                logits: vec![2.0, 2.0],
                boxes: vec![[0.5, 0.5, 0.25, 0.25]],
            })
            .collect())
    }
}

/// Mask logits that are high inside each prompt box.
struct BoxSegmenter {
    fail: bool,
}

fn box_logits(width: u32, height: u32, xyxy: [f32; 4]) -> Vec<f32> {
    let mut logits = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            let inside = cx >= xyxy[0] && cx <= xyxy[2] && cy >= xyxy[1] && cy <= xyxy[3];
            logits.push(if inside { 4.0 } else { -4.0 });
        }
    }
    logits
}

impl Segmenter for BoxSegmenter {
    fn segment(&self, image: &ImageInput, boxes: &[[f32; 4]]) -> ModelResult<Vec<MaskPrediction>> {
        if self.fail {
            return Err("out of memory".into());
        }
        boxes
            .iter()
            .enumerate()
            .map(|(i, b)| -> ModelResult<MaskPrediction> {
                let logits = box_logits(image.width, image.height, *b);
                Ok(MaskPrediction {
                    mask: BinaryMask::from_scores(image.width, image.height, &logits, 0.0)?,
                    quality: 0.8 + 0.05 * i as f32,
                })
            })
            .collect()
    }
}

fn config() -> NodConfig {
    NodConfig {
        class_len_per_prompt: 1,
        num_categories: 1,
        background_class_id: BACKGROUND,
        ..NodConfig::default()
    }
}

fn vocabulary() -> Vocabulary {
    let prompts = vec![PromptChunk {
        text: "okapi.".into(),
        positive_map: PositiveMap {
            num_categories: 1,
            num_tokens: 2,
            weights: vec![0.5, 0.5],
        },
    }];
    Vocabulary::encode(&UnitEmbedder, &["a photo of an okapi".to_string()], prompts).unwrap()
}

fn detector(
    fail_segmentation: bool,
) -> NovelObjectDetector<FixedDetector, UnitEmbedder, SingleQuery, BoxSegmenter> {
    let remapper = LabelRemapper::new()
        .with_mapping(LabelSpace::ClosedSet, CategoryMapping::table([(0, 0)]).unwrap());
    let models = Models {
        closed_set: FixedDetector,
        embedder: UnitEmbedder,
        grounding: SingleQuery,
        segmenter: BoxSegmenter {
            fail: fail_segmentation,
        },
    };
    NovelObjectDetector::new(models, vocabulary(), remapper, &config()).unwrap()
}

fn image(image_id: u64) -> ImageInput {
    ImageInput {
        image_id,
        file_name: format!("{}.jpg", image_id).into(),
        height: HEIGHT,
        width: WIDTH,
    }
}

#[test]
fn test_fuse_and_refine_one_image() {
    let out = detector(false).infer(&image(1)).unwrap();
    assert_eq!(out.len(), 3);

    let mut sources: Vec<DetectionSource> = out.iter().map(|d| d.source).collect();
    sources.sort_by_key(|s| *s as u8);
    assert_eq!(
        sources,
        vec![
            DetectionSource::ClosedSet,
            DetectionSource::OpenVocabulary,
            DetectionSource::BackgroundReclassified,
        ]
    );

    let scores = out.scores();
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    for d in &out {
        let [x1, y1, x2, y2] = d.bbox.to_xyxy().coords();
        assert!(0.0 <= x1 && x1 <= x2 && x2 <= WIDTH as f32);
        assert!(0.0 <= y1 && y1 <= y2 && y2 <= HEIGHT as f32);
        assert_eq!(d.category_id, 0);
    }
}

#[test]
fn test_segmentation_failure_names_stage() {
    let err = detector(true).infer_batch(&[image(1), image(2)]).unwrap_err();
    match err {
        NodError::Stage {
            image_id, stage, ..
        } => {
            assert_eq!(image_id, 1);
            assert_eq!(stage, PipelineStage::Segmentation);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_rejects_mismatched_vocabulary() {
    let remapper = LabelRemapper::new()
        .with_mapping(LabelSpace::ClosedSet, CategoryMapping::table([(0, 0)]).unwrap());
    let models = Models {
        closed_set: FixedDetector,
        embedder: UnitEmbedder,
        grounding: SingleQuery,
        segmenter: BoxSegmenter { fail: false },
    };
    let cfg = NodConfig {
        num_categories: 2,
        ..config()
    };
    assert!(matches!(
        NovelObjectDetector::new(models, vocabulary(), remapper, &cfg),
        Err(NodError::InvalidConfig(_))
    ));
}

#[test]
fn test_text_encoding_failure_keeps_source() {
    let err = Vocabulary::encode(&BrokenEncoder, &["okapi".to_string()], Vec::new()).unwrap_err();
    assert!(matches!(err, NodError::TextEncoding(_)));
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "tokenizer missing");
}

#[test]
fn test_inference_feeds_evaluator() {
    let gt = Lvis::from_dataset(Dataset {
        images: vec![Image {
            id: 1,
            file_name: "1.jpg".into(),
            height: HEIGHT,
            width: WIDTH,
            neg_category_ids: Vec::new(),
            not_exhaustive_category_ids: Vec::new(),
        }],
        annotations: vec![Annotation {
            id: 1,
            image_id: 1,
            category_id: 1,
            bbox: [4.0, 4.0, 16.0, 16.0],
            area: Some(256.0),
            segmentation: None,
            ignore: false,
            score: None,
        }],
        categories: vec![Category {
            id: 1,
            name: "okapi".into(),
            frequency: Some(Frequency::Rare),
            synonyms: Vec::new(),
            image_count: None,
            instance_count: None,
        }],
    });
    let remapper =
        LabelRemapper::new().with_mapping(LabelSpace::Dataset, CategoryMapping::index_shift(1));
    let mut evaluator = LvisEvaluator::new(gt, remapper, 300)
        .unwrap()
        .with_known_class_ids(Vec::new());

    let det = detector(false);
    let report = inference(
        vec![vec![image(1)]],
        |batch: &[ImageInput]| det.infer_batch(batch),
        &mut evaluator,
        &LoopConfig::default(),
    )
    .unwrap();

    let ap = report.all.get("AP").unwrap();
    assert!((0.0..=1.0).contains(&ap));
    assert_eq!(report.known.unwrap().get("AP"), Some(-1.0));
    assert!(report.novel.unwrap().get("APr").unwrap() >= 0.0);
}
