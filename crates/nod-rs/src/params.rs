/// Evaluation parameters controlling IoU thresholds, area ranges, and detection limits.
///
/// Defaults match the LVIS evaluation protocol: 10 IoU thresholds
/// (0.50:0.05:0.95), 101 recall thresholds, the standard small/medium/large
/// area ranges, and a single cap of 300 detections per image.
#[derive(Debug, Clone)]
pub struct Params {
    /// Image IDs to evaluate (empty = all images).
    pub img_ids: Vec<u64>,
    /// Category IDs to evaluate (empty = all categories).
    pub cat_ids: Vec<u64>,
    /// IoU thresholds for matching (default: 0.50, 0.55, ..., 0.95).
    pub iou_thrs: Vec<f64>,
    /// Recall thresholds for interpolated precision (default: 0.00, 0.01, ..., 1.00).
    pub rec_thrs: Vec<f64>,
    /// Maximum detections per image.
    pub max_dets: usize,
    /// Area ranges as `[min, max]` for filtering (default: all/small/medium/large).
    pub area_rng: Vec<[f64; 2]>,
    /// Labels for each area range (e.g. "all", "small", "medium", "large").
    pub area_rng_lbl: Vec<String>,
}

impl Default for Params {
    fn default() -> Self {
        Self::new(300)
    }
}

impl Params {
    pub fn new(max_dets: usize) -> Self {
        let iou_thrs: Vec<f64> = (0..10).map(|i| 0.5 + 0.05 * i as f64).collect();
        let rec_thrs: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();

        Params {
            img_ids: Vec::new(),
            cat_ids: Vec::new(),
            iou_thrs,
            rec_thrs,
            max_dets,
            area_rng: vec![
                [0.0, 1e10],
                [0.0, 32_f64.powi(2)],
                [32_f64.powi(2), 96_f64.powi(2)],
                [96_f64.powi(2), 1e10],
            ],
            area_rng_lbl: vec![
                "all".into(),
                "small".into(),
                "medium".into(),
                "large".into(),
            ],
        }
    }

    /// Index of the IoU threshold equal to `thr`, if any.
    pub fn iou_thr_index(&self, thr: f64) -> Option<usize> {
        self.iou_thrs.iter().position(|&t| (t - thr).abs() < 1e-9)
    }

    /// Index of the area range labelled `label`, if any.
    pub fn area_index(&self, label: &str) -> Option<usize> {
        self.area_rng_lbl.iter().position(|l| l == label)
    }
}
