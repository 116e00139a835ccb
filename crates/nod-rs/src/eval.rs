//! Federated LVIS box evaluation: evaluate, accumulate, summarize.
//!
//! A detection of category `c` in image `i` is scored only when `c` is
//! annotated in `i` or listed in the image's `neg_category_ids`. Unmatched
//! detections of categories in `not_exhaustive_category_ids` are ignored.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::info;

use crate::boxes::bbox_iou;
use crate::error::{NodError, Result};
use crate::lvis::Lvis;
use crate::params::Params;
use crate::summary::{
    iou_range, lvis_metrics, mean_of_valid, EvaluationResult, MetricKind, SubsetSummarizer,
};
use crate::types::Annotation;

/// Per-image, per-category, per-area evaluation result.
#[derive(Debug, Clone)]
struct EvalImg {
    /// Detection matches for each IoU threshold: dt_matches[t][d] = matched gt id or 0
    dt_matches: Vec<Vec<u64>>,
    /// Detection scores, descending
    dt_scores: Vec<f64>,
    /// Whether each GT is ignored, regular GTs first
    gt_ignore: Vec<bool>,
    /// Whether each detection is ignored per IoU threshold
    dt_ignore: Vec<Vec<bool>>,
}

/// Accumulated interpolated precision `[T x R x K x A]` and recall
/// `[T x K x A]`. A cell of `-1` means the category has no ground truth in
/// that area range.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionRecallTable {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub t: usize,
    pub r: usize,
    pub k: usize,
    pub a: usize,
}

impl PrecisionRecallTable {
    /// A table with every cell set to `-1`.
    pub fn new(t: usize, r: usize, k: usize, a: usize) -> Self {
        PrecisionRecallTable {
            precision: vec![-1.0; t * r * k * a],
            recall: vec![-1.0; t * k * a],
            t,
            r,
            k,
            a,
        }
    }

    pub fn precision_idx(&self, t: usize, r: usize, k: usize, a: usize) -> usize {
        ((t * self.r + r) * self.k + k) * self.a + a
    }

    pub fn recall_idx(&self, t: usize, k: usize, a: usize) -> usize {
        (t * self.k + k) * self.a + a
    }
}

type PairAnns<'a> = (Vec<&'a Annotation>, Vec<&'a Annotation>);

/// Categories an image is scored on: the annotated ones and the ones
/// verified to be absent.
#[derive(Debug, Default)]
struct ImageLabels {
    positive: HashSet<u64>,
    negative: HashSet<u64>,
}

impl ImageLabels {
    fn of(gt: &Lvis, img_id: u64) -> Self {
        ImageLabels {
            positive: gt.positive_cat_ids(img_id),
            negative: gt
                .get_img(img_id)
                .map(|img| img.neg_category_ids.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn scores(&self, cat_id: u64) -> bool {
        self.positive.contains(&cat_id) || self.negative.contains(&cat_id)
    }
}

/// The LVIS evaluation object.
pub struct LvisEval {
    pub lvis_gt: Lvis,
    pub lvis_dt: Lvis,
    pub params: Params,
    eval_imgs: Vec<Option<EvalImg>>,
    ious: HashMap<(u64, u64), Vec<Vec<f64>>>,
    img_labels: HashMap<u64, ImageLabels>,
    freq_groups: [Vec<usize>; 3],
    evaluated: bool,
    pub eval: Option<PrecisionRecallTable>,
}

impl LvisEval {
    pub fn new(lvis_gt: Lvis, lvis_dt: Lvis) -> Self {
        LvisEval {
            lvis_gt,
            lvis_dt,
            params: Params::default(),
            eval_imgs: Vec::new(),
            ious: HashMap::new(),
            img_labels: HashMap::new(),
            freq_groups: Default::default(),
            evaluated: false,
            eval: None,
        }
    }

    /// Category positions of each frequency group, set by `evaluate()`.
    pub fn freq_groups(&self) -> &[Vec<usize>; 3] {
        &self.freq_groups
    }

    /// Ground truths (file order) and scored detections (by score, stable)
    /// of one image and category.
    ///
    /// Detections are only scored for categories annotated in the image or
    /// verified absent from it.
    fn pair_anns<'a>(
        gt: &'a Lvis,
        dt: &'a Lvis,
        img_labels: &HashMap<u64, ImageLabels>,
        img_id: u64,
        cat_id: u64,
    ) -> PairAnns<'a> {
        let gts = gt.anns_for_img_cat(img_id, cat_id);
        let scored = img_labels
            .get(&img_id)
            .is_some_and(|labels| labels.scores(cat_id));
        let mut dts = if scored {
            dt.anns_for_img_cat(img_id, cat_id)
        } else {
            Vec::new()
        };
        dts.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .total_cmp(&a.score.unwrap_or(0.0))
        });
        (gts, dts)
    }

    /// Run per-image evaluation.
    pub fn evaluate(&mut self) {
        if self.params.img_ids.is_empty() {
            self.params.img_ids = self.lvis_gt.get_img_ids();
        }
        if self.params.cat_ids.is_empty() {
            self.params.cat_ids = self.lvis_gt.get_cat_ids();
        }
        self.freq_groups = self.lvis_gt.freq_groups(&self.params.cat_ids);
        self.img_labels = self
            .params
            .img_ids
            .iter()
            .map(|&img_id| (img_id, ImageLabels::of(&self.lvis_gt, img_id)))
            .collect();

        let img_ids = self.params.img_ids.clone();
        let cat_ids = self.params.cat_ids.clone();
        info!(
            images = img_ids.len(),
            categories = cat_ids.len(),
            "running per image evaluation"
        );

        let pairs: Vec<(u64, u64)> = cat_ids
            .iter()
            .flat_map(|&cat_id| img_ids.iter().map(move |&img_id| (img_id, cat_id)))
            .collect();

        #[allow(clippy::type_complexity)]
        let iou_results: Vec<((u64, u64), Vec<Vec<f64>>)> = pairs
            .par_iter()
            .map(|&(img_id, cat_id)| {
                let (gts, dts) = Self::pair_anns(
                    &self.lvis_gt,
                    &self.lvis_dt,
                    &self.img_labels,
                    img_id,
                    cat_id,
                );
                let iou_matrix = if gts.is_empty() || dts.is_empty() {
                    Vec::new()
                } else {
                    let dt_bbs: Vec<[f64; 4]> = dts.iter().map(|a| a.bbox).collect();
                    let gt_bbs: Vec<[f64; 4]> = gts.iter().map(|a| a.bbox).collect();
                    bbox_iou(&dt_bbs, &gt_bbs)
                };
                ((img_id, cat_id), iou_matrix)
            })
            .collect();

        self.ious.clear();
        self.ious.reserve(iou_results.len());
        for (key, val) in iou_results {
            self.ious.insert(key, val);
        }

        let area_rngs = self.params.area_rng.clone();
        let mut eval_tuples: Vec<(u64, [f64; 2], u64)> =
            Vec::with_capacity(cat_ids.len() * area_rngs.len() * img_ids.len());
        for &cat_id in &cat_ids {
            for &area_rng in &area_rngs {
                for &img_id in &img_ids {
                    eval_tuples.push((cat_id, area_rng, img_id));
                }
            }
        }

        self.eval_imgs = eval_tuples
            .par_iter()
            .map(|&(cat_id, area_rng, img_id)| {
                Self::evaluate_img_static(
                    &self.lvis_gt,
                    &self.lvis_dt,
                    &self.img_labels,
                    &self.params,
                    &self.ious,
                    img_id,
                    cat_id,
                    area_rng,
                )
            })
            .collect();
        self.evaluated = true;
    }

    /// Evaluate a single image+category+area combination.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_img_static(
        lvis_gt: &Lvis,
        lvis_dt: &Lvis,
        img_labels: &HashMap<u64, ImageLabels>,
        params: &Params,
        ious: &HashMap<(u64, u64), Vec<Vec<f64>>>,
        img_id: u64,
        cat_id: u64,
        area_rng: [f64; 2],
    ) -> Option<EvalImg> {
        let (gt_anns, dt_anns) = Self::pair_anns(lvis_gt, lvis_dt, img_labels, img_id, cat_id);
        if gt_anns.is_empty() && dt_anns.is_empty() {
            return None;
        }

        let out_of_range = |area: f64| area < area_rng[0] || area > area_rng[1];
        let gt_ignore: Vec<bool> = gt_anns
            .iter()
            .map(|ann| ann.ignore || out_of_range(ann.area()))
            .collect();

        // Regular GTs first, ignored last, file order otherwise.
        let mut gt_order: Vec<usize> = (0..gt_anns.len()).collect();
        gt_order.sort_by_key(|&i| gt_ignore[i] as u8);
        let gt_ignore_sorted: Vec<bool> = gt_order.iter().map(|&i| gt_ignore[i]).collect();

        let num_iou_thrs = params.iou_thrs.len();
        let d = dt_anns.len();
        let g = gt_anns.len();

        let mut dt_matches = vec![vec![0u64; d]; num_iou_thrs];
        let mut gt_matched = vec![vec![false; g]; num_iou_thrs];
        let mut dt_ignore = vec![vec![false; d]; num_iou_thrs];

        if let Some(iou_mat) = ious.get(&(img_id, cat_id)).filter(|m| !m.is_empty()) {
            for (t_idx, &iou_thr) in params.iou_thrs.iter().enumerate() {
                for di in 0..d {
                    let mut best_iou = iou_thr.min(1.0 - 1e-10);
                    let mut best_gi: Option<usize> = None;

                    for (gi_sorted, &gi_orig) in gt_order.iter().enumerate() {
                        if gt_matched[t_idx][gi_sorted] {
                            continue;
                        }
                        // A regular match beats any ignored GT, and ignored GTs are last.
                        if let Some(prev) = best_gi {
                            if !gt_ignore_sorted[prev] && gt_ignore_sorted[gi_sorted] {
                                break;
                            }
                        }
                        let iou_val = iou_mat[di][gi_orig];
                        if iou_val < best_iou {
                            continue;
                        }
                        best_iou = iou_val;
                        best_gi = Some(gi_sorted);
                    }

                    if let Some(gi) = best_gi {
                        dt_matches[t_idx][di] = gt_anns[gt_order[gi]].id;
                        gt_matched[t_idx][gi] = true;
                        dt_ignore[t_idx][di] = gt_ignore_sorted[gi];
                    }
                }
            }
        }

        // Unmatched detections are ignored outside the area range or when the
        // category is not exhaustively annotated in this image.
        let not_exhaustive = lvis_gt
            .get_img(img_id)
            .is_some_and(|img| img.not_exhaustive_category_ids.contains(&cat_id));
        for (di, ann) in dt_anns.iter().enumerate() {
            let ignorable = not_exhaustive || out_of_range(ann.area());
            for t_idx in 0..num_iou_thrs {
                if dt_matches[t_idx][di] == 0 && ignorable {
                    dt_ignore[t_idx][di] = true;
                }
            }
        }

        Some(EvalImg {
            dt_matches,
            dt_scores: dt_anns.iter().map(|a| a.score.unwrap_or(0.0)).collect(),
            gt_ignore: gt_ignore_sorted,
            dt_ignore,
        })
    }

    /// Accumulate per-image results into the precision/recall table.
    pub fn accumulate(&mut self) -> Result<()> {
        if !self.evaluated {
            return Err(NodError::NotAccumulated);
        }
        let t = self.params.iou_thrs.len();
        let r = self.params.rec_thrs.len();
        let k = self.params.cat_ids.len();
        let a = self.params.area_rng.len();
        let num_imgs = self.params.img_ids.len();

        let work_items: Vec<(usize, usize)> = (0..k)
            .flat_map(|k_idx| (0..a).map(move |a_idx| (k_idx, a_idx)))
            .collect();

        // Each work item produces a set of (index, value) writes for precision and recall
        struct AccResult {
            precision_writes: Vec<(usize, f64)>,
            recall_writes: Vec<(usize, f64)>,
        }

        let shape = PrecisionRecallTable {
            precision: vec![],
            recall: vec![],
            t,
            r,
            k,
            a,
        };

        let results: Vec<AccResult> = work_items
            .par_iter()
            .map(|&(k_idx, a_idx)| {
                let mut precision_writes = Vec::new();
                let mut recall_writes = Vec::new();

                let evals: Vec<&EvalImg> = (0..num_imgs)
                    .filter_map(|img_idx| {
                        let eval_idx = k_idx * (a * num_imgs) + a_idx * num_imgs + img_idx;
                        self.eval_imgs.get(eval_idx).and_then(|e| e.as_ref())
                    })
                    .collect();

                let num_gt: usize = evals
                    .iter()
                    .map(|e| e.gt_ignore.iter().filter(|&&x| !x).count())
                    .sum();
                if num_gt == 0 {
                    return AccResult {
                        precision_writes,
                        recall_writes,
                    };
                }

                let mut all_dt_scores: Vec<f64> = Vec::new();
                let mut all_dt_matches: Vec<Vec<u64>> = vec![Vec::new(); t];
                let mut all_dt_ignore: Vec<Vec<bool>> = vec![Vec::new(); t];
                for eval_img in &evals {
                    all_dt_scores.extend_from_slice(&eval_img.dt_scores);
                    for t_idx in 0..t {
                        all_dt_matches[t_idx].extend_from_slice(&eval_img.dt_matches[t_idx]);
                        all_dt_ignore[t_idx].extend_from_slice(&eval_img.dt_ignore[t_idx]);
                    }
                }

                // Sort by score descending, stable.
                let mut inds: Vec<usize> = (0..all_dt_scores.len()).collect();
                inds.sort_by(|&x, &y| all_dt_scores[y].total_cmp(&all_dt_scores[x]));

                for t_idx in 0..t {
                    let mut tp = Vec::with_capacity(inds.len());
                    let mut fp = Vec::with_capacity(inds.len());
                    let (mut tp_sum, mut fp_sum) = (0.0f64, 0.0f64);
                    for &i in &inds {
                        if !all_dt_ignore[t_idx][i] {
                            if all_dt_matches[t_idx][i] != 0 {
                                tp_sum += 1.0;
                            } else {
                                fp_sum += 1.0;
                            }
                        }
                        tp.push(tp_sum);
                        fp.push(fp_sum);
                    }

                    let rc: Vec<f64> = tp.iter().map(|&x| x / num_gt as f64).collect();
                    let mut pr: Vec<f64> = tp
                        .iter()
                        .zip(fp.iter())
                        .map(|(&tp_v, &fp_v)| tp_v / (tp_v + fp_v + f64::EPSILON))
                        .collect();

                    recall_writes.push((
                        shape.recall_idx(t_idx, k_idx, a_idx),
                        rc.last().copied().unwrap_or(0.0),
                    ));

                    for d in (1..pr.len()).rev() {
                        if pr[d] > pr[d - 1] {
                            pr[d - 1] = pr[d];
                        }
                    }

                    // Precision at the first recall reaching each threshold, 0 past the end.
                    for (r_idx, &rec_thr) in self.params.rec_thrs.iter().enumerate() {
                        let pos = rc.partition_point(|&x| x < rec_thr);
                        let value = pr.get(pos).copied().unwrap_or(0.0);
                        let idx = shape.precision_idx(t_idx, r_idx, k_idx, a_idx);
                        precision_writes.push((idx, value));
                    }
                }

                AccResult {
                    precision_writes,
                    recall_writes,
                }
            })
            .collect();

        let mut table = PrecisionRecallTable::new(t, r, k, a);
        for result in results {
            for (idx, val) in result.precision_writes {
                table.precision[idx] = val;
            }
            for (idx, val) in result.recall_writes {
                table.recall[idx] = val;
            }
        }
        self.eval = Some(table);
        Ok(())
    }

    /// evaluate + accumulate.
    pub fn run(&mut self) -> Result<()> {
        self.evaluate();
        self.accumulate()
    }

    /// Mean precision or recall over one slice of the table.
    fn summarize_stat(
        &self,
        table: &PrecisionRecallTable,
        kind: MetricKind,
        iou_thr: Option<f64>,
        area_lbl: &str,
        freq_group: Option<usize>,
    ) -> f64 {
        let a_idx = match self.params.area_index(area_lbl) {
            Some(a) => a,
            None => return -1.0,
        };
        let t_indices: Vec<usize> = match iou_thr {
            Some(thr) => self.params.iou_thr_index(thr).into_iter().collect(),
            None => (0..table.t).collect(),
        };

        let mut vals = Vec::new();
        match kind {
            MetricKind::Precision => {
                let k_indices: Vec<usize> = match freq_group {
                    Some(group) => self.freq_groups[group].clone(),
                    None => (0..table.k).collect(),
                };
                for &t_idx in &t_indices {
                    for r_idx in 0..table.r {
                        for &k_idx in &k_indices {
                            let idx = table.precision_idx(t_idx, r_idx, k_idx, a_idx);
                            vals.push(table.precision[idx]);
                        }
                    }
                }
            }
            MetricKind::Recall => {
                for &t_idx in &t_indices {
                    for k_idx in 0..table.k {
                        vals.push(table.recall[table.recall_idx(t_idx, k_idx, a_idx)]);
                    }
                }
            }
        }
        mean_of_valid(vals)
    }

    /// The thirteen LVIS summary metrics over every category.
    pub fn summarize(&self) -> Result<EvaluationResult> {
        let table = self.eval.as_ref().ok_or(NodError::NotAccumulated)?;
        let metrics = lvis_metrics(self.params.max_dets)
            .into_iter()
            .map(|m| {
                let freq_group = m.frequency.map(|f| f.index());
                let value = self.summarize_stat(table, m.kind, m.iou_thr, m.area, freq_group);
                (m, value)
            })
            .collect();
        Ok(EvaluationResult {
            subset: "all".to_string(),
            max_dets: self.params.max_dets,
            iou_range: iou_range(&self.params),
            metrics,
        })
    }

    /// Summary metrics restricted to category subsets.
    pub fn subset_summarizer(&self) -> Result<SubsetSummarizer<'_>> {
        let table = self.eval.as_ref().ok_or(NodError::NotAccumulated)?;
        Ok(SubsetSummarizer::new(table, &self.params, &self.freq_groups))
    }

    /// Print the fixed-width summary lines.
    pub fn print_results(&self) -> Result<()> {
        let results = self.summarize()?;
        print!("{}", results);
        Ok(())
    }
}
