//! Summary metrics over the accumulated precision/recall table, optionally
//! restricted to a subset of categories (e.g. known vs. novel).

use std::fmt;

use crate::error::{NodError, Result};
use crate::eval::PrecisionRecallTable;
use crate::params::Params;
use crate::remap::{CategoryMapping, LabelRemapper, LabelSpace};
use crate::types::Frequency;

/// Whether a metric averages interpolated precision or final recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Precision,
    Recall,
}

/// One summary statistic: which slice of the table it averages.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub kind: MetricKind,
    /// A single IoU threshold, or every threshold when `None`.
    pub iou_thr: Option<f64>,
    pub area: &'static str,
    /// Restrict to one frequency group (precision metrics only).
    pub frequency: Option<Frequency>,
}

impl MetricSpec {
    fn ap(
        name: &str,
        iou_thr: Option<f64>,
        area: &'static str,
        frequency: Option<Frequency>,
    ) -> Self {
        MetricSpec {
            name: name.to_string(),
            kind: MetricKind::Precision,
            iou_thr,
            area,
            frequency,
        }
    }

    fn ar(name: String, area: &'static str) -> Self {
        MetricSpec {
            name,
            kind: MetricKind::Recall,
            iou_thr: None,
            area,
            frequency: None,
        }
    }
}

/// The thirteen LVIS summary metrics, in reporting order.
pub fn lvis_metrics(max_dets: usize) -> Vec<MetricSpec> {
    vec![
        MetricSpec::ap("AP", None, "all", None),
        MetricSpec::ap("AP50", Some(0.5), "all", None),
        MetricSpec::ap("AP75", Some(0.75), "all", None),
        MetricSpec::ap("APs", None, "small", None),
        MetricSpec::ap("APm", None, "medium", None),
        MetricSpec::ap("APl", None, "large", None),
        MetricSpec::ap("APr", None, "all", Some(Frequency::Rare)),
        MetricSpec::ap("APc", None, "all", Some(Frequency::Common)),
        MetricSpec::ap("APf", None, "all", Some(Frequency::Frequent)),
        MetricSpec::ar(format!("AR@{}", max_dets), "all"),
        MetricSpec::ar(format!("ARs@{}", max_dets), "small"),
        MetricSpec::ar(format!("ARm@{}", max_dets), "medium"),
        MetricSpec::ar(format!("ARl@{}", max_dets), "large"),
    ]
}

/// Mean of the cells holding data; `-1` when there are none.
pub(crate) fn mean_of_valid<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, n) = values
        .into_iter()
        .filter(|&v| v > -1.0)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        -1.0
    } else {
        sum / n as f64
    }
}

/// Summary values for one category subset.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Subset name (`all`, `known`, `novel`, ...).
    pub subset: String,
    pub max_dets: usize,
    /// First and last IoU threshold, for display.
    pub iou_range: [f64; 2],
    pub metrics: Vec<(MetricSpec, f64)>,
}

impl EvaluationResult {
    /// Raw value of metric `name`; `-1` means no data.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(m, _)| m.name == name)
            .map(|(_, v)| *v)
    }

    /// Value of metric `name` in percent, `NaN` when there is no data.
    pub fn percent(&self, name: &str) -> Option<f64> {
        self.get(name).map(to_percent)
    }

    /// `(name, percent)` pairs in reporting order.
    pub fn percentages(&self) -> Vec<(String, f64)> {
        self.metrics
            .iter()
            .map(|(m, v)| (m.name.clone(), to_percent(*v)))
            .collect()
    }

    /// Compact table of the percent values: a header row, an alignment row
    /// and one value row.
    pub fn small_table(&self) -> String {
        let cells: Vec<(String, String)> = self
            .percentages()
            .into_iter()
            .map(|(name, v)| (name, format!("{:.3}", v)))
            .collect();
        let widths: Vec<usize> = cells
            .iter()
            .map(|(name, v)| name.len().max(v.len()) + 2)
            .collect();

        let row = |pick: &dyn Fn(&(String, String)) -> String| -> String {
            let mut line = String::from("|");
            for (cell, w) in cells.iter().zip(&widths) {
                line.push_str(&format!("{:^w$}|", pick(cell), w = *w));
            }
            line
        };
        let header = row(&|c: &(String, String)| c.0.clone());
        let values = row(&|c: &(String, String)| c.1.clone());
        let mut align = String::from("|");
        for w in &widths {
            align.push(':');
            align.push_str(&"-".repeat(w - 2));
            align.push_str(":|");
        }
        format!("{}\n{}\n{}", header, align, values)
    }
}

fn to_percent(v: f64) -> f64 {
    if v < 0.0 {
        f64::NAN
    } else {
        v * 100.0
    }
}

/// Fixed-width per-metric lines; cells without data print as `NaN`.
impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (metric, value) in &self.metrics {
            let (title, short) = match metric.kind {
                MetricKind::Precision => ("Average Precision", "(AP)"),
                MetricKind::Recall => ("Average Recall", "(AR)"),
            };
            let iou = match metric.iou_thr {
                Some(thr) => format!("{:.2}", thr),
                None => format!("{:.2}:{:.2}", self.iou_range[0], self.iou_range[1]),
            };
            let area = match metric.area {
                "all" => "all".to_string(),
                other => other[..1].to_string(),
            };
            let cat_group = match metric.frequency {
                Some(freq) => freq.letter().to_string(),
                None => "all".to_string(),
            };
            let value = if *value < 0.0 { f64::NAN } else { *value };
            writeln!(
                f,
                " {:<18} {} @[ IoU={:<9} | area={:>6} | maxDets={:>3} catIds={:>3}] = {:0.3}",
                title, short, iou, area, self.max_dets, cat_group, value
            )?;
        }
        Ok(())
    }
}

/// A named set of contiguous category indices (positions in the sorted
/// category id list of the evaluation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySubset {
    name: String,
    indices: Vec<usize>,
}

impl CategorySubset {
    /// Sorts and deduplicates `indices`.
    pub fn new(name: impl Into<String>, mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        CategorySubset {
            name: name.into(),
            indices,
        }
    }

    pub fn all(num_categories: usize) -> Self {
        Self::new("all", (0..num_categories).collect())
    }

    /// The categories with dataset ids `known_ids`, where `cat_ids` is the
    /// sorted category id list the table was accumulated over.
    pub fn known(known_ids: &[u64], cat_ids: &[u64]) -> Result<Self> {
        let mapping =
            CategoryMapping::table(cat_ids.iter().enumerate().map(|(i, &id)| (id, i as u32)))?;
        let remapper = LabelRemapper::new().with_mapping(LabelSpace::Dataset, mapping);
        let indices = known_ids
            .iter()
            .map(|&id| {
                remapper
                    .to_shared(id, LabelSpace::Dataset)
                    .map(|i| i as usize)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new("known", indices))
    }

    /// Every index in `0..num_categories` not in this subset.
    pub fn complement(&self, name: impl Into<String>, num_categories: usize) -> Self {
        let indices = (0..num_categories)
            .filter(|i| self.indices.binary_search(i).is_err())
            .collect();
        Self::new(name, indices)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Sorted intersection with another sorted index list.
    fn intersect(&self, other: &[usize]) -> Vec<usize> {
        self.indices
            .iter()
            .copied()
            .filter(|i| other.binary_search(i).is_ok())
            .collect()
    }
}

/// Results for the whole taxonomy and its known/novel partition.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownNovelResults {
    pub all: EvaluationResult,
    pub known: EvaluationResult,
    pub novel: EvaluationResult,
}

/// Computes summary metrics from an accumulated table, optionally restricted
/// to a category subset.
pub struct SubsetSummarizer<'a> {
    table: &'a PrecisionRecallTable,
    params: &'a Params,
    freq_groups: &'a [Vec<usize>; 3],
}

impl<'a> SubsetSummarizer<'a> {
    pub fn new(
        table: &'a PrecisionRecallTable,
        params: &'a Params,
        freq_groups: &'a [Vec<usize>; 3],
    ) -> Self {
        SubsetSummarizer {
            table,
            params,
            freq_groups,
        }
    }

    /// Every metric, over `subset` or over every category when `None`.
    pub fn summarize(&self, subset: Option<&CategorySubset>) -> EvaluationResult {
        let all;
        let subset = match subset {
            Some(s) => s,
            None => {
                all = CategorySubset::all(self.table.k);
                &all
            }
        };
        let metrics = lvis_metrics(self.params.max_dets)
            .into_iter()
            .map(|metric| {
                let value = self.stat(&metric, subset);
                (metric, value)
            })
            .collect();
        EvaluationResult {
            subset: subset.name().to_string(),
            max_dets: self.params.max_dets,
            iou_range: iou_range(self.params),
            metrics,
        }
    }

    /// Results for every category, the `known_ids` categories and the rest.
    pub fn summarize_known_novel(&self, known_ids: &[u64]) -> Result<KnownNovelResults> {
        if self.params.cat_ids.len() != self.table.k {
            return Err(NodError::InvalidConfig(format!(
                "{} category ids for a table over {} categories",
                self.params.cat_ids.len(),
                self.table.k
            )));
        }
        let known = CategorySubset::known(known_ids, &self.params.cat_ids)?;
        let novel = known.complement("novel", self.table.k);
        Ok(KnownNovelResults {
            all: self.summarize(None),
            known: self.summarize(Some(&known)),
            novel: self.summarize(Some(&novel)),
        })
    }

    fn stat(&self, metric: &MetricSpec, subset: &CategorySubset) -> f64 {
        let table = self.table;
        let a = match self.params.area_index(metric.area) {
            Some(a) => a,
            None => return -1.0,
        };
        let thresholds: Vec<usize> = match metric.iou_thr {
            Some(thr) => self.params.iou_thr_index(thr).into_iter().collect(),
            None => (0..table.t).collect(),
        };

        match metric.kind {
            MetricKind::Precision => {
                let categories = match metric.frequency {
                    Some(freq) => {
                        let mut group = self.freq_groups[freq.index()].clone();
                        group.sort_unstable();
                        subset.intersect(&group)
                    }
                    None => subset.indices().to_vec(),
                };
                let categories = &categories;
                mean_of_valid(thresholds.iter().flat_map(move |&t| {
                    (0..table.r).flat_map(move |r| {
                        categories
                            .iter()
                            .map(move |&k| table.precision[table.precision_idx(t, r, k, a)])
                    })
                }))
            }
            MetricKind::Recall => {
                let categories = subset.indices();
                mean_of_valid(thresholds.iter().flat_map(move |&t| {
                    categories
                        .iter()
                        .map(move |&k| table.recall[table.recall_idx(t, k, a)])
                }))
            }
        }
    }
}

pub(crate) fn iou_range(params: &Params) -> [f64; 2] {
    [
        params.iou_thrs.first().copied().unwrap_or(0.5),
        params.iou_thrs.last().copied().unwrap_or(0.95),
    ]
}
