//! LVIS-format dataset loading and querying.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{NodError, Result};
use crate::types::{Annotation, Category, Dataset, Image, ResultAnnotation};

/// Indexed ground-truth (or result) annotations.
#[derive(Debug, Clone)]
pub struct Lvis {
    pub dataset: Dataset,
    /// ann_id -> index into dataset.annotations
    anns: HashMap<u64, usize>,
    /// img_id -> index into dataset.images
    imgs: HashMap<u64, usize>,
    /// cat_id -> index into dataset.categories
    cats: HashMap<u64, usize>,
    /// img_id -> [ann_id, ...]
    img_to_anns: HashMap<u64, Vec<u64>>,
    /// (img_id, cat_id) -> [ann_id, ...] in file order
    img_cat_to_anns: HashMap<(u64, u64), Vec<u64>>,
}

impl Lvis {
    /// Load an annotation JSON file and build indices.
    pub fn new(annotation_file: &Path) -> Result<Self> {
        let file = std::fs::File::open(annotation_file)?;
        let reader = std::io::BufReader::new(file);
        let dataset: Dataset = serde_json::from_reader(reader)?;
        info!(
            images = dataset.images.len(),
            annotations = dataset.annotations.len(),
            categories = dataset.categories.len(),
            "loaded {}",
            annotation_file.display()
        );
        Ok(Self::from_dataset(dataset))
    }

    /// Build from an already-loaded Dataset.
    pub fn from_dataset(dataset: Dataset) -> Self {
        let mut lvis = Lvis {
            dataset,
            anns: HashMap::new(),
            imgs: HashMap::new(),
            cats: HashMap::new(),
            img_to_anns: HashMap::new(),
            img_cat_to_anns: HashMap::new(),
        };
        lvis.create_index();
        lvis
    }

    fn create_index(&mut self) {
        for (i, ann) in self.dataset.annotations.iter().enumerate() {
            self.anns.insert(ann.id, i);
            self.img_to_anns
                .entry(ann.image_id)
                .or_default()
                .push(ann.id);
            self.img_cat_to_anns
                .entry((ann.image_id, ann.category_id))
                .or_default()
                .push(ann.id);
        }
        for (i, img) in self.dataset.images.iter().enumerate() {
            self.imgs.insert(img.id, i);
        }
        for (i, cat) in self.dataset.categories.iter().enumerate() {
            self.cats.insert(cat.id, i);
        }
    }

    /// Sorted ids of every image.
    pub fn get_img_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.dataset.images.iter().map(|i| i.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Sorted ids of every category.
    pub fn get_cat_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.dataset.categories.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_ann(&self, id: u64) -> Option<&Annotation> {
        self.anns.get(&id).map(|&i| &self.dataset.annotations[i])
    }

    pub fn get_img(&self, id: u64) -> Option<&Image> {
        self.imgs.get(&id).map(|&i| &self.dataset.images[i])
    }

    pub fn get_cat(&self, id: u64) -> Option<&Category> {
        self.cats.get(&id).map(|&i| &self.dataset.categories[i])
    }

    pub fn load_anns(&self, ids: &[u64]) -> Vec<&Annotation> {
        ids.iter().filter_map(|&id| self.get_ann(id)).collect()
    }

    /// Annotations for one (image, category) pair, in file order.
    pub fn anns_for_img_cat(&self, img_id: u64, cat_id: u64) -> Vec<&Annotation> {
        self.img_cat_to_anns
            .get(&(img_id, cat_id))
            .map(|ids| self.load_anns(ids))
            .unwrap_or_default()
    }

    /// Category ids annotated at least once in `img_id`.
    pub fn positive_cat_ids(&self, img_id: u64) -> HashSet<u64> {
        self.img_to_anns
            .get(&img_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|&id| self.get_ann(id).map(|a| a.category_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Positions (in sorted category-id order) of the categories of each
    /// frequency group, indexed by [`crate::types::Frequency::index`].
    pub fn freq_groups(&self, cat_ids: &[u64]) -> [Vec<usize>; 3] {
        let mut groups: [Vec<usize>; 3] = Default::default();
        for (idx, cat_id) in cat_ids.iter().enumerate() {
            if let Some(freq) = self.get_cat(*cat_id).and_then(|c| c.frequency) {
                groups[freq.index()].push(idx);
            }
        }
        groups
    }

    /// Load a result file (a JSON array of result annotations).
    pub fn load_res(&self, res_file: &Path, max_dets: usize) -> Result<Lvis> {
        let file = std::fs::File::open(res_file)?;
        let reader = std::io::BufReader::new(file);
        let results: Vec<ResultAnnotation> = serde_json::from_reader(reader)?;
        self.load_res_anns(results, max_dets)
    }

    /// Build a result object sharing this dataset's images and categories.
    ///
    /// Keeps the `max_dets` best-scoring detections per image, derives areas
    /// from the boxes, and numbers the detections from 1.
    pub fn load_res_anns(&self, results: Vec<ResultAnnotation>, max_dets: usize) -> Result<Lvis> {
        if let Some(r) = results.iter().find(|r| !self.imgs.contains_key(&r.image_id)) {
            return Err(NodError::UnknownImage(r.image_id));
        }
        if results.is_empty() {
            warn!("result set is empty");
        }

        let mut per_image: Vec<(u64, Vec<ResultAnnotation>)> = Vec::new();
        let mut slot: HashMap<u64, usize> = HashMap::new();
        for r in results {
            let i = *slot.entry(r.image_id).or_insert_with(|| {
                per_image.push((r.image_id, Vec::new()));
                per_image.len() - 1
            });
            per_image[i].1.push(r);
        }

        let mut annotations = Vec::new();
        for (_, mut anns) in per_image {
            if anns.len() > max_dets {
                anns.sort_by(|a, b| b.score.total_cmp(&a.score));
                anns.truncate(max_dets);
            }
            annotations.extend(anns.into_iter().map(Annotation::from));
        }
        for (i, ann) in annotations.iter_mut().enumerate() {
            ann.id = (i + 1) as u64;
            ann.area = Some(ann.bbox[2] * ann.bbox[3]);
        }

        Ok(Lvis::from_dataset(Dataset {
            images: self.dataset.images.clone(),
            annotations,
            categories: self.dataset.categories.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Frequency;

    fn image(id: u64, neg: Vec<u64>, nel: Vec<u64>) -> Image {
        Image {
            id,
            file_name: format!("{}.jpg", id),
            height: 100,
            width: 100,
            neg_category_ids: neg,
            not_exhaustive_category_ids: nel,
        }
    }

    fn ann(id: u64, image_id: u64, category_id: u64, bbox: [f64; 4]) -> Annotation {
        Annotation {
            id,
            image_id,
            category_id,
            bbox,
            area: Some(bbox[2] * bbox[3]),
            segmentation: None,
            ignore: false,
            score: None,
        }
    }

    fn category(id: u64, frequency: Frequency) -> Category {
        Category {
            id,
            name: format!("cat{}", id),
            frequency: Some(frequency),
            synonyms: Vec::new(),
            image_count: None,
            instance_count: None,
        }
    }

    fn make_test_dataset() -> Dataset {
        Dataset {
            images: vec![image(2, vec![3], vec![]), image(1, vec![], vec![2])],
            annotations: vec![
                ann(1, 1, 1, [10.0, 10.0, 20.0, 20.0]),
                ann(2, 1, 2, [30.0, 30.0, 10.0, 10.0]),
                ann(3, 2, 1, [0.0, 0.0, 50.0, 50.0]),
            ],
            categories: vec![
                category(2, Frequency::Common),
                category(1, Frequency::Frequent),
                category(3, Frequency::Rare),
            ],
        }
    }

    #[test]
    fn test_indices() {
        let lvis = Lvis::from_dataset(make_test_dataset());
        assert_eq!(lvis.get_img_ids(), vec![1, 2]);
        assert_eq!(lvis.get_cat_ids(), vec![1, 2, 3]);
        assert_eq!(lvis.anns_for_img_cat(1, 2).len(), 1);
        assert!(lvis.anns_for_img_cat(2, 2).is_empty());
    }

    #[test]
    fn test_positive_cats_and_freq_groups() {
        let lvis = Lvis::from_dataset(make_test_dataset());
        let pos = lvis.positive_cat_ids(1);
        assert!(pos.contains(&1) && pos.contains(&2));
        let groups = lvis.freq_groups(&lvis.get_cat_ids());
        assert_eq!(groups[Frequency::Rare.index()], vec![2]);
        assert_eq!(groups[Frequency::Common.index()], vec![1]);
        assert_eq!(groups[Frequency::Frequent.index()], vec![0]);
    }

    #[test]
    fn test_load_res_caps_per_image() {
        let lvis = Lvis::from_dataset(make_test_dataset());
        let results: Vec<ResultAnnotation> = (0..5)
            .map(|i| ResultAnnotation {
                image_id: 1,
                category_id: 1,
                bbox: [0.0, 0.0, 2.0, 3.0],
                score: i as f64 / 10.0,
            })
            .chain(std::iter::once(ResultAnnotation {
                image_id: 2,
                category_id: 1,
                bbox: [0.0, 0.0, 1.0, 1.0],
                score: 0.05,
            }))
            .collect();
        let res = lvis.load_res_anns(results, 2).unwrap();
        assert_eq!(res.dataset.annotations.len(), 3);
        let img1: Vec<f64> = res
            .dataset
            .annotations
            .iter()
            .filter(|a| a.image_id == 1)
            .filter_map(|a| a.score)
            .collect();
        assert_eq!(img1, vec![0.4, 0.3]);
        assert!(res.dataset.annotations.iter().all(|a| a.id > 0));
        assert_eq!(res.dataset.annotations[0].area, Some(6.0));
    }

    #[test]
    fn test_load_res_rejects_unknown_image() {
        let lvis = Lvis::from_dataset(make_test_dataset());
        let results = vec![ResultAnnotation {
            image_id: 99,
            category_id: 1,
            bbox: [0.0; 4],
            score: 1.0,
        }];
        assert!(matches!(
            lvis.load_res_anns(results, 300),
            Err(NodError::UnknownImage(99))
        ));
    }
}
