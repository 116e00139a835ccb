use crate::boxes::BBox;

/// Default number of candidates kept per image.
pub const DEFAULT_TOP_K: usize = 300;

/// Which model family produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionSource {
    /// Known-class output of the closed-set detector.
    ClosedSet,
    /// Query of the grounding detector.
    OpenVocabulary,
    /// Background-class box of the closed-set detector, re-labelled by the
    /// region classifier.
    BackgroundReclassified,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub score: f32,
    /// Category in the shared contiguous index space.
    pub category_id: u32,
    pub source: DetectionSource,
}

impl Detection {
    pub fn new(bbox: BBox, score: f32, category_id: u32, source: DetectionSource) -> Self {
        Detection {
            bbox,
            score,
            category_id,
            source,
        }
    }
}

/// Detections of a single image, ordered by descending score once ranked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn scores(&self) -> Vec<f32> {
        self.detections.iter().map(|d| d.score).collect()
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Detection] {
        &mut self.detections
    }

    /// Sort by descending score and keep the best `top_k`.
    ///
    /// The sort is stable, so exact ties keep their insertion order; callers
    /// must not rely on that order.
    pub fn rank(&mut self, top_k: usize) {
        self.detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.detections.truncate(top_k);
    }
}

impl FromIterator<Detection> for DetectionSet {
    fn from_iter<T: IntoIterator<Item = Detection>>(iter: T) -> Self {
        DetectionSet {
            detections: iter.into_iter().collect(),
        }
    }
}

impl Extend<Detection> for DetectionSet {
    fn extend<T: IntoIterator<Item = Detection>>(&mut self, iter: T) {
        self.detections.extend(iter);
    }
}

impl IntoIterator for DetectionSet {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.into_iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(score: f32, cat: u32) -> Detection {
        Detection::new(
            BBox::xyxy([0.0, 0.0, 1.0, 1.0]),
            score,
            cat,
            DetectionSource::ClosedSet,
        )
    }

    #[test]
    fn test_rank_sorts_and_truncates() {
        let mut set: DetectionSet = [det(0.1, 0), det(0.9, 1), det(0.5, 2)].into_iter().collect();
        set.rank(2);
        assert_eq!(set.len(), 2);
        assert_eq!(set.scores(), vec![0.9, 0.5]);
    }
}
