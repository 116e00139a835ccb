use serde::{Deserialize, Serialize};

/// Top-level LVIS-format dataset structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dataset {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Image {
    pub id: u64,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
    /// Categories verified to be absent from the image.
    #[serde(default)]
    pub neg_category_ids: Vec<u64>,
    /// Categories present in the image but not exhaustively annotated.
    #[serde(default)]
    pub not_exhaustive_category_ids: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// `[x, y, w, h]` in pixels.
    pub bbox: [f64; 4],
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub segmentation: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub ignore: bool,
    /// Detection score (present only in result annotations).
    #[serde(default)]
    pub score: Option<f64>,
}

impl Annotation {
    /// Annotated area, falling back to the box area.
    pub fn area(&self) -> f64 {
        self.area.unwrap_or(self.bbox[2] * self.bbox[3])
    }
}

/// Category frequency group, by the number of training images it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Frequency {
    /// 1-10 images.
    #[serde(rename = "r")]
    Rare,
    /// 11-100 images.
    #[serde(rename = "c")]
    Common,
    /// More than 100 images.
    #[serde(rename = "f")]
    Frequent,
}

impl Frequency {
    pub fn index(self) -> usize {
        match self {
            Frequency::Rare => 0,
            Frequency::Common => 1,
            Frequency::Frequent => 2,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Frequency::Rare => 'r',
            Frequency::Common => 'c',
            Frequency::Frequent => 'f',
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub image_count: Option<u64>,
    #[serde(default)]
    pub instance_count: Option<u64>,
}

/// One detection in the evaluation result-file schema.
///
/// Serialized as `{"image_id", "category_id", "bbox": [x, y, w, h], "score"}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResultAnnotation {
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: [f64; 4],
    pub score: f64,
}

impl From<ResultAnnotation> for Annotation {
    fn from(r: ResultAnnotation) -> Self {
        Annotation {
            id: 0,
            image_id: r.image_id,
            category_id: r.category_id,
            bbox: r.bbox,
            area: None,
            segmentation: None,
            ignore: false,
            score: Some(r.score),
        }
    }
}

/// All predictions made for one image, in the shared category index space.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImagePredictions {
    pub image_id: u64,
    pub instances: Vec<ResultAnnotation>,
}
