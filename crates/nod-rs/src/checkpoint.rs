//! Periodic snapshots of the accumulated per-image predictions.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::types::ImagePredictions;

/// `<dir>/predictions_<processed>.bin`
pub fn checkpoint_path(dir: &Path, processed: usize) -> PathBuf {
    dir.join(format!("predictions_{}.bin", processed))
}

/// Write `predictions` after `processed` batches. Returns the file written.
pub fn save(dir: &Path, processed: usize, predictions: &[ImagePredictions]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = checkpoint_path(dir, processed);
    let bytes = bincode::serialize(predictions)?;
    std::fs::write(&path, bytes)?;
    info!(
        images = predictions.len(),
        "saved prediction checkpoint to {}",
        path.display()
    );
    Ok(path)
}

pub fn load(path: &Path) -> Result<Vec<ImagePredictions>> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultAnnotation;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let predictions = vec![
            ImagePredictions {
                image_id: 7,
                instances: vec![ResultAnnotation {
                    image_id: 7,
                    category_id: 3,
                    bbox: [1.0, 2.0, 3.0, 4.0],
                    score: 0.25,
                }],
            },
            ImagePredictions {
                image_id: 8,
                instances: Vec::new(),
            },
        ];
        let path = save(&dir.path().join("out"), 2500, &predictions).unwrap();
        assert!(path.ends_with("predictions_2500.bin"));
        assert_eq!(load(&path).unwrap(), predictions);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("predictions_1.bin")).is_err());
    }
}
