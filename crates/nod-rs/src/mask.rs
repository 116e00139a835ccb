//! Dense binary masks produced by the promptable segmentation model.

use crate::error::{NodError, Result};

/// Row-major binary mask: pixel `(x, y)` is at index `y * width + x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl BinaryMask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Result<Self> {
        let n = (width as usize) * (height as usize);
        if data.len() != n {
            return Err(NodError::InvalidMask(format!(
                "{} pixels for a {}x{} mask",
                data.len(),
                width,
                height
            )));
        }
        Ok(BinaryMask {
            width,
            height,
            data,
        })
    }

    pub fn empty(width: u32, height: u32) -> Self {
        BinaryMask {
            width,
            height,
            data: vec![false; (width as usize) * (height as usize)],
        }
    }

    /// Threshold a row-major map of mask logits or probabilities.
    pub fn from_scores(width: u32, height: u32, scores: &[f32], threshold: f32) -> Result<Self> {
        Self::new(width, height, scores.iter().map(|&s| s > threshold).collect())
    }

    /// Fill the pixels whose centers fall inside the corner-form box.
    pub fn from_box(width: u32, height: u32, xyxy: [f32; 4]) -> Self {
        let mut mask = Self::empty(width, height);
        let w = width as usize;
        for y in 0..height as usize {
            let cy = y as f32 + 0.5;
            if cy < xyxy[1] || cy > xyxy[3] {
                continue;
            }
            for x in 0..w {
                let cx = x as f32 + 0.5;
                if cx >= xyxy[0] && cx <= xyxy[2] {
                    mask.data[y * w + x] = true;
                }
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Number of positive pixels.
    pub fn area(&self) -> u64 {
        self.data.iter().filter(|&&v| v).count() as u64
    }

    /// Tight box `[min_x, min_y, max_x, max_y]` around the positive pixels.
    ///
    /// Maxima are inclusive pixel indices. `None` for an all-negative mask.
    pub fn tight_box(&self) -> Option<[u32; 4]> {
        let w = self.width as usize;
        if w == 0 {
            return None;
        }
        let mut xs = u32::MAX;
        let mut ys = u32::MAX;
        let mut xe = 0u32;
        let mut ye = 0u32;

        for (y, row) in self.data.chunks_exact(w).enumerate() {
            let first = match row.iter().position(|&v| v) {
                Some(i) => i as u32,
                None => continue,
            };
            let last = row.iter().rposition(|&v| v).unwrap_or(first as usize) as u32;
            let y = y as u32;
            xs = xs.min(first);
            xe = xe.max(last);
            ys = ys.min(y);
            ye = ye.max(y);
        }

        (xs != u32::MAX).then_some([xs, ys, xe, ye])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tight_box() {
        // 4 wide, 3 tall
        // row 0: . . . .
        // row 1: . X X .
        // row 2: . . . X
        let data = vec![
            false, false, false, false, //
            false, true, true, false, //
            false, false, false, true,
        ];
        let mask = BinaryMask::new(4, 3, data).unwrap();
        assert_eq!(mask.area(), 3);
        assert_eq!(mask.tight_box(), Some([1, 1, 3, 2]));
    }

    #[test]
    fn test_empty_mask_has_no_box() {
        assert_eq!(BinaryMask::empty(5, 5).tight_box(), None);
        assert_eq!(BinaryMask::empty(0, 0).tight_box(), None);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(BinaryMask::new(2, 2, vec![true; 3]).is_err());
    }

    #[test]
    fn test_from_box() {
        let mask = BinaryMask::from_box(5, 5, [1.0, 1.0, 3.0, 3.0]);
        assert_eq!(mask.area(), 4);
        assert_eq!(mask.tight_box(), Some([1, 1, 2, 2]));
        assert!(mask.get(2, 2));
        assert!(!mask.get(3, 3));
    }

    #[test]
    fn test_from_scores() {
        let mask = BinaryMask::from_scores(2, 1, &[-1.0, 2.5], 0.0).unwrap();
        assert_eq!(mask.tight_box(), Some([1, 0, 1, 0]));
    }
}
