//! Bounding boxes that know which coordinate form they are in.

/// Coordinate layout of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxFormat {
    /// Corner form `(x1, y1, x2, y2)`.
    Xyxy,
    /// Center form `(cx, cy, w, h)`.
    Cxcywh,
    /// Top-left corner plus size `(x, y, w, h)`, as in the result files.
    Xywh,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    coords: [f32; 4],
    format: BoxFormat,
}

impl BBox {
    pub fn new(coords: [f32; 4], format: BoxFormat) -> Self {
        BBox { coords, format }
    }

    pub fn xyxy(coords: [f32; 4]) -> Self {
        Self::new(coords, BoxFormat::Xyxy)
    }

    pub fn cxcywh(coords: [f32; 4]) -> Self {
        Self::new(coords, BoxFormat::Cxcywh)
    }

    pub fn format(&self) -> BoxFormat {
        self.format
    }

    /// Raw coordinates in the current format.
    pub fn coords(&self) -> [f32; 4] {
        self.coords
    }

    /// Convert to corner form.
    pub fn to_xyxy(self) -> Self {
        let [a, b, c, d] = self.coords;
        let coords = match self.format {
            BoxFormat::Xyxy => self.coords,
            BoxFormat::Cxcywh => [a - 0.5 * c, b - 0.5 * d, a + 0.5 * c, b + 0.5 * d],
            BoxFormat::Xywh => [a, b, a + c, b + d],
        };
        Self::xyxy(coords)
    }

    /// Convert to center form.
    pub fn to_cxcywh(self) -> Self {
        let [x1, y1, x2, y2] = self.to_xyxy().coords;
        Self::cxcywh([(x1 + x2) * 0.5, (y1 + y2) * 0.5, x2 - x1, y2 - y1])
    }

    /// Convert to `(x, y, w, h)`.
    pub fn to_xywh(self) -> Self {
        let [x1, y1, x2, y2] = self.to_xyxy().coords;
        Self::new([x1, y1, x2 - x1, y2 - y1], BoxFormat::Xywh)
    }

    /// Scale normalized `[0, 1]` coordinates to pixels. Format is preserved.
    pub fn scale(self, width: f32, height: f32) -> Self {
        let [a, b, c, d] = self.coords;
        Self::new([a * width, b * height, c * width, d * height], self.format)
    }

    /// Clip a box to the image rectangle. The result is in corner form.
    pub fn clamp(self, width: f32, height: f32) -> Self {
        let [x1, y1, x2, y2] = self.to_xyxy().coords;
        Self::xyxy([
            x1.clamp(0.0, width),
            y1.clamp(0.0, height),
            x2.clamp(0.0, width),
            y2.clamp(0.0, height),
        ])
    }

    pub fn width(&self) -> f32 {
        let [x1, _, x2, _] = self.to_xyxy().coords;
        x2 - x1
    }

    pub fn height(&self) -> f32 {
        let [_, y1, _, y2] = self.to_xyxy().coords;
        y2 - y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
}

/// IoU between sets of `[x, y, w, h]` boxes. Returns a D×G matrix.
///
/// Result rows follow `dt`, columns follow `gt`. Empty inputs give an
/// empty row per detection.
pub fn bbox_iou(dt: &[[f64; 4]], gt: &[[f64; 4]]) -> Vec<Vec<f64>> {
    if dt.is_empty() || gt.is_empty() {
        return vec![vec![]; dt.len()];
    }

    dt.iter()
        .map(|d| {
            let da = d[2] * d[3];
            gt.iter()
                .map(|g| {
                    let ga = g[2] * g[3];
                    let iw = ((d[0] + d[2]).min(g[0] + g[2]) - d[0].max(g[0])).max(0.0);
                    let ih = ((d[1] + d[3]).min(g[1] + g[3]) - d[1].max(g[1])).max(0.0);
                    let inter = iw * ih;
                    let union = da + ga - inter;
                    if union <= 0.0 {
                        0.0
                    } else {
                        inter / union
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_to_corner() {
        let b = BBox::cxcywh([0.5, 0.5, 0.2, 0.4]).scale(100.0, 50.0).to_xyxy();
        assert_eq!(b.format(), BoxFormat::Xyxy);
        let [x1, y1, x2, y2] = b.coords();
        assert!((x1 - 40.0).abs() < 1e-4);
        assert!((y1 - 15.0).abs() < 1e-4);
        assert!((x2 - 60.0).abs() < 1e-4);
        assert!((y2 - 35.0).abs() < 1e-4);
    }

    #[test]
    fn test_round_trip_forms() {
        let b = BBox::xyxy([10.0, 20.0, 30.0, 60.0]);
        assert_eq!(b.to_cxcywh().coords(), [20.0, 40.0, 20.0, 40.0]);
        assert_eq!(b.to_cxcywh().to_xyxy(), b);
        assert_eq!(b.to_xywh().coords(), [10.0, 20.0, 20.0, 40.0]);
        assert_eq!(b.to_xywh().to_xyxy(), b);
    }

    #[test]
    fn test_clamp() {
        let b = BBox::xyxy([-5.0, 2.0, 120.0, 40.0]).clamp(100.0, 30.0);
        assert_eq!(b.coords(), [0.0, 2.0, 100.0, 30.0]);
        assert_eq!(b.area(), 2800.0);
    }

    #[test]
    fn test_bbox_iou() {
        let dt = [[0.0, 0.0, 10.0, 10.0]];
        let gt = [[5.0, 5.0, 10.0, 10.0]];
        let ious = bbox_iou(&dt, &gt);
        // inter = 25, union = 175
        assert!((ious[0][0] - 25.0 / 175.0).abs() < 1e-10);
    }

    #[test]
    fn test_bbox_iou_empty() {
        let ious = bbox_iou(&[[0.0, 0.0, 1.0, 1.0]], &[]);
        assert_eq!(ious, vec![Vec::<f64>::new()]);
    }
}
