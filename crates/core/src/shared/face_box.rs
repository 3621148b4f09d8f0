/// A detected face in pixel coordinates of the source photo.
///
/// `x2`/`y2` are exclusive. Detector output is already clamped to the image.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub confidence: f64,
}

impl FaceBox {
    /// Builds a box from floating-point corners, clamping to `[0, width] x [0, height]`.
    pub fn from_corners(
        corners: [f64; 4],
        confidence: f64,
        width: u32,
        height: u32,
    ) -> Self {
        let clamp = |v: f64, max: u32| v.round().clamp(0.0, max as f64) as u32;
        Self {
            x1: clamp(corners[0], width),
            y1: clamp(corners[1], height),
            x2: clamp(corners[2], width),
            y2: clamp(corners[3], height),
            confidence,
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Grows the box by `fraction` of its size on every side, clamped to the image.
    ///
    /// Embedding models see more of the head this way, which makes matches
    /// across photos more stable than a tight detector crop.
    pub fn padded(&self, fraction: f64, width: u32, height: u32) -> FaceBox {
        let pad_x = (self.width() as f64 * fraction) as u32;
        let pad_y = (self.height() as f64 * fraction) as u32;
        FaceBox {
            x1: self.x1.saturating_sub(pad_x),
            y1: self.y1.saturating_sub(pad_y),
            x2: (self.x2 + pad_x).min(width),
            y2: (self.y2 + pad_y).min(height),
            confidence: self.confidence,
        }
    }

    pub fn iou(&self, other: &FaceBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = ix2.saturating_sub(ix1) as f64 * iy2.saturating_sub(iy1) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        let area_a = self.width() as f64 * self.height() as f64;
        let area_b = other.width() as f64 * other.height() as f64;
        inter / (area_a + area_b - inter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn face(x1: u32, y1: u32, x2: u32, y2: u32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_padded_grows_each_side() {
        let padded = face(50, 50, 100, 150).padded(0.2, 1000, 1000);
        assert_eq!(padded, face(40, 30, 110, 170));
    }

    #[test]
    fn test_padded_clamps_to_image() {
        let padded = face(0, 5, 100, 100).padded(0.2, 110, 105);
        assert_eq!(padded, face(0, 0, 110, 105));
    }

    #[test]
    fn test_padded_zero_fraction_is_identity() {
        let f = face(10, 20, 30, 40);
        assert_eq!(f.padded(0.0, 100, 100), f);
    }

    #[test]
    fn test_from_corners_clamps_negative_and_overflow() {
        let b = FaceBox::from_corners([-5.0, 3.4, 120.6, 99.0], 0.7, 100, 50);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (0, 3, 100, 50));
        assert_relative_eq!(b.confidence, 0.7);
    }

    #[rstest]
    #[case::no_overlap(face(0, 0, 10, 10), face(20, 20, 30, 30), 0.0)]
    #[case::identical(face(0, 0, 10, 10), face(0, 0, 10, 10), 1.0)]
    #[case::partial(face(0, 0, 10, 10), face(5, 5, 15, 15), 25.0 / 175.0)]
    #[case::degenerate(face(0, 0, 0, 10), face(0, 0, 10, 10), 0.0)]
    fn test_iou(#[case] a: FaceBox, #[case] b: FaceBox, #[case] expected: f64) {
        assert_relative_eq!(a.iou(&b), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_is_empty() {
        assert!(face(5, 5, 5, 10).is_empty());
        assert!(!face(5, 5, 6, 6).is_empty());
    }
}
