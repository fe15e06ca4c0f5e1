use serde::{Deserialize, Serialize};

/// Normalized rectangle in color-frame coordinates.
///
/// Origin is the top-left corner of the color frame and `y` grows downward.
/// All four fields are fractions of the frame's width/height in `[0, 1]`,
/// independent of color or depth pixel resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Build a box, clamping it into the unit square.
    ///
    /// Non-finite inputs collapse to zero so downstream math never sees NaN.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        let x = unit(x);
        let y = unit(y);
        let w = unit(w).min(1.0 - x);
        let h = unit(h).min(1.0 - y);
        Self { x, y, w, h }
    }

    /// Convert a box whose origin is the bottom-left corner (y grows upward).
    pub fn from_bottom_left(x: f32, y: f32, w: f32, h: f32) -> Self {
        let h_clamped = unit(h);
        Self::new(x, 1.0 - unit(y) - h_clamped, w, h_clamped)
    }

    /// Box from pixel corners in an image of the given size.
    pub fn from_pixels(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }
        let (w, h) = (width as f32, height as f32);
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        let left = unit(left / w);
        let top = unit(top / h);
        Self::new(left, top, unit(right / w) - left, unit(bottom / h) - top)
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.w / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.h / 2.0
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        if right <= left || bottom <= top {
            return 0.0;
        }
        let inter = (right - left) * (bottom - top);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        (inter / union).clamp(0.0, 1.0)
    }
}

fn unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// One detection as produced by a model, before filtering and id assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }
}

/// A detection accepted by the inference engine.
///
/// `id` is unique within one inference pass. `depth` is filled in by fusion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedObject {
    pub id: u32,
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub depth: Option<f32>,
}

/// Output of one completed inference pass.
#[derive(Clone, Debug, Default)]
pub struct DetectionSet {
    /// Engine-wide pass counter (monotonic).
    pub pass: u64,
    /// Sequence number of the frame the pass ran on.
    pub frame_sequence: u64,
    /// Caller tag given to `InferenceEngine::submit_tagged`.
    pub tag: u64,
    pub objects: Vec<DetectedObject>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_into_unit_square() {
        let b = BoundingBox::new(0.9, -0.5, 0.5, 2.0);
        assert_eq!(b.x, 0.9);
        assert_eq!(b.y, 0.0);
        assert!((b.w - 0.1).abs() < 1e-6);
        assert_eq!(b.h, 1.0);

        let nan = BoundingBox::new(f32::NAN, 0.2, f32::INFINITY, 0.1);
        assert_eq!(nan.x, 0.0);
        assert_eq!(nan.w, 0.0);
    }

    #[test]
    fn bottom_left_origin_is_flipped() {
        let b = BoundingBox::from_bottom_left(0.1, 0.1, 0.2, 0.3);
        assert!((b.y - 0.6).abs() < 1e-6);
        assert!((b.center_y() - 0.75).abs() < 1e-6);
        assert!((b.center_x() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn from_pixels_normalizes_corners() {
        let b = BoundingBox::from_pixels(320.0, 240.0, 160.0, 120.0, 640, 480);
        assert!((b.x - 0.25).abs() < 1e-6);
        assert!((b.y - 0.25).abs() < 1e-6);
        assert!((b.w - 0.25).abs() < 1e-6);
        assert!((b.h - 0.25).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
        let b = BoundingBox::new(0.5, 0.5, 0.2, 0.2);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
