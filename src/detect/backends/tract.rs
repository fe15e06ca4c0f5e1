#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceModel;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::{Frame, RGB_CHANNELS};

/// Scores below this floor are discarded before NMS.
const SCORE_FLOOR: f32 = 0.05;

/// Tract-based YOLO-style detector.
///
/// Expects a single `[1, 4 + classes, anchors]` f32 output where the first
/// four rows are `cx, cy, w, h` in model-input pixels and the remaining rows
/// are per-class scores. Frames are resized (nearest neighbour) to the model
/// input size. No network I/O, no disk access beyond model loading.
pub struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    width: u32,
    height: u32,
    iou_threshold: f32,
}

impl TractModel {
    /// Load an ONNX model and its newline-separated label file.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: Option<L>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = match labels_path {
            Some(path) => {
                let path = path.as_ref();
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read labels from {}", path.display()))?
                    .lines()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty())
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(Self {
            model,
            labels,
            width,
            height,
            iou_threshold: 0.45,
        })
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("empty frame"));
        }
        let pixels = frame.pixels();
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let sy = (y * src_h / dst_h).min(src_h - 1);
            let idx = (sy * src_w + sx) * RGB_CHANNELS + c;
            pixels.get(idx).copied().unwrap_or(0) as f32 / 255.0
        });

        Ok(input.into_tensor())
    }

    fn label_for(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class))
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let (rows, anchors) = (shape[1], shape[2]);

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class in 0..rows - 4 {
                let score = view[[0, 4 + class, a]];
                if score > best.1 {
                    best = (class, score);
                }
            }
            if !best.1.is_finite() || best.1 < SCORE_FLOOR {
                continue;
            }
            let cx = view[[0, 0, a]];
            let cy = view[[0, 1, a]];
            let w = view[[0, 2, a]];
            let h = view[[0, 3, a]];
            let bbox = BoundingBox::from_pixels(
                cx - w / 2.0,
                cy - h / 2.0,
                cx + w / 2.0,
                cy + h / 2.0,
                self.width,
                self.height,
            );
            candidates.push((best.0, RawDetection::new(self.label_for(best.0), best.1.min(1.0), bbox)));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Per-class greedy NMS, highest confidence first.
fn non_max_suppression(
    mut candidates: Vec<(usize, RawDetection)>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut keep: Vec<(usize, RawDetection)> = Vec::new();
    for (class, det) in candidates {
        let suppressed = keep.iter().any(|(kept_class, kept)| {
            *kept_class == class && kept.bounding_box.iou(&det.bounding_box) > iou_threshold
        });
        if !suppressed {
            keep.push((class, det));
        }
    }
    keep.into_iter().map(|(_, det)| det).collect()
}

impl InferenceModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_overlapping_box_per_class() {
        let b = BoundingBox::new(0.1, 0.1, 0.3, 0.3);
        let shifted = BoundingBox::new(0.12, 0.1, 0.3, 0.3);
        let kept = non_max_suppression(
            vec![
                (0, RawDetection::new("person", 0.6, b)),
                (0, RawDetection::new("person", 0.9, shifted)),
                (1, RawDetection::new("chair", 0.5, b)),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "chair");
    }
}
