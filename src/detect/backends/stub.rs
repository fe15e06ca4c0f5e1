use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::InferenceModel;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;

/// Labels the stub model can report.
pub const STUB_LABELS: &[&str] = &["person", "chair", "door", "table", "bottle", "car"];

/// Stub model for testing and synthetic runs.
///
/// Detections are derived from a hash of the frame's pixels, so identical
/// frames always produce identical detections and changing scenes produce
/// changing detections.
#[derive(Default)]
pub struct StubModel {
    passes: u64,
}

impl StubModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl InferenceModel for StubModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.passes += 1;
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();

        let count = 1 + (digest[0] % 3) as usize;
        let detections = (0..count)
            .map(|i| {
                let base = 1 + i * 6;
                let label = STUB_LABELS[digest[base] as usize % STUB_LABELS.len()];
                let confidence = 0.3 + (digest[base + 1] as f32 / 255.0) * 0.7;
                let w = 0.1 + (digest[base + 2] as f32 / 255.0) * 0.3;
                let h = 0.1 + (digest[base + 3] as f32 / 255.0) * 0.3;
                let x = (digest[base + 4] as f32 / 255.0) * (1.0 - w);
                let y = (digest[base + 5] as f32 / 255.0) * (1.0 - h);
                RawDetection::new(label, confidence, BoundingBox::new(x, y, w, h))
            })
            .collect();

        Ok(detections)
    }
}
