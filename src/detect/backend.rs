use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detection model trait.
///
/// A model is loaded once at start-up and then driven by exactly one
/// inference worker, so `infer` takes `&mut self` and implementations need
/// no internal locking.
///
/// Boxes returned by `infer` must use the crate's normalized top-left
/// convention (see `BoundingBox`). Confidence filtering and class filtering
/// are applied by the engine afterwards; a model may return everything it
/// sees.
pub trait InferenceModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one color frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<M: InferenceModel + ?Sized> InferenceModel for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        (**self).infer(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
