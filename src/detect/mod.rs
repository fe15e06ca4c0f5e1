mod backend;
pub mod backends;
pub mod engine;
mod filter;
mod registry;
mod result;

pub use backend::InferenceModel;
pub use backends::{StubModel, STUB_LABELS};
pub use engine::{DetectionSettings, EngineStats, InferenceEngine, PassOutcome, Submission};
pub use filter::LabelFilter;
pub use registry::{available_backends, load_model};
pub use result::{BoundingBox, DetectedObject, DetectionSet, RawDetection};
