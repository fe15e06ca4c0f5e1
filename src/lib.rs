//! Fusion Kernel
//!
//! Real-time object detection fused with per-pixel depth.
//!
//! # Architecture
//!
//! A capture session delivers colour frames and depth maps on independent
//! threads. Colour frames feed a single-slot inference engine; depth maps are
//! sampled under each detected box. A single fusion worker combines the
//! latest detections, the latest depth map and the latest display image into
//! an immutable `Snapshot` and publishes it atomically.
//!
//! The pipeline holds these properties by construction:
//!
//! 1. **One pass at a time**: frames arriving while inference runs are dropped.
//! 2. **Consistent depth**: a snapshot's object depths and closest distance
//!    come from the same depth map.
//! 3. **Single writer**: only the fusion worker publishes.
//! 4. **Quiet after stop**: nothing is published once `stop_session` returns.
//!
//! # Module Structure
//!
//! - `frame`: immutable colour frames and depth maps
//! - `ingest`: capture sessions and the frame source
//! - `detect`: model backends, the inference engine and label filtering
//! - `depth`: box-to-depth sampling
//! - `fusion`: the coordinator and published state
//! - `announce`: spoken summaries of a snapshot
//! - `config`: file and environment configuration

pub mod announce;
pub mod config;
pub mod depth;
pub mod detect;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod ingest;

pub use announce::{describe, Announcer};
pub use config::{FusionConfig, ModelSettings, PublishSettings};
pub use depth::{DepthSampler, SamplePolicy};
pub use detect::{
    BoundingBox, DetectedObject, DetectionSet, DetectionSettings, InferenceEngine,
    InferenceModel, LabelFilter, RawDetection,
};
pub use error::{FrameError, ModelLoadError, OutputKind, SetupError};
pub use frame::{DepthMap, Frame};
pub use fusion::{
    FusionCoordinator, FusionSettings, PipelineState, PipelineStats, Snapshot,
    SnapshotSubscriber, StatusEvent,
};
pub use ingest::{CaptureSession, CaptureSettings, DeviceInfo, FrameSource, SyntheticSession};
