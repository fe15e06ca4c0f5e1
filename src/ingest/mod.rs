//! Sensor ingestion.
//!
//! This module provides:
//! - `CaptureSession`: the hardware seam (device enumeration, input/output
//!   attachment, color + depth callbacks)
//! - `FrameSource`: device selection and session lifecycle on top of a session
//! - `SyntheticSession`: a software session for `stub://` devices (testing,
//!   development without hardware)
//!
//! Sessions deliver immutable `Frame` / `DepthMap` values on their own
//! callback threads. The ingestion layer MUST NOT:
//! - Mutate samples after delivery
//! - Block callback threads on inference
//! - Log pixel or depth content

pub mod session;
pub mod source;
pub mod synthetic;

use anyhow::{bail, Result};

pub use session::{
    Authorization, CaptureSession, CaptureSettings, ColorSink, DepthSink, DeviceInfo,
};
pub use source::FrameSource;
pub use synthetic::{DepthPattern, DeviceList, FailurePlan, SyntheticSession};

/// Open the session backend for the configured device.
pub fn open_session(settings: &CaptureSettings) -> Result<Box<dyn CaptureSession>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSession::new()));
    }
    bail!(
        "no capture backend available for device '{}' (only stub:// devices are built in)",
        settings.device
    )
}
