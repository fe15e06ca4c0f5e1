//! Capture-session abstraction.
//!
//! This is the only hardware dependency of the kernel. A session enumerates
//! devices, accepts one input and two outputs (color + depth), and once
//! running pushes samples into the registered sinks from its own threads.
//!
//! Sessions report failures as `anyhow::Error`; `FrameSource` classifies
//! them into `SetupError` variants.

use std::sync::Arc;
use std::thread::ThreadId;

use anyhow::Result;

use crate::frame::{DepthMap, Frame};

/// Color sample callback. Invoked on the session's color thread.
pub type ColorSink = Arc<dyn Fn(Frame) + Send + Sync>;

/// Depth sample callback. Invoked on the session's depth thread.
pub type DepthSink = Arc<dyn Fn(DepthMap) + Send + Sync>;

/// Settings applied to the session while configuring.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    /// Device identifier (e.g., "stub://lidar").
    pub device: String,
    pub color_width: u32,
    pub color_height: u32,
    pub color_fps: u32,
    /// Native depth resolution; independent of the color resolution.
    pub depth_width: u32,
    pub depth_height: u32,
    pub depth_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: "stub://lidar".to_string(),
            color_width: 640,
            color_height: 480,
            color_fps: 30,
            depth_width: 256,
            depth_height: 192,
            depth_fps: 15,
        }
    }
}

/// One enumerated capture device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    /// Device can deliver a depth stream alongside color.
    pub supports_depth: bool,
    pub connected: bool,
    pub suspended: bool,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, supports_depth: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            supports_depth,
            connected: true,
            suspended: false,
        }
    }

    /// Connected and not suspended.
    pub fn is_available(&self) -> bool {
        self.connected && !self.suspended
    }

    /// Can serve both streams this kernel needs.
    pub fn qualifies(&self) -> bool {
        self.supports_depth
    }
}

/// Capture authorization state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    /// The user has not been asked yet; `request_access` may prompt.
    NotDetermined,
    Denied,
}

/// Hardware capture session.
pub trait CaptureSession: Send {
    fn authorization(&self) -> Authorization;

    /// Ask for access when undetermined. Returns true when granted.
    fn request_access(&mut self) -> bool {
        false
    }

    /// All devices the session can see, in enumeration order.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// The platform's default device, if any.
    fn default_device(&self) -> Option<DeviceInfo>;

    /// Open a configuration transaction. Changes apply at commit.
    fn begin_configuration(&mut self) {}

    fn commit_configuration(&mut self) {}

    fn attach_input(&mut self, device: &DeviceInfo) -> Result<()>;

    fn detach_input(&mut self);

    /// Apply resolution, frame rate and depth format.
    fn configure(&mut self, settings: &CaptureSettings) -> Result<()>;

    fn attach_color_output(&mut self, sink: ColorSink) -> Result<()>;

    fn attach_depth_output(&mut self, sink: DepthSink) -> Result<()>;

    fn detach_outputs(&mut self);

    fn start_running(&mut self) -> Result<()>;

    /// Stop delivering samples.
    ///
    /// Must block until no sink invocation is executing, except when called
    /// from one of the session's own callback threads, where it only signals.
    fn stop_running(&mut self);

    fn is_running(&self) -> bool;

    /// Threads that invoke the sinks and that `stop_running` joins.
    ///
    /// Sessions that join their own threads must list them, otherwise a
    /// stop requested from a callback can wait on a teardown that is
    /// joining it.
    fn delivery_threads(&self) -> Vec<ThreadId> {
        Vec::new()
    }
}
