//! Synthetic capture session for `stub://` devices.
//!
//! The synthetic session behaves like real hardware from the kernel's point
//! of view: it enumerates devices, honours authorization, and once running
//! delivers color and depth samples from two independent threads at their
//! configured rates. Failure knobs let tests exercise every setup path.
//!
//! Scene model: the color image is a moving gradient that changes "scene"
//! every 50 frames; the depth map is a floor-like ramp from 0.5 m (top) to
//! 5 m (bottom) with a few millimetres of noise and an invalid (0.0) border
//! one pixel wide, the way real sensors report unknown edges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use rand::Rng;

use crate::error::OutputKind;
use crate::frame::{DepthMap, Frame, RGB_CHANNELS};

use super::session::{
    Authorization, CaptureSession, CaptureSettings, ColorSink, DepthSink, DeviceInfo,
};

/// Shared, mutable device list. Lets tests plug and unplug devices at runtime.
#[derive(Clone, Default)]
pub struct DeviceList {
    devices: Arc<Mutex<Vec<DeviceInfo>>>,
}

impl DeviceList {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
        }
    }

    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, devices: Vec<DeviceInfo>) {
        *self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = devices;
    }

    /// Mark the device with `id` as (dis)connected.
    pub fn set_connected(&self, id: &str, connected: bool) {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for device in devices.iter_mut().filter(|d| d.id == id) {
            device.connected = connected;
        }
    }
}

/// Which setup step should fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FailurePlan {
    pub input: bool,
    pub configure: bool,
    pub color_output: bool,
    pub depth_output: bool,
    pub start: bool,
}

/// Produces depth maps for the synthetic depth thread.
pub type DepthPattern = Arc<dyn Fn(u64, u32, u32) -> Vec<f32> + Send + Sync>;

pub struct SyntheticSession {
    devices: DeviceList,
    default_device: Option<DeviceInfo>,
    authorization: Authorization,
    grant_on_request: bool,
    failures: FailurePlan,
    depth_pattern: Option<DepthPattern>,

    settings: Option<CaptureSettings>,
    input: Option<DeviceInfo>,
    color_sink: Option<ColorSink>,
    depth_sink: Option<DepthSink>,
    configuring: bool,

    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl SyntheticSession {
    /// One depth-capable device, already authorized.
    pub fn new() -> Self {
        let lidar = DeviceInfo::new("stub://lidar", "Synthetic LiDAR camera", true);
        Self {
            devices: DeviceList::new(vec![lidar.clone()]),
            default_device: Some(lidar),
            authorization: Authorization::Authorized,
            grant_on_request: true,
            failures: FailurePlan::default(),
            depth_pattern: None,
            settings: None,
            input: None,
            color_sink: None,
            depth_sink: None,
            configuring: false,
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    pub fn with_devices(mut self, devices: DeviceList) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_default_device(mut self, device: Option<DeviceInfo>) -> Self {
        self.default_device = device;
        self
    }

    pub fn with_authorization(mut self, authorization: Authorization, grant_on_request: bool) -> Self {
        self.authorization = authorization;
        self.grant_on_request = grant_on_request;
        self
    }

    pub fn with_failures(mut self, failures: FailurePlan) -> Self {
        self.failures = failures;
        self
    }

    /// Replace the default ramp with a custom `(sequence, width, height) -> values` generator.
    pub fn with_depth_pattern(mut self, pattern: DepthPattern) -> Self {
        self.depth_pattern = Some(pattern);
        self
    }

    pub fn device_list(&self) -> DeviceList {
        self.devices.clone()
    }

    /// Currently attached input.
    pub fn input(&self) -> Option<&DeviceInfo> {
        self.input.as_ref()
    }

    fn join_workers(&mut self) {
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                log::error!("SyntheticSession: capture thread panicked");
            }
        }
    }
}

impl Default for SyntheticSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession for SyntheticSession {
    fn authorization(&self) -> Authorization {
        self.authorization
    }

    fn request_access(&mut self) -> bool {
        if self.authorization == Authorization::NotDetermined {
            self.authorization = if self.grant_on_request {
                Authorization::Authorized
            } else {
                Authorization::Denied
            };
        }
        self.authorization == Authorization::Authorized
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.snapshot()
    }

    fn default_device(&self) -> Option<DeviceInfo> {
        self.default_device.clone()
    }

    fn begin_configuration(&mut self) {
        self.configuring = true;
    }

    fn commit_configuration(&mut self) {
        self.configuring = false;
    }

    fn attach_input(&mut self, device: &DeviceInfo) -> Result<()> {
        if self.failures.input {
            bail!("device {} is busy", device.id);
        }
        let known = self.devices.snapshot().iter().any(|d| d.id == device.id)
            || self.default_device.as_ref().map(|d| &d.id) == Some(&device.id);
        if !known {
            bail!("unknown device {}", device.id);
        }
        if self.input.is_some() {
            bail!("session already has an input");
        }
        self.input = Some(device.clone());
        Ok(())
    }

    fn detach_input(&mut self) {
        self.input = None;
    }

    fn configure(&mut self, settings: &CaptureSettings) -> Result<()> {
        if !self.configuring {
            bail!("configure called outside a configuration transaction");
        }
        if self.failures.configure {
            bail!("device rejected {} fps depth format", settings.depth_fps);
        }
        if settings.color_width == 0
            || settings.color_height == 0
            || settings.depth_width == 0
            || settings.depth_height == 0
        {
            bail!("resolution must be non-zero");
        }
        if settings.color_fps == 0 || settings.depth_fps == 0 {
            bail!("frame rate must be non-zero");
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn attach_color_output(&mut self, sink: ColorSink) -> Result<()> {
        if self.failures.color_output {
            bail!("cannot add {} output", OutputKind::Color);
        }
        self.color_sink = Some(sink);
        Ok(())
    }

    fn attach_depth_output(&mut self, sink: DepthSink) -> Result<()> {
        if self.failures.depth_output {
            bail!("cannot add {} output", OutputKind::Depth);
        }
        self.depth_sink = Some(sink);
        Ok(())
    }

    fn detach_outputs(&mut self) {
        self.color_sink = None;
        self.depth_sink = None;
    }

    fn start_running(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.failures.start {
            bail!("session failed to start");
        }
        let settings = self
            .settings
            .clone()
            .ok_or_else(|| anyhow!("session not configured"))?;
        let color_sink = self
            .color_sink
            .clone()
            .ok_or_else(|| anyhow!("color output not attached"))?;
        let depth_sink = self
            .depth_sink
            .clone()
            .ok_or_else(|| anyhow!("depth output not attached"))?;
        if self.input.is_none() {
            bail!("no input attached");
        }

        self.running.store(true, Ordering::SeqCst);
        let started = Instant::now();

        let color = {
            let running = self.running.clone();
            let settings = settings.clone();
            thread::Builder::new()
                .name("color-capture".into())
                .spawn(move || color_loop(settings, running, started, color_sink))?
        };
        let depth = {
            let running = self.running.clone();
            let pattern = self.depth_pattern.clone();
            thread::Builder::new()
                .name("depth-capture".into())
                .spawn(move || depth_loop(settings, running, started, depth_sink, pattern))?
        };
        self.workers = vec![color, depth];

        log::info!(
            "SyntheticSession: running on {}",
            self.input.as_ref().map(|d| d.id.as_str()).unwrap_or("?")
        );
        Ok(())
    }

    fn stop_running(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_workers();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn delivery_threads(&self) -> Vec<ThreadId> {
        self.workers.iter().map(|w| w.thread().id()).collect()
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.stop_running();
    }
}

fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

fn color_loop(
    settings: CaptureSettings,
    running: Arc<AtomicBool>,
    started: Instant,
    sink: ColorSink,
) {
    let interval = frame_interval(settings.color_fps);
    let mut sequence = 0u64;
    let mut scene = 0u8;
    while running.load(Ordering::SeqCst) {
        sequence += 1;
        if sequence % 50 == 0 {
            scene = scene.wrapping_add(1);
        }
        let pixels = synthetic_pixels(settings.color_width, settings.color_height, sequence, scene);
        match Frame::new(
            pixels,
            settings.color_width,
            settings.color_height,
            started.elapsed(),
            sequence,
        ) {
            Ok(frame) => sink(frame),
            Err(err) => log::warn!("SyntheticSession: color frame dropped: {}", err),
        }
        thread::sleep(interval);
    }
}

fn depth_loop(
    settings: CaptureSettings,
    running: Arc<AtomicBool>,
    started: Instant,
    sink: DepthSink,
    pattern: Option<DepthPattern>,
) {
    let interval = frame_interval(settings.depth_fps);
    let mut sequence = 0u64;
    while running.load(Ordering::SeqCst) {
        sequence += 1;
        let (w, h) = (settings.depth_width, settings.depth_height);
        let values = match &pattern {
            Some(pattern) => pattern(sequence, w, h),
            None => ramp_depth(w, h),
        };
        match DepthMap::new(values, w, h, started.elapsed()) {
            Ok(map) => sink(map),
            Err(err) => log::warn!("SyntheticSession: depth frame dropped: {}", err),
        }
        thread::sleep(interval);
    }
}

fn synthetic_pixels(width: u32, height: u32, sequence: u64, scene: u8) -> Vec<u8> {
    let len = width as usize * height as usize * RGB_CHANNELS;
    let mut pixels = vec![0u8; len];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + sequence + scene as u64 * 37) % 256) as u8;
    }
    pixels
}

fn ramp_depth(width: u32, height: u32) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let mut values = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
            if border {
                values.push(0.0);
                continue;
            }
            let t = y as f32 / height.max(1) as f32;
            let noise: f32 = rng.gen_range(-0.005..0.005);
            values.push(0.5 + 4.5 * t + noise);
        }
    }
    values
}
