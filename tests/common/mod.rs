//! Shared fixtures: a hand-driven capture session and scripted models.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use crossbeam_channel::Receiver;

use fusion_kernel::fusion::{Snapshot, SnapshotSubscriber};
use fusion_kernel::ingest::{
    Authorization, CaptureSession, CaptureSettings, ColorSink, DepthSink, DeviceInfo,
};
use fusion_kernel::{BoundingBox, DepthMap, Frame, InferenceModel, RawDetection};

pub const WAIT: Duration = Duration::from_secs(5);

/// Test-side handle that pushes samples into a `ManualSession`.
#[derive(Clone, Default)]
pub struct Feed {
    color: Arc<Mutex<Option<ColorSink>>>,
    depth: Arc<Mutex<Option<DepthSink>>>,
    running: Arc<AtomicBool>,
}

impl Feed {
    /// Deliver a colour frame. Returns false when the session is not delivering.
    pub fn color(&self, frame: Frame) -> bool {
        let sink = self.color.lock().unwrap();
        match sink.as_ref() {
            Some(sink) if self.running.load(Ordering::SeqCst) => {
                sink(frame);
                true
            }
            _ => false,
        }
    }

    pub fn depth(&self, map: DepthMap) -> bool {
        let sink = self.depth.lock().unwrap();
        match sink.as_ref() {
            Some(sink) if self.running.load(Ordering::SeqCst) => {
                sink(map);
                true
            }
            _ => false,
        }
    }
}

/// Capture session without threads: samples arrive only through its `Feed`.
pub struct ManualSession {
    feed: Feed,
    device: DeviceInfo,
    input: Option<DeviceInfo>,
    stop_gate: Option<Receiver<()>>,
}

impl ManualSession {
    pub fn new() -> (Self, Feed) {
        let feed = Feed::default();
        (
            Self {
                feed: feed.clone(),
                device: DeviceInfo::new("manual://0", "Manual depth camera", true),
                input: None,
                stop_gate: None,
            },
            feed,
        )
    }

    /// Hold every `stop_running` call until a token arrives on `gate`.
    pub fn with_stop_gate(mut self, gate: Receiver<()>) -> Self {
        self.stop_gate = Some(gate);
        self
    }
}

impl CaptureSession for ManualSession {
    fn authorization(&self) -> Authorization {
        Authorization::Authorized
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        vec![self.device.clone()]
    }

    fn default_device(&self) -> Option<DeviceInfo> {
        Some(self.device.clone())
    }

    fn attach_input(&mut self, device: &DeviceInfo) -> Result<()> {
        if self.input.is_some() {
            bail!("input already attached");
        }
        self.input = Some(device.clone());
        Ok(())
    }

    fn detach_input(&mut self) {
        self.input = None;
    }

    fn configure(&mut self, _settings: &CaptureSettings) -> Result<()> {
        Ok(())
    }

    fn attach_color_output(&mut self, sink: ColorSink) -> Result<()> {
        *self.feed.color.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn attach_depth_output(&mut self, sink: DepthSink) -> Result<()> {
        *self.feed.depth.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn detach_outputs(&mut self) {
        *self.feed.color.lock().unwrap() = None;
        *self.feed.depth.lock().unwrap() = None;
    }

    fn start_running(&mut self) -> Result<()> {
        self.feed.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_running(&mut self) {
        if let Some(gate) = &self.stop_gate {
            let _ = gate.recv_timeout(WAIT);
        }
        // Taking both locks waits out any sink call in progress.
        let _color = self.feed.color.lock().unwrap();
        let _depth = self.feed.depth.lock().unwrap();
        self.feed.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.feed.running.load(Ordering::SeqCst)
    }
}

/// A person on the left edge and a chair on the right edge.
pub fn left_right_detections() -> Vec<RawDetection> {
    vec![
        RawDetection::new("person", 0.9, BoundingBox::new(0.0, 0.4, 0.2, 0.2)),
        RawDetection::new("chair", 0.8, BoundingBox::new(0.8, 0.4, 0.2, 0.2)),
    ]
}

/// Always reports the same detections.
pub struct FixedModel {
    pub detections: Vec<RawDetection>,
}

impl InferenceModel for FixedModel {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        Ok(self.detections.clone())
    }
}

/// Three objects; the door and the chair on the left, the bottle on the right.
pub fn three_object_detections() -> Vec<RawDetection> {
    vec![
        RawDetection::new("door", 0.9, BoundingBox::new(0.1, 0.1, 0.2, 0.2)),
        RawDetection::new("bottle", 0.8, BoundingBox::new(0.7, 0.6, 0.2, 0.2)),
        RawDetection::new("chair", 0.7, BoundingBox::new(0.0, 0.7, 0.2, 0.2)),
    ]
}

/// Reports `left_right_detections` on odd frames and
/// `three_object_detections` on even ones.
pub struct ParityModel;

impl InferenceModel for ParityModel {
    fn name(&self) -> &'static str {
        "parity"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        Ok(if frame.sequence % 2 == 1 {
            left_right_detections()
        } else {
            three_object_detections()
        })
    }
}

/// Blocks every pass until a token arrives on `gate`.
pub struct GatedModel {
    pub gate: Receiver<()>,
    pub detections: Vec<RawDetection>,
    pub entered: Arc<AtomicUsize>,
}

impl InferenceModel for GatedModel {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.recv_timeout(WAIT);
        Ok(self.detections.clone())
    }
}

pub fn frame(sequence: u64) -> Frame {
    Frame::new(
        vec![0u8; 4 * 4 * 3],
        4,
        4,
        Duration::from_millis(sequence * 33),
        sequence,
    )
    .unwrap()
}

/// 4x4 map whose left half reads `left` and right half reads `right`.
pub fn split_map(left: f32, right: f32, ts_ms: u64) -> DepthMap {
    let mut values = Vec::with_capacity(16);
    for _y in 0..4 {
        values.extend_from_slice(&[left, left, right, right]);
    }
    DepthMap::new(values, 4, 4, Duration::from_millis(ts_ms)).unwrap()
}

/// Receive until `accept` matches or the deadline passes.
pub fn wait_for(
    subscriber: &SnapshotSubscriber,
    mut accept: impl FnMut(&Snapshot) -> bool,
) -> Option<Arc<Snapshot>> {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Some(snapshot) = subscriber.recv_timeout(Duration::from_millis(50)) {
            if accept(&snapshot) {
                return Some(snapshot);
            }
        }
    }
    None
}

/// Poll `condition` until it holds or the deadline passes.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
