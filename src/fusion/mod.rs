//! Fusion coordinator.
//!
//! `FusionCoordinator` owns the frame source, the inference engine and the
//! published state. It drives the session lifecycle:
//!
//! ```text
//! Idle --start_session--> Configuring --ok--> Running --stop_session--> Stopping --> Idle
//!                              \--SetupError--> Idle
//! ```
//!
//! Data flow while running:
//! - Colour frames: submitted to inference (when enabled) and offered to the
//!   display slot. Callback threads never block.
//! - Depth maps: offered to the depth slot (latest wins).
//! - Pass outcomes: routed to the fusion worker, tagged with the session
//!   generation so late results from an earlier session are discarded.
//!
//! The fusion worker is the only publisher. It owns `FusionState`, composes a
//! snapshot after every relevant update and publishes it under the throttle.
//!
//! The coordinator MUST NOT:
//! - Publish after `stop_session` returns
//! - Run two inference passes at once
//! - Pair object depths and `closest_depth` from different depth maps

mod published;
mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender, TrySendError};

use crate::config::FusionConfig;
use crate::depth::{DepthSampler, SamplePolicy};
use crate::detect::{
    DetectionSettings, EngineStats, InferenceEngine, InferenceModel, LabelFilter, PassOutcome,
    Submission,
};
use crate::error::{ModelLoadError, SetupError};
use crate::frame::{DepthMap, Frame};
use crate::ingest::{
    CaptureSession, CaptureSettings, ColorSink, DepthSink, DeviceInfo, FrameSource,
};

pub use published::{
    closest_depth_of, PublishedState, Snapshot, SnapshotSubscriber, StatusBoard, StatusEvent,
    StatusSubscriber,
};

use state::FusionState;

/// Worker wake-up interval when nothing is pending.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Configuring,
    Running,
    Stopping,
}

/// Counters for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub color_frames: u64,
    pub depth_frames: u64,
    /// Display frames replaced before the worker picked them up.
    pub display_frames_replaced: u64,
    /// Depth maps replaced before the worker picked them up.
    pub depth_maps_replaced: u64,
    /// Pass outcomes discarded because they belonged to an earlier session.
    pub stale_results: u64,
    pub snapshots_published: u64,
    pub inference: EngineStats,
}

/// Coordinator tuning that does not belong to the capture device.
#[derive(Clone, Debug, PartialEq)]
pub struct FusionSettings {
    pub detection: DetectionSettings,
    pub detection_enabled: bool,
    pub sampling: SamplePolicy,
    /// Minimum spacing between publications. Zero publishes every update.
    pub min_publish_interval: Duration,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self::from(&FusionConfig::default())
    }
}

impl From<&FusionConfig> for FusionSettings {
    fn from(config: &FusionConfig) -> Self {
        Self {
            detection: config.detection.clone(),
            detection_enabled: config.detection_enabled,
            sampling: config.depth,
            min_publish_interval: config.publish.min_interval(),
        }
    }
}

// ----------------------------------------------------------------------------
// Shared state
// ----------------------------------------------------------------------------

enum Control {
    Pass(PassOutcome),
    DetectionEnabled(bool),
    Filter(Option<LabelFilter>),
    Shutdown,
}

/// Single-value channel where a new value evicts an unread one.
struct LatestSlot<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
}

impl<T> LatestSlot<T> {
    fn new() -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                tx,
                evict: rx.clone(),
            },
            rx,
        )
    }

    /// Returns true when an unread value was replaced.
    fn offer(&self, value: T) -> bool {
        let mut value = value;
        let mut replaced = false;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return replaced,
                Err(TrySendError::Full(back)) => {
                    replaced |= self.evict.try_recv().is_ok();
                    value = back;
                }
                Err(TrySendError::Disconnected(_)) => return replaced,
            }
        }
    }
}

#[derive(Default)]
struct Counters {
    color_frames: AtomicU64,
    depth_frames: AtomicU64,
    display_frames_replaced: AtomicU64,
    depth_maps_replaced: AtomicU64,
    stale_results: AtomicU64,
}

/// Serializes `stop_session` callers.
#[derive(Default)]
struct StopGate {
    in_progress: bool,
    /// Threads a stop joins: the fusion worker and the capture threads.
    joined: Vec<ThreadId>,
}

struct Shared {
    state: Mutex<PipelineState>,
    stop_gate: Mutex<StopGate>,
    stop_done: Condvar,
    published: PublishedState,
    detection_enabled: AtomicBool,
    filter: Mutex<Option<LabelFilter>>,
    /// Current session generation. Bumped on every start and stop.
    generation: AtomicU64,
    /// Control channel of the running worker, if any.
    route: Mutex<Option<Sender<Control>>>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = lock(&self.state);
        if *state != next {
            log::debug!("FusionCoordinator: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Claim the teardown. Returns false when the caller must return at once.
    ///
    /// A thread the running teardown will join never waits for it. Every
    /// other caller waits until the teardown finishes, then claims its own.
    fn begin_stop(&self) -> bool {
        let current = thread::current().id();
        let mut gate = lock(&self.stop_gate);
        while gate.in_progress {
            if gate.joined.contains(&current) {
                return false;
            }
            gate = self
                .stop_done
                .wait(gate)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        gate.in_progress = true;
        true
    }

    fn end_stop(&self) {
        let mut gate = lock(&self.stop_gate);
        gate.in_progress = false;
        gate.joined.clear();
        self.stop_done.notify_all();
    }

    /// Record the threads a teardown of the current session joins.
    fn set_joined(&self, threads: Vec<ThreadId>) {
        let mut gate = lock(&self.stop_gate);
        gate.joined = threads;
        // Waiters re-check whether they are now on the list.
        self.stop_done.notify_all();
    }

    fn send_control(&self, message: Control) {
        if let Some(tx) = lock(&self.route).as_ref() {
            let _ = tx.send(message);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Worker {
    join: JoinHandle<()>,
    id: ThreadId,
}

struct Session {
    source: FrameSource,
    worker: Option<Worker>,
}

// ----------------------------------------------------------------------------
// FusionCoordinator
// ----------------------------------------------------------------------------

pub struct FusionCoordinator {
    shared: Arc<Shared>,
    /// Session-configuration lock: start, stop and device swaps are serialized.
    session: Mutex<Session>,
    engine: Option<Arc<InferenceEngine>>,
    settings: FusionSettings,
}

impl FusionCoordinator {
    /// Build a coordinator around a capture session and a loaded model.
    ///
    /// A model load failure is not fatal: the pipeline runs with detection
    /// permanently disabled and the failure is visible through `last_error`.
    pub fn new(
        session: Box<dyn CaptureSession>,
        capture: CaptureSettings,
        model: Result<Box<dyn InferenceModel>, ModelLoadError>,
        settings: FusionSettings,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState::Idle),
            stop_gate: Mutex::new(StopGate::default()),
            stop_done: Condvar::new(),
            published: PublishedState::new(),
            detection_enabled: AtomicBool::new(settings.detection_enabled),
            filter: Mutex::new(None),
            generation: AtomicU64::new(0),
            route: Mutex::new(None),
            counters: Counters::default(),
        });

        let engine = match model {
            Ok(model) => {
                let router = shared.clone();
                let spawned = InferenceEngine::spawn(
                    model,
                    settings.detection.clone(),
                    move |outcome| router.send_control(Control::Pass(outcome)),
                );
                match spawned {
                    Ok(engine) => Some(Arc::new(engine)),
                    Err(err) => {
                        log::error!("FusionCoordinator: failed to start inference worker: {}", err);
                        shared.published.emit(StatusEvent::ModelUnavailable(err.to_string()));
                        None
                    }
                }
            }
            Err(err) => {
                log::error!("FusionCoordinator: detection model unavailable: {}", err);
                shared.published.emit(StatusEvent::ModelUnavailable(err.to_string()));
                None
            }
        };

        Self {
            shared,
            session: Mutex::new(Session {
                source: FrameSource::new(session, capture),
                worker: None,
            }),
            engine,
            settings,
        }
    }

    /// Open the configured capture session and load the configured model.
    pub fn from_config(config: &FusionConfig) -> anyhow::Result<Self> {
        let session = crate::ingest::open_session(&config.capture)?;
        let model = crate::detect::load_model(&config.model);
        Ok(Self::new(
            session,
            config.capture.clone(),
            model,
            FusionSettings::from(config),
        ))
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.shared.published.current()
    }

    pub fn subscribe(&self) -> SnapshotSubscriber {
        self.shared.published.subscribe()
    }

    pub fn subscribe_status(&self) -> StatusSubscriber {
        self.shared.published.subscribe_status()
    }

    pub fn status(&self) -> StatusBoard {
        self.shared.published.status()
    }

    /// User-facing text of the most recent error.
    ///
    /// A successful start clears setup errors; a missing model stays reported.
    pub fn last_error(&self) -> Option<String> {
        self.shared.published.status().error_message
    }

    /// Whether a detection model is loaded at all.
    pub fn detection_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn detection_enabled(&self) -> bool {
        self.engine.is_some() && self.shared.detection_enabled.load(Ordering::SeqCst)
    }

    pub fn active_device(&self) -> Option<DeviceInfo> {
        lock(&self.session).source.active_device().cloned()
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = &self.shared.counters;
        PipelineStats {
            color_frames: counters.color_frames.load(Ordering::Relaxed),
            depth_frames: counters.depth_frames.load(Ordering::Relaxed),
            display_frames_replaced: counters.display_frames_replaced.load(Ordering::Relaxed),
            depth_maps_replaced: counters.depth_maps_replaced.load(Ordering::Relaxed),
            stale_results: counters.stale_results.load(Ordering::Relaxed),
            snapshots_published: self.shared.published.published_count(),
            inference: self
                .engine
                .as_ref()
                .map(|engine| engine.stats())
                .unwrap_or_default(),
        }
    }

    /// Configure and start the session. A second call while running is a no-op.
    ///
    /// On failure the coordinator returns to `Idle`, the error is recorded for
    /// `last_error` and a `StatusEvent::SetupFailed` is emitted.
    pub fn start_session(&self) -> Result<DeviceInfo, SetupError> {
        let mut session = lock(&self.session);
        match self.shared.state() {
            PipelineState::Running => {
                if let Some(device) = session.source.active_device() {
                    return Ok(device.clone());
                }
            }
            PipelineState::Configuring | PipelineState::Stopping => {
                return Err(SetupError::ConfigurationFailed(
                    "session is changing state".into(),
                ));
            }
            PipelineState::Idle => {}
        }
        self.shared.set_state(PipelineState::Configuring);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (control_tx, control_rx) = unbounded();
        let (image_slot, image_rx) = LatestSlot::new();
        let (depth_slot, depth_rx) = LatestSlot::new();

        let worker = match self.spawn_worker(generation, control_rx, image_rx, depth_rx) {
            Ok(worker) => worker,
            Err(err) => {
                let error = SetupError::ConfigurationFailed(format!("fusion worker: {}", err));
                self.fail_start(&error);
                return Err(error);
            }
        };
        *lock(&self.shared.route) = Some(control_tx);
        self.shared.published.open();
        session.worker = Some(worker);

        let color = self.color_sink(generation, image_slot);
        let depth = self.depth_sink(depth_slot);
        match session.source.start(color, depth) {
            Ok(device) => {
                let mut joined = session.source.delivery_threads();
                joined.extend(session.worker.as_ref().map(|worker| worker.id));
                self.shared.set_joined(joined);
                self.shared.set_state(PipelineState::Running);
                log::info!(
                    "FusionCoordinator: running on {} (detection {})",
                    device.id,
                    if self.detection_enabled() { "on" } else { "off" }
                );
                self.shared.published.emit(StatusEvent::Started {
                    device: device.id.clone(),
                });
                Ok(device)
            }
            Err(error) => {
                self.halt(&mut session);
                self.fail_start(&error);
                Err(error)
            }
        }
    }

    fn fail_start(&self, error: &SetupError) {
        log::error!("FusionCoordinator: session setup failed: {}", error);
        self.shared.set_state(PipelineState::Idle);
        self.shared.published.emit(StatusEvent::SetupFailed {
            error: error.clone(),
            message: error.user_message(),
        });
    }

    fn color_sink(&self, generation: u64, slot: LatestSlot<Frame>) -> ColorSink {
        let shared = self.shared.clone();
        let engine = self.engine.clone();
        Arc::new(move |frame: Frame| {
            shared.counters.color_frames.fetch_add(1, Ordering::Relaxed);
            if let Some(engine) = &engine {
                if shared.detection_enabled.load(Ordering::SeqCst) {
                    if engine.submit_tagged(frame.clone(), generation) == Submission::Dropped {
                        log::trace!("FusionCoordinator: frame {} not submitted", frame.sequence);
                    }
                }
            }
            if slot.offer(frame) {
                shared
                    .counters
                    .display_frames_replaced
                    .fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    fn depth_sink(&self, slot: LatestSlot<DepthMap>) -> DepthSink {
        let shared = self.shared.clone();
        Arc::new(move |map: DepthMap| {
            shared.counters.depth_frames.fetch_add(1, Ordering::Relaxed);
            if slot.offer(map) {
                shared
                    .counters
                    .depth_maps_replaced
                    .fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    fn spawn_worker(
        &self,
        generation: u64,
        control: Receiver<Control>,
        images: Receiver<Frame>,
        depths: Receiver<DepthMap>,
    ) -> std::io::Result<Worker> {
        let shared = self.shared.clone();
        let filter = lock(&self.shared.filter).clone();
        let state = FusionState::new(
            DepthSampler::new(self.settings.sampling),
            filter,
            self.detection_enabled(),
        );
        let min_interval = self.settings.min_publish_interval;
        let join = thread::Builder::new()
            .name("fusion".into())
            .spawn(move || {
                run_fusion(
                    FusionWorker {
                        shared,
                        state,
                        generation,
                        min_interval,
                    },
                    control,
                    images,
                    depths,
                )
            })?;
        let id = join.thread().id();
        Ok(Worker { join, id })
    }

    /// Stop the session. Idempotent, callable from any thread.
    ///
    /// When this returns no further snapshot is published and the published
    /// state has been reset to empty. A call made while another thread is
    /// stopping waits for that teardown, except from a capture callback
    /// thread or the fusion worker, which return at once because the
    /// teardown is joining them.
    pub fn stop_session(&self) {
        if !self.shared.begin_stop() {
            return;
        }
        let mut session = lock(&self.session);
        if self.shared.state() != PipelineState::Idle || session.worker.is_some() {
            self.shared.set_state(PipelineState::Stopping);
            self.halt(&mut session);
            self.shared.set_state(PipelineState::Idle);
            self.shared.published.emit(StatusEvent::Stopped);
            log::info!("FusionCoordinator: stopped");
        }
        drop(session);
        self.shared.end_stop();
    }

    /// Stop capture, retire the worker and reset the published state.
    fn halt(&self, session: &mut Session) {
        // Outcomes still in flight now carry a stale generation.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let control = lock(&self.shared.route).take();

        session.source.stop();

        if let Some(control) = control {
            let _ = control.send(Control::Shutdown);
        }
        if let Some(worker) = session.worker.take() {
            if thread::current().id() != worker.id && worker.join.join().is_err() {
                log::error!("FusionCoordinator: fusion worker panicked");
            }
        }
        self.shared.published.close_and_reset();
    }

    /// Turn detection on or off at runtime.
    ///
    /// While off no frames are submitted, results still in flight are
    /// discarded and the displayed objects stay frozen. Returns the effective
    /// state, which stays false when no model is loaded.
    pub fn set_detection_enabled(&self, enabled: bool) -> bool {
        if enabled && self.engine.is_none() {
            log::warn!("FusionCoordinator: detection requested but no model is loaded");
            return false;
        }
        let previous = self.shared.detection_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            log::info!(
                "FusionCoordinator: detection {}",
                if enabled { "enabled" } else { "disabled" }
            );
            self.shared.send_control(Control::DetectionEnabled(enabled));
            self.shared
                .published
                .emit(StatusEvent::DetectionToggled(enabled));
        }
        enabled
    }

    /// Restrict published objects to labels matching the filter. `None` clears it.
    pub fn set_label_filter(&self, filter: Option<LabelFilter>) {
        match &filter {
            Some(f) => log::info!("FusionCoordinator: filtering for {:?}", f.keywords()),
            None => log::info!("FusionCoordinator: label filter cleared"),
        }
        *lock(&self.shared.filter) = filter.clone();
        self.shared.send_control(Control::Filter(filter));
    }

    pub fn label_filter(&self) -> Option<LabelFilter> {
        lock(&self.shared.filter).clone()
    }

    /// Swap to the preferred device if the device list changed.
    pub fn refresh_device(&self) -> Result<Option<DeviceInfo>, SetupError> {
        let mut session = lock(&self.session);
        if self.shared.state() != PipelineState::Running {
            return Ok(None);
        }
        match session.source.refresh_device() {
            Ok(Some(device)) => {
                self.shared.published.emit(StatusEvent::DeviceSwapped {
                    device: device.id.clone(),
                });
                Ok(Some(device))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                log::warn!("FusionCoordinator: device refresh failed: {}", err);
                Err(err)
            }
        }
    }
}

impl Drop for FusionCoordinator {
    fn drop(&mut self) {
        self.stop_session();
        if let Some(engine) = &self.engine {
            engine.shutdown();
        }
    }
}

// ----------------------------------------------------------------------------
// Fusion worker
// ----------------------------------------------------------------------------

struct FusionWorker {
    shared: Arc<Shared>,
    state: FusionState,
    generation: u64,
    min_interval: Duration,
}

impl FusionWorker {
    /// Apply one control message. `None` means shut down; otherwise whether
    /// the published state changed.
    fn apply(&mut self, message: Control) -> Option<bool> {
        match message {
            Control::Pass(outcome) => Some(self.handle_pass(outcome)),
            Control::DetectionEnabled(enabled) => {
                self.state.set_detection_enabled(enabled);
                Some(true)
            }
            Control::Filter(filter) => {
                self.state.set_filter(filter);
                Some(true)
            }
            Control::Shutdown => None,
        }
    }

    /// Apply every queued control message.
    fn drain(&mut self, control: &Receiver<Control>) -> Option<bool> {
        let mut changed = false;
        while let Ok(message) = control.try_recv() {
            changed |= self.apply(message)?;
        }
        Some(changed)
    }

    fn handle_pass(&mut self, outcome: PassOutcome) -> bool {
        if outcome.tag() != self.generation
            || self.shared.generation.load(Ordering::SeqCst) != self.generation
        {
            self.shared
                .counters
                .stale_results
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match outcome {
            PassOutcome::Completed(set) => self.state.set_detections(set),
            PassOutcome::Failed {
                frame_sequence,
                error,
                ..
            } => {
                // Previous results stay displayed.
                log::debug!(
                    "FusionCoordinator: keeping previous objects after frame {}: {}",
                    frame_sequence,
                    error
                );
                false
            }
        }
    }
}

fn run_fusion(
    mut worker: FusionWorker,
    control: Receiver<Control>,
    mut images: Receiver<Frame>,
    mut depths: Receiver<DepthMap>,
) {
    let mut dirty = false;
    let mut last_publish: Option<Instant> = None;

    loop {
        let wait = if dirty {
            last_publish
                .map(|at| worker.min_interval.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        } else {
            IDLE_TICK
        };

        // Control messages take effect before any sample that arrived after them.
        let applied = select! {
            recv(control) -> message => match message {
                Ok(message) => worker.apply(message),
                Err(_) => None,
            },
            recv(depths) -> map => match map {
                Ok(map) => worker.drain(&control).map(|changed| {
                    worker.state.set_depth(map) || changed
                }),
                // Capture detached; wait for shutdown on the control channel.
                Err(_) => {
                    depths = never();
                    Some(false)
                }
            },
            recv(images) -> frame => match frame {
                Ok(frame) => worker.drain(&control).map(|_| {
                    worker.state.set_image(frame);
                    true
                }),
                Err(_) => {
                    images = never();
                    Some(false)
                }
            },
            default(wait) => Some(false),
        };
        match applied {
            Some(changed) => dirty |= changed,
            None => break,
        }

        let due = last_publish
            .map(|at| at.elapsed() >= worker.min_interval)
            .unwrap_or(true);
        if dirty && due {
            if !worker.shared.published.publish(worker.state.compose()) {
                break;
            }
            last_publish = Some(Instant::now());
            dirty = false;
        }
    }
    log::debug!("FusionCoordinator: fusion worker exiting");
}
