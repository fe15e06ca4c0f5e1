//! Consumer-facing state.
//!
//! - `Snapshot`: the atomically published combination of display image,
//!   objects with depths, and the closest distance.
//! - `PublishedState`: single-writer holder of the latest snapshot plus the
//!   notification fan-out to subscribers.
//! - `SnapshotSubscriber`: a consumer handle meant to be read on one
//!   designated thread (it is `Send` but not `Sync`).
//! - `StatusEvent` / `StatusSubscriber`: session lifecycle and error signal.
//!
//! Only the fusion worker publishes. Each publication replaces the whole
//! snapshot under one lock, so a reader never sees objects whose depths came
//! from a different depth map than `closest_depth`.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::detect::DetectedObject;
use crate::error::SetupError;
use crate::frame::Frame;

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// Combined view of the current scene.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Publication counter, assigned by `PublishedState`. Zero for the reset state.
    pub sequence: u64,
    /// Latest display image.
    pub image: Option<Frame>,
    /// Displayed objects, in detector order, with depths from one depth map.
    pub objects: Vec<DetectedObject>,
    /// Minimum of the present `objects[i].depth`.
    pub closest_depth: Option<f32>,
    /// Distance at the centre of the latest depth map.
    pub center_depth: Option<f32>,
    /// Timestamp of the depth map the object depths were sampled from.
    pub depth_timestamp: Option<Duration>,
    /// Inference pass that produced `objects`.
    pub detection_pass: Option<u64>,
}

impl Snapshot {
    /// Object with the smallest known depth.
    pub fn closest(&self) -> Option<&DetectedObject> {
        self.objects
            .iter()
            .filter(|o| o.depth.is_some())
            .min_by(|a, b| {
                a.depth
                    .unwrap_or(f32::INFINITY)
                    .total_cmp(&b.depth.unwrap_or(f32::INFINITY))
            })
    }

    /// True when `closest_depth` agrees with the object depths.
    pub fn is_consistent(&self) -> bool {
        closest_depth_of(&self.objects) == self.closest_depth
    }
}

/// Minimum present depth, or `None` when no object has one.
pub fn closest_depth_of(objects: &[DetectedObject]) -> Option<f32> {
    objects
        .iter()
        .filter_map(|o| o.depth)
        .min_by(|a, b| a.total_cmp(b))
}

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

/// Lifecycle and error notifications.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusEvent {
    Started { device: String },
    Stopped,
    /// `start()` failed; `message` is the user-facing text for the kind.
    SetupFailed { error: SetupError, message: &'static str },
    /// The detection model could not be loaded; detection stays disabled.
    ModelUnavailable(String),
    DeviceSwapped { device: String },
    DetectionToggled(bool),
}

/// Latest status, readable without subscribing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusBoard {
    pub session_running: bool,
    pub error_message: Option<String>,
}

// ----------------------------------------------------------------------------
// PublishedState
// ----------------------------------------------------------------------------

struct SnapshotSlot {
    tx: Sender<Arc<Snapshot>>,
    /// Publisher-side receiver, used to evict an unread value (latest wins).
    evict: Receiver<Arc<Snapshot>>,
    alive: Weak<()>,
}

struct Inner {
    current: Arc<Snapshot>,
    open: bool,
    next_sequence: u64,
    published: u64,
    snapshot_subscribers: Vec<SnapshotSlot>,
    status: StatusBoard,
    /// Survives restarts: the model is loaded once.
    model_error: Option<String>,
    status_subscribers: Vec<Sender<StatusEvent>>,
}

/// Holder of the latest snapshot.
pub struct PublishedState {
    inner: Mutex<Inner>,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: Arc::new(Snapshot::default()),
                open: false,
                next_sequence: 1,
                published: 0,
                snapshot_subscribers: Vec::new(),
                status: StatusBoard::default(),
                model_error: None,
                status_subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The latest snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.lock().current.clone()
    }

    /// Number of snapshots published since construction.
    pub fn published_count(&self) -> u64 {
        self.lock().published
    }

    pub fn status(&self) -> StatusBoard {
        self.lock().status.clone()
    }

    /// Subscribe to snapshot replacements. Slow readers only see the latest.
    pub fn subscribe(&self) -> SnapshotSubscriber {
        let (tx, rx) = bounded(1);
        let token = Arc::new(());
        self.lock().snapshot_subscribers.push(SnapshotSlot {
            tx,
            evict: rx.clone(),
            alive: Arc::downgrade(&token),
        });
        SnapshotSubscriber {
            rx,
            _token: token,
            _not_sync: PhantomData,
        }
    }

    pub fn subscribe_status(&self) -> StatusSubscriber {
        let (tx, rx) = unbounded();
        self.lock().status_subscribers.push(tx);
        StatusSubscriber { rx }
    }

    /// Accept publications (session entered `Running`).
    pub(crate) fn open(&self) {
        self.lock().open = true;
    }

    /// Replace the snapshot. Returns false when publication is closed.
    pub(crate) fn publish(&self, mut snapshot: Snapshot) -> bool {
        let mut inner = self.lock();
        if !inner.open {
            return false;
        }
        snapshot.sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.published += 1;
        let snapshot = Arc::new(snapshot);
        inner.current = snapshot.clone();
        fan_out(&mut inner.snapshot_subscribers, snapshot);
        true
    }

    /// Stop accepting publications and reset to the empty state.
    ///
    /// Subscribers receive the reset snapshot (no image, no objects, unknown depth).
    pub(crate) fn close_and_reset(&self) {
        let mut inner = self.lock();
        inner.open = false;
        let reset = Arc::new(Snapshot::default());
        inner.current = reset.clone();
        fan_out(&mut inner.snapshot_subscribers, reset);
    }

    pub(crate) fn emit(&self, event: StatusEvent) {
        let mut inner = self.lock();
        match &event {
            StatusEvent::Started { .. } => {
                inner.status.session_running = true;
                inner.status.error_message = inner.model_error.clone();
            }
            StatusEvent::Stopped => inner.status.session_running = false,
            StatusEvent::SetupFailed { message, .. } => {
                inner.status.session_running = false;
                inner.status.error_message = Some(message.to_string());
            }
            StatusEvent::ModelUnavailable(reason) => {
                let message = format!("Detection unavailable: {}", reason);
                inner.model_error = Some(message.clone());
                inner.status.error_message = Some(message);
            }
            StatusEvent::DeviceSwapped { .. } | StatusEvent::DetectionToggled(_) => {}
        }
        inner
            .status_subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn fan_out(slots: &mut Vec<SnapshotSlot>, snapshot: Arc<Snapshot>) {
    slots.retain(|slot| {
        if slot.alive.upgrade().is_none() {
            return false;
        }
        let mut value = snapshot.clone();
        loop {
            match slot.tx.try_send(value) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    let _ = slot.evict.try_recv();
                    value = back;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    });
}

// ----------------------------------------------------------------------------
// Subscribers
// ----------------------------------------------------------------------------

/// Snapshot consumer for a single designated thread.
pub struct SnapshotSubscriber {
    rx: Receiver<Arc<Snapshot>>,
    _token: Arc<()>,
    _not_sync: PhantomData<Cell<()>>,
}

impl SnapshotSubscriber {
    /// Wait for the next replacement.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<Snapshot>> {
        match self.rx.recv_timeout(timeout) {
            Ok(snapshot) => Some(snapshot),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// The newest unread snapshot, if any.
    pub fn try_latest(&self) -> Option<Arc<Snapshot>> {
        let mut latest = None;
        while let Ok(snapshot) = self.rx.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }
}

/// Status consumer.
pub struct StatusSubscriber {
    rx: Receiver<StatusEvent>,
}

impl StatusSubscriber {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StatusEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<StatusEvent> {
        self.rx.try_iter().collect()
    }
}
