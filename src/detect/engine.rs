//! Single-slot asynchronous inference.
//!
//! `InferenceEngine` owns one worker thread and one in-flight slot. `submit`
//! never blocks on inference: if a pass is already running (or a frame is
//! already waiting for the worker) the new frame is dropped. The pipeline
//! therefore tracks the current scene instead of draining a backlog, and two
//! passes can never overlap or complete out of order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use crate::detect::backend::InferenceModel;
use crate::detect::result::{DetectedObject, DetectionSet, RawDetection};
use crate::error::FrameError;
use crate::frame::Frame;

/// Filtering applied to model output before the completion callback fires.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionSettings {
    /// Detections below this confidence are excluded.
    pub confidence_threshold: f32,
    /// Allowed labels (case-insensitive). Empty allows every label.
    pub classes: Vec<String>,
    /// Upper bound on objects reported per pass.
    pub max_detections: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            classes: Vec::new(),
            max_detections: 32,
        }
    }
}

impl DetectionSettings {
    fn accepts(&self, det: &RawDetection) -> bool {
        if !det.confidence.is_finite() || det.confidence < self.confidence_threshold {
            return false;
        }
        self.classes.is_empty()
            || self
                .classes
                .iter()
                .any(|class| class.eq_ignore_ascii_case(&det.label))
    }

    /// Filter, cap and number one pass worth of raw detections.
    pub fn finalize(&self, raw: Vec<RawDetection>) -> Vec<DetectedObject> {
        raw.into_iter()
            .filter(|det| self.accepts(det))
            .take(self.max_detections)
            .enumerate()
            .map(|(id, det)| DetectedObject {
                id: id as u32,
                label: det.label,
                confidence: det.confidence.clamp(0.0, 1.0),
                bounding_box: det.bounding_box,
                depth: None,
            })
            .collect()
    }
}

/// Result of one inference pass, delivered on the engine's worker thread.
#[derive(Clone, Debug)]
pub enum PassOutcome {
    Completed(DetectionSet),
    Failed {
        pass: u64,
        frame_sequence: u64,
        tag: u64,
        error: FrameError,
    },
}

impl PassOutcome {
    pub fn tag(&self) -> u64 {
        match self {
            PassOutcome::Completed(set) => set.tag,
            PassOutcome::Failed { tag, .. } => *tag,
        }
    }
}

/// What happened to a submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// A pass was in flight; the frame was discarded.
    Dropped,
    /// The engine has been shut down.
    Closed,
}

/// Counters exposed for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub submitted: u64,
    pub dropped: u64,
    pub passes: u64,
    pub failures: u64,
}

type Completion = Box<dyn Fn(PassOutcome) + Send + Sync>;

struct Slot {
    pending: Option<(Frame, u64)>,
    busy: bool,
    shutdown: bool,
}

struct EngineShared {
    slot: Mutex<Slot>,
    wake: Condvar,
    submitted: AtomicU64,
    dropped: AtomicU64,
    passes: AtomicU64,
    failures: AtomicU64,
}

impl EngineShared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        // The slot holds plain flags; a poisoned guard is still consistent.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Asynchronous, single-slot wrapper around an `InferenceModel`.
pub struct InferenceEngine {
    shared: Arc<EngineShared>,
    join: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    model_name: &'static str,
}

impl InferenceEngine {
    /// Start the worker thread. `on_complete` runs on that thread after every pass.
    pub fn spawn<M, F>(model: M, settings: DetectionSettings, on_complete: F) -> std::io::Result<Self>
    where
        M: InferenceModel + 'static,
        F: Fn(PassOutcome) + Send + Sync + 'static,
    {
        let shared = Arc::new(EngineShared {
            slot: Mutex::new(Slot {
                pending: None,
                busy: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let model_name = model.name();
        let worker_shared = shared.clone();
        let completion: Completion = Box::new(on_complete);
        let join = thread::Builder::new()
            .name("inference".into())
            .spawn(move || run_worker(model, settings, worker_shared, completion))?;
        let worker_id = join.thread().id();

        log::info!("InferenceEngine: started with model '{}'", model_name);
        Ok(Self {
            shared,
            join: Mutex::new(Some(join)),
            worker_id,
            model_name,
        })
    }

    pub fn model_name(&self) -> &'static str {
        self.model_name
    }

    /// Hand a frame to the worker, or drop it if a pass is already in flight.
    pub fn submit(&self, frame: Frame) -> Submission {
        self.submit_tagged(frame, 0)
    }

    /// Like `submit`; `tag` is echoed back in the pass outcome.
    pub fn submit_tagged(&self, frame: Frame, tag: u64) -> Submission {
        let mut slot = self.shared.lock_slot();
        if slot.shutdown {
            return Submission::Closed;
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        if slot.busy {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("InferenceEngine: dropped frame {} (pass in flight)", frame.sequence);
            return Submission::Dropped;
        }
        slot.busy = true;
        slot.pending = Some((frame, tag));
        drop(slot);
        self.shared.wake.notify_one();
        Submission::Accepted
    }

    /// True while a frame is queued or a pass is running.
    pub fn is_busy(&self) -> bool {
        self.shared.lock_slot().busy
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            passes: self.shared.passes.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting frames and wait for the worker to exit.
    ///
    /// An in-flight pass runs to completion. Calling this from the worker
    /// thread itself (inside the completion callback) only signals.
    pub fn shutdown(&self) {
        {
            let mut slot = self.shared.lock_slot();
            if slot.shutdown {
                return;
            }
            slot.shutdown = true;
            slot.pending = None;
        }
        self.shared.wake.notify_all();

        if thread::current().id() == self.worker_id {
            return;
        }
        let join = self
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(join) = join {
            if join.join().is_err() {
                log::error!("InferenceEngine: worker thread panicked");
            }
        }
        log::debug!("InferenceEngine: stopped");
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<M: InferenceModel>(
    mut model: M,
    settings: DetectionSettings,
    shared: Arc<EngineShared>,
    on_complete: Completion,
) {
    if let Err(err) = model.warm_up() {
        log::warn!("InferenceEngine: warm-up failed: {:#}", err);
    }

    loop {
        let (frame, tag) = {
            let mut slot = shared.lock_slot();
            loop {
                if slot.shutdown {
                    return;
                }
                if let Some(pending) = slot.pending.take() {
                    break pending;
                }
                slot = shared
                    .wake
                    .wait(slot)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let pass = shared.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| model.infer(&frame)));
        let outcome = match result {
            Ok(Ok(raw)) => PassOutcome::Completed(DetectionSet {
                pass,
                frame_sequence: frame.sequence,
                tag,
                objects: settings.finalize(raw),
            }),
            Ok(Err(err)) => PassOutcome::Failed {
                pass,
                frame_sequence: frame.sequence,
                tag,
                error: FrameError::InferenceFailed(format!("{:#}", err)),
            },
            Err(_) => PassOutcome::Failed {
                pass,
                frame_sequence: frame.sequence,
                tag,
                error: FrameError::InferenceFailed("model panicked".into()),
            },
        };
        if let PassOutcome::Failed { error, .. } = &outcome {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("InferenceEngine: pass {} on frame {}: {}", pass, frame.sequence, error);
        }
        drop(frame);

        if panic::catch_unwind(AssertUnwindSafe(|| on_complete(outcome))).is_err() {
            log::error!("InferenceEngine: completion callback panicked");
        }

        shared.lock_slot().busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;
    use crossbeam_channel::{bounded, Sender};
    use std::time::Duration;

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![0u8; 3], 1, 1, Duration::ZERO, seq).unwrap()
    }

    /// Blocks inside `infer` until released through the gate channel.
    struct GatedModel {
        gate: crossbeam_channel::Receiver<()>,
    }

    impl InferenceModel for GatedModel {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            Ok(vec![
                RawDetection::new("person", 0.9, BoundingBox::new(0.1, 0.1, 0.2, 0.2)),
                RawDetection::new("chair", 0.2, BoundingBox::new(0.5, 0.5, 0.2, 0.2)),
            ])
        }
    }

    struct FailingModel;

    impl InferenceModel for FailingModel {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
            Err(anyhow::anyhow!("tensor shape mismatch"))
        }
    }

    fn forward(tx: Sender<PassOutcome>) -> impl Fn(PassOutcome) + Send + Sync {
        move |outcome| {
            let _ = tx.send(outcome);
        }
    }

    #[test]
    fn drops_frames_while_pass_in_flight() {
        let (gate_tx, gate_rx) = bounded(4);
        let (done_tx, done_rx) = bounded(4);
        let engine = InferenceEngine::spawn(
            GatedModel { gate: gate_rx },
            DetectionSettings::default(),
            forward(done_tx),
        )
        .unwrap();

        assert_eq!(engine.submit(frame(1)), Submission::Accepted);
        assert_eq!(engine.submit(frame(2)), Submission::Dropped);
        assert_eq!(engine.submit(frame(3)), Submission::Dropped);

        gate_tx.send(()).unwrap();
        let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let PassOutcome::Completed(set) = outcome else {
            panic!("expected completed pass");
        };
        assert_eq!(set.frame_sequence, 1);
        assert_eq!(set.objects.len(), 1, "low-confidence chair filtered");
        assert_eq!(set.objects[0].label, "person");
        assert_eq!(set.objects[0].id, 0);

        let stats = engine.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.passes, 1);
        engine.shutdown();
    }

    #[test]
    fn failures_are_reported_not_fatal() {
        let (done_tx, done_rx) = bounded(4);
        let engine =
            InferenceEngine::spawn(FailingModel, DetectionSettings::default(), forward(done_tx))
                .unwrap();

        assert_eq!(engine.submit(frame(1)), Submission::Accepted);
        let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            outcome,
            PassOutcome::Failed {
                error: FrameError::InferenceFailed(_),
                ..
            }
        ));

        // The slot frees up again after a failure.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.is_busy() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(engine.submit(frame(2)), Submission::Accepted);
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(engine.stats().failures, 2);
    }

    #[test]
    fn tags_are_echoed_in_outcomes() {
        let (done_tx, done_rx) = bounded(4);
        let engine =
            InferenceEngine::spawn(FailingModel, DetectionSettings::default(), forward(done_tx))
                .unwrap();
        assert_eq!(engine.submit_tagged(frame(7), 42), Submission::Accepted);
        let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.tag(), 42);
    }

    #[test]
    fn submit_after_shutdown_is_closed() {
        let (done_tx, _done_rx) = bounded(1);
        let engine =
            InferenceEngine::spawn(FailingModel, DetectionSettings::default(), forward(done_tx))
                .unwrap();
        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.submit(frame(1)), Submission::Closed);
    }

    #[test]
    fn class_filter_is_case_insensitive() {
        let settings = DetectionSettings {
            confidence_threshold: 0.1,
            classes: vec!["Chair".into()],
            max_detections: 8,
        };
        let objects = settings.finalize(vec![
            RawDetection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 0.1, 0.1)),
            RawDetection::new("chair", 0.4, BoundingBox::new(0.2, 0.2, 0.1, 0.1)),
            RawDetection::new("chair", f32::NAN, BoundingBox::new(0.2, 0.2, 0.1, 0.1)),
        ]);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].label, "chair");
        assert_eq!(objects[0].id, 0);
    }
}
