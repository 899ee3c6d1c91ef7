use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::detection::domain::detection::{Detection, DetectionKind};
use crate::detection::domain::detector::{Completion, DetectionOutcome, Detector};
use crate::pipeline::infrastructure::worker_pool::WorkerPool;
use crate::pipeline::join_latch::JoinLatch;
use crate::shared::frame::{Frame, SharedFrame};
use crate::stream::broadcast_stream::BroadcastStream;

/// What happened to one frame handed to [`DetectionCoordinator::analyze`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalyzeOutcome {
    /// Every detector of the dispatch reported.
    Completed { published: usize, failed: usize },
    /// Another frame was in flight; this one was released unprocessed.
    Dropped,
    /// No detector was enabled.
    NoDetectors,
    /// The worker pool is shut down.
    ShutDown,
    /// The join deadline passed with `pending` detectors still running.
    TimedOut { pending: usize },
}

struct Registration {
    detector: Arc<dyn Detector>,
    enabled: bool,
}

/// Join state shared by the completions of one dispatch.
struct Dispatch {
    index: usize,
    latch: JoinLatch,
    published: AtomicUsize,
    failed: AtomicUsize,
    /// Cleared when the join gives up; results reported afterwards are
    /// discarded so they cannot land after a later frame's.
    accepting: Mutex<bool>,
}

impl Dispatch {
    fn new(index: usize, detectors: usize) -> Self {
        Self {
            index,
            latch: JoinLatch::new(detectors),
            published: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            accepting: Mutex::new(true),
        }
    }

    fn report(&self, kind: DetectionKind, bus: &BroadcastStream<Detection>, outcome: DetectionOutcome) {
        let accepting = self.accepting.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(detection) if *accepting => {
                // Publish before counting down so results of one frame are
                // delivered before the next frame can be admitted.
                bus.publish(detection);
                self.published.fetch_add(1, Ordering::AcqRel);
            }
            Ok(_) => {
                log::warn!(
                    "Discarding late {kind} result for frame {}: join already timed out",
                    self.index
                );
            }
            Err(e) => {
                log::error!("{kind} detector failed on frame {}: {e}", self.index);
                self.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.latch.count_down();
    }

    /// Stops accepting results unless every detector has reported in the
    /// meantime. Returns the number still pending.
    fn abandon(&self) -> usize {
        let mut accepting = self.accepting.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = self.latch.remaining();
        if pending > 0 {
            *accepting = false;
        }
        pending
    }
}

/// Resets the busy flag even if dispatch unwinds.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs every enabled detector concurrently on each admitted frame and
/// publishes their results on [`detections`](Self::detections).
///
/// At most one frame is in flight: a frame arriving while another is being
/// analyzed is released immediately, never queued. `analyze` blocks the
/// calling thread until every detector of the dispatch has reported, then
/// releases the frame exactly once.
///
/// Without a join deadline, a detector that keeps its completion and never
/// reports blocks `analyze` forever, and every later frame is dropped.
pub struct DetectionCoordinator {
    pool: WorkerPool,
    registry: RwLock<HashMap<DetectionKind, Registration>>,
    detections: Arc<BroadcastStream<Detection>>,
    busy: AtomicBool,
    join_deadline: Option<Duration>,
}

impl DetectionCoordinator {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            registry: RwLock::new(HashMap::new()),
            detections: Arc::new(BroadcastStream::new()),
            busy: AtomicBool::new(false),
            join_deadline: None,
        }
    }

    /// Bounds how long `analyze` waits for its detectors. `None` waits
    /// indefinitely.
    pub fn with_join_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.join_deadline = deadline;
        self
    }

    pub fn with_detector(self, detector: Arc<dyn Detector>) -> Self {
        self.register(detector);
        self
    }

    /// Registers `detector` under its kind, enabled. Returns the detector it
    /// replaced, if any.
    pub fn register(&self, detector: Arc<dyn Detector>) -> Option<Arc<dyn Detector>> {
        let kind = detector.kind();
        log::debug!("Registering {kind} detector");
        self.registry_mut()
            .insert(
                kind,
                Registration {
                    detector,
                    enabled: true,
                },
            )
            .map(|previous| previous.detector)
    }

    pub fn is_enabled(&self, kind: DetectionKind) -> bool {
        self.registry()
            .get(&kind)
            .is_some_and(|registration| registration.enabled)
    }

    pub fn enable(&self, kind: DetectionKind) {
        self.set_enabled(kind, true);
    }

    pub fn disable(&self, kind: DetectionKind) {
        self.set_enabled(kind, false);
    }

    pub fn get(&self, kind: DetectionKind) -> Option<Arc<dyn Detector>> {
        self.registry()
            .get(&kind)
            .map(|registration| registration.detector.clone())
    }

    /// The result bus: every detector result of every admitted frame.
    pub fn detections(&self) -> Arc<BroadcastStream<Detection>> {
        self.detections.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn analyze(&self, frame: Frame) -> AnalyzeOutcome {
        if self.pool.is_shut_down() {
            log::error!(
                "Abnormal state: worker pool is shut down, releasing frame {}",
                frame.index()
            );
            frame.close();
            return AnalyzeOutcome::ShutDown;
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::trace!("Dropping frame {}: detection in flight", frame.index());
            frame.close();
            return AnalyzeOutcome::Dropped;
        }
        let _busy = BusyGuard(&self.busy);

        self.dispatch(frame)
    }

    /// Shuts the worker pool down; later frames are released unprocessed.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn dispatch(&self, frame: Frame) -> AnalyzeOutcome {
        let snapshot: Vec<Arc<dyn Detector>> = self
            .registry()
            .values()
            .filter(|registration| registration.enabled)
            .map(|registration| registration.detector.clone())
            .collect();

        if snapshot.is_empty() {
            frame.close();
            return AnalyzeOutcome::NoDetectors;
        }

        let index = frame.index();
        let frame: SharedFrame = Arc::new(frame);
        let dispatch = Arc::new(Dispatch::new(index, snapshot.len()));

        for detector in snapshot {
            let kind = detector.kind();
            let done = self.completion(kind, &dispatch);
            let job_frame = frame.clone();
            // A refused job is dropped with its completion, which reports
            // the detector as abandoned and still counts down.
            if let Err(e) = self.pool.execute(move || detector.detect(job_frame, done)) {
                log::error!("Could not dispatch {kind} detector for frame {index}: {e}");
            }
        }

        let joined = match self.join_deadline {
            None => {
                dispatch.latch.wait();
                true
            }
            Some(deadline) => dispatch.latch.wait_timeout(deadline),
        };

        if !joined {
            let pending = dispatch.abandon();
            if pending > 0 {
                log::error!(
                    "Frame {index}: {pending} detector(s) still running after {:?}; frame release deferred to the last holder",
                    self.join_deadline.unwrap_or_default()
                );
                return AnalyzeOutcome::TimedOut { pending };
            }
        }

        frame.release();
        AnalyzeOutcome::Completed {
            published: dispatch.published.load(Ordering::Acquire),
            failed: dispatch.failed.load(Ordering::Acquire),
        }
    }

    fn completion(&self, kind: DetectionKind, dispatch: &Arc<Dispatch>) -> Completion {
        let dispatch = dispatch.clone();
        let bus = self.detections.clone();
        Completion::new(kind, move |outcome| dispatch.report(kind, &bus, outcome))
    }

    fn set_enabled(&self, kind: DetectionKind, enabled: bool) {
        if let Some(registration) = self.registry_mut().get_mut(&kind) {
            registration.enabled = enabled;
        }
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DetectionKind, Registration>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<DetectionKind, Registration>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}
