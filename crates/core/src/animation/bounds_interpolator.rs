use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::animation::scheduler::{Scheduler, TaskHandle};
use crate::detection::domain::detection::Detection;
use crate::shared::constants::{
    DEFAULT_ANIMATION_DURATION, DEFAULT_LOST_OBJECT_DURATION, DEFAULT_TICK_INTERVAL,
};
use crate::shared::geometry::BoundingBox;
use crate::stream::vision_stream::{Receiver, Transformer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterpolatorConfig {
    /// Length of the move from the displayed bounds to a new detection.
    pub animation_duration: Duration,
    /// How long bounds survive a null detection before they are cleared.
    pub lost_object_duration: Duration,
    pub tick_interval: Duration,
}

impl Default for InterpolatorConfig {
    fn default() -> Self {
        Self {
            animation_duration: DEFAULT_ANIMATION_DURATION,
            lost_object_duration: DEFAULT_LOST_OBJECT_DURATION,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackPhase {
    /// No bounds are displayed.
    Idle,
    /// Bounds are displayed and at rest.
    Tracking,
    /// Bounds are moving toward the latest detection.
    Animating,
}

struct Tween {
    generation: u64,
    start: BoundingBox,
    end: BoundingBox,
    started: Duration,
    detection: Detection,
}

#[derive(Default)]
struct BoundsTrack {
    displayed: Option<BoundingBox>,
    tween: Option<Tween>,
    generation: u64,
    pending_tick: Option<TaskHandle>,
    pending_clear: Option<TaskHandle>,
    /// Set once the subscription is gone; nothing is emitted afterwards.
    detached: bool,
}

impl BoundsTrack {
    fn phase(&self) -> TrackPhase {
        match (&self.displayed, &self.tween) {
            (None, _) => TrackPhase::Idle,
            (Some(_), Some(_)) => TrackPhase::Animating,
            (Some(_), None) => TrackPhase::Tracking,
        }
    }

}

struct Inner {
    scheduler: Arc<dyn Scheduler>,
    config: InterpolatorConfig,
    track: Mutex<BoundsTrack>,
}

/// Smooths the bounds of a detection stream over time.
///
/// Each non-null detection starts a linear move from the bounds currently
/// on screen to the detection's bounds, emitted at every tick. A null
/// detection is forwarded as is and starts a grace timer: if no new
/// detection arrives before it fires, the displayed bounds are forgotten
/// and the next detection appears without a move.
///
/// Use one instance per subscription, through
/// [`StreamExt::through`](crate::stream::operators::StreamExt::through).
/// All state changes and every emission happen on the scheduler context.
pub struct BoundsInterpolator {
    inner: Arc<Inner>,
}

impl BoundsInterpolator {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: InterpolatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler,
                config,
                track: Mutex::new(BoundsTrack::default()),
            }),
        }
    }

    pub fn phase(&self) -> TrackPhase {
        self.inner.track().phase()
    }

    /// Bounds most recently emitted, if any are held.
    pub fn displayed(&self) -> Option<BoundingBox> {
        self.inner.track().displayed
    }
}

impl Transformer<Detection, Detection> for BoundsInterpolator {
    fn transform(&self, value: Detection, downstream: &Arc<dyn Receiver<Detection>>) {
        let inner = self.inner.clone();
        let downstream = downstream.clone();
        self.inner
            .scheduler
            .execute(Box::new(move || inner.on_detection(value, downstream)));
    }

    /// Stops the tween and the grace timer. Detections already queued on the
    /// scheduler are ignored when they run.
    fn detach(&self) {
        let mut track = self.inner.track();
        track.detached = true;
        self.inner.stop_tween(&mut track);
        if let Some(handle) = track.pending_clear.take() {
            self.inner.scheduler.cancel(handle);
        }
    }
}

impl Inner {
    fn track(&self) -> std::sync::MutexGuard<'_, BoundsTrack> {
        self.track.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalidates and cancels ticks already scheduled for the current
    /// tween.
    fn stop_tween(&self, track: &mut BoundsTrack) {
        track.tween = None;
        track.generation += 1;
        if let Some(handle) = track.pending_tick.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn on_detection(self: &Arc<Self>, detection: Detection, downstream: Arc<dyn Receiver<Detection>>) {
        if self.track().detached {
            return;
        }
        match detection.bounding_box().copied() {
            None => {
                self.schedule_clear();
                downstream.send(detection);
            }
            Some(end) => {
                let emitted = self.start_tween(detection, end, &downstream);
                downstream.send(emitted);
            }
        }
    }

    fn schedule_clear(self: &Arc<Self>) {
        let mut track = self.track();
        if track.displayed.is_none() || track.pending_clear.is_some() {
            return;
        }
        let inner = self.clone();
        let handle = self
            .scheduler
            .schedule(self.config.lost_object_duration, Box::new(move || inner.clear()));
        track.pending_clear = Some(handle);
    }

    fn clear(&self) {
        let mut track = self.track();
        track.pending_clear = None;
        self.stop_tween(&mut track);
        track.displayed = None;
        log::trace!("Tracked bounds lost");
    }

    /// Replaces any running tween and returns the detection to emit right
    /// away, carrying the bounds the new tween starts from.
    fn start_tween(
        self: &Arc<Self>,
        detection: Detection,
        end: BoundingBox,
        downstream: &Arc<dyn Receiver<Detection>>,
    ) -> Detection {
        let mut track = self.track();
        if let Some(handle) = track.pending_clear.take() {
            self.scheduler.cancel(handle);
        }
        self.stop_tween(&mut track);

        let start = track.displayed.unwrap_or(end);
        if start == end || self.config.animation_duration.is_zero() {
            track.displayed = Some(end);
            return detection;
        }

        track.displayed = Some(start);
        let emitted = detection.with_bounds(start, None);
        track.tween = Some(Tween {
            generation: track.generation,
            start,
            end,
            started: self.scheduler.now(),
            detection,
        });
        self.schedule_tick(&mut track, downstream.clone());
        emitted
    }

    fn schedule_tick(self: &Arc<Self>, track: &mut BoundsTrack, downstream: Arc<dyn Receiver<Detection>>) {
        let inner = self.clone();
        let generation = track.generation;
        track.pending_tick = Some(self.scheduler.schedule(
            self.config.tick_interval.max(Duration::from_millis(1)),
            Box::new(move || inner.tick(generation, downstream)),
        ));
    }

    fn tick(self: &Arc<Self>, generation: u64, downstream: Arc<dyn Receiver<Detection>>) {
        let emitted = {
            let mut track = self.track();
            let Some(tween) = track.tween.as_ref().filter(|t| t.generation == generation) else {
                return;
            };

            let elapsed = self.scheduler.now().saturating_sub(tween.started);
            let fraction = (elapsed.as_secs_f32() / self.config.animation_duration.as_secs_f32())
                .clamp(0.0, 1.0);
            let bounds = tween.start.lerp(&tween.end, fraction);
            let emitted = tween.detection.with_bounds(bounds, None);

            track.displayed = Some(bounds);
            if fraction >= 1.0 {
                track.tween = None;
                track.pending_tick = None;
            } else {
                self.schedule_tick(&mut track, downstream.clone());
            }
            emitted
        };
        downstream.send(emitted);
    }
}
