use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::detection::domain::detection::{Detection, DetectionKind, SourceInfo};
use crate::detection::domain::detector::{Completion, Detector, DetectorError};
use crate::shared::frame::SharedFrame;
use crate::shared::geometry::BoundingBox;

/// Replays pre-recorded detection results by frame index.
///
/// Frames with a recorded box yield the template detection moved to that
/// box. Frames without one yield the kind's null detection, so the replay
/// reports exactly once per frame like a live detector would.
pub struct ReplayDetector {
    kind: DetectionKind,
    recorded: Arc<HashMap<usize, BoundingBox>>,
    template: Option<Detection>,
    latency: Duration,
    failing: HashSet<usize>,
}

impl ReplayDetector {
    pub fn new(kind: DetectionKind, recorded: Arc<HashMap<usize, BoundingBox>>) -> Self {
        Self {
            kind,
            recorded,
            template: None,
            latency: Duration::ZERO,
            failing: HashSet::new(),
        }
    }

    /// Payload (landmarks, barcode value, ...) carried by replayed hits.
    /// Must be of this detector's kind.
    pub fn with_template(mut self, template: Detection) -> Self {
        debug_assert_eq!(template.kind(), self.kind, "template kind must match detector kind");
        self.template = Some(template);
        self
    }

    /// Simulated inference time spent before reporting.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Frames on which the detector reports a failure instead of a result.
    pub fn with_failures(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(frames);
        self
    }

    fn replay(&self, index: usize, source: SourceInfo) -> Detection {
        let null = || Detection::null(self.kind, source);
        match self.recorded.get(&index) {
            Some(bounds) => self
                .template
                .as_ref()
                .map_or_else(null, |template| template.clone())
                .with_bounds(*bounds, Some(source)),
            None => null(),
        }
    }
}

impl Detector for ReplayDetector {
    fn kind(&self) -> DetectionKind {
        self.kind
    }

    fn detect(&self, frame: SharedFrame, done: Completion) {
        let index = frame.index();
        let source = SourceInfo::new(frame.info().size(), frame.rotation());
        drop(frame);

        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        if self.failing.contains(&index) {
            done.failed(DetectorError::Failed(format!(
                "replayed failure on frame {index}"
            )));
        } else {
            done.detected(self.replay(index, source));
        }
    }
}
