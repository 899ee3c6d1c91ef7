use std::thread;

use thiserror::Error;

use crate::detection::domain::detection::{Detection, DetectionKind};
use crate::shared::frame::SharedFrame;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),
    #[error("detector dropped its completion without reporting")]
    Abandoned,
    #[error("detector panicked")]
    Panicked,
}

/// Outcome of a single detector invocation.
pub type DetectionOutcome = Result<Detection, DetectorError>;

type Sink = Box<dyn FnOnce(DetectionOutcome) + Send>;

/// Single-use handle through which a detector reports its result.
///
/// `complete` consumes the handle, so one invocation can report at most
/// once. A handle dropped unreported (including while unwinding from a
/// panic) reports a failure on its own.
pub struct Completion {
    kind: DetectionKind,
    sink: Option<Sink>,
}

impl Completion {
    pub fn new(kind: DetectionKind, sink: impl FnOnce(DetectionOutcome) + Send + 'static) -> Self {
        Self {
            kind,
            sink: Some(Box::new(sink)),
        }
    }

    pub fn kind(&self) -> DetectionKind {
        self.kind
    }

    pub fn complete(mut self, outcome: DetectionOutcome) {
        if let Some(sink) = self.sink.take() {
            sink(outcome);
        }
    }

    pub fn detected(self, detection: Detection) {
        self.complete(Ok(detection));
    }

    pub fn failed(self, error: DetectorError) {
        self.complete(Err(error));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            let error = if thread::panicking() {
                DetectorError::Panicked
            } else {
                DetectorError::Abandoned
            };
            log::warn!("{} detector completion dropped: {error}", self.kind);
            sink(Err(error));
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind)
            .field("pending", &self.sink.is_some())
            .finish()
    }
}

/// Domain interface for a pluggable detector.
///
/// `detect` runs on a worker thread. It may report synchronously or hand
/// the frame and the completion to another engine and report later, from
/// any thread. Exactly one report per invocation is expected; the frame
/// handle must not be retained after reporting.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectionKind;

    fn detect(&self, frame: SharedFrame, done: Completion);
}
