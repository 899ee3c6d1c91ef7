use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::geometry::Rotation;

#[derive(Debug, Error)]
pub enum FrameSourceError {
    #[error("frame source is not open")]
    NotOpened,
    #[error("no frames found in {0}")]
    Empty(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: usize,
    pub rotation: Rotation,
    pub source_path: Option<PathBuf>,
}

impl SourceMetadata {
    /// Capture time of frame `index`, derived from the frame rate.
    pub fn timestamp_of(&self, index: usize) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(index as f64 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    /// Wall-clock gap between consecutive frames, if the source has a rate.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.fps > 0.0).then(|| Duration::from_secs_f64(1.0 / self.fps))
    }
}

/// Produces the frames fed to the detection coordinator.
///
/// Implementations handle decoding or generation details while the
/// pipeline works with the abstract `Frame` and `SourceMetadata` types.
pub trait FrameSource: Send {
    /// Prepares the source and returns its metadata.
    fn open(&mut self) -> Result<SourceMetadata, FrameSourceError>;

    /// Returns an iterator over frames in capture order.
    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, FrameSourceError>> + '_>;

    /// Releases any resources held by the source.
    fn close(&mut self);
}
