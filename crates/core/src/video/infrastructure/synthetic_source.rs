use crate::shared::frame::Frame;
use crate::shared::geometry::Rotation;
use crate::video::domain::frame_source::{FrameSource, FrameSourceError, SourceMetadata};

/// Generates uniformly grey frames of a fixed geometry.
///
/// Stands in for a camera when detection results are replayed and pixel
/// content does not matter.
pub struct SyntheticFrameSource {
    metadata: SourceMetadata,
    opened: bool,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, rotation: Rotation, fps: f64, total_frames: usize) -> Self {
        Self {
            metadata: SourceMetadata {
                width,
                height,
                fps,
                total_frames,
                rotation,
                source_path: None,
            },
            opened: false,
        }
    }
}

impl FrameSource for SyntheticFrameSource {
    fn open(&mut self) -> Result<SourceMetadata, FrameSourceError> {
        self.opened = true;
        Ok(self.metadata.clone())
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, FrameSourceError>> + '_> {
        if !self.opened {
            return Box::new(std::iter::once(Err(FrameSourceError::NotOpened)));
        }
        let meta = &self.metadata;
        let len = meta.width as usize * meta.height as usize * 3;
        Box::new((0..meta.total_frames).map(move |index| {
            Ok(
                Frame::rgb(vec![128u8; len], meta.width, meta.height, meta.rotation, index)
                    .with_timestamp(meta.timestamp_of(index)),
            )
        }))
    }

    fn close(&mut self) {
        self.opened = false;
    }
}
