use std::path::{Path, PathBuf};

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::shared::geometry::Rotation;
use crate::video::domain::frame_source::{FrameSource, FrameSourceError, SourceMetadata};

/// Plays the images of a directory, in file name order, as a frame sequence.
///
/// Images are decoded lazily with the `image` crate into a single RGB
/// plane. Files whose extension is not a known image type are skipped.
pub struct ImageDirectorySource {
    dir: PathBuf,
    fps: f64,
    rotation: Rotation,
    opened: Option<(Vec<PathBuf>, SourceMetadata)>,
}

impl ImageDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, fps: f64, rotation: Rotation) -> Self {
        Self {
            dir: dir.into(),
            fps,
            rotation,
            opened: None,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn decode(path: &Path, index: usize, rotation: Rotation) -> Result<Frame, FrameSourceError> {
    let rgb = image::open(path)
        .map_err(|source| FrameSourceError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame::rgb(rgb.into_raw(), width, height, rotation, index))
}

impl FrameSource for ImageDirectorySource {
    fn open(&mut self) -> Result<SourceMetadata, FrameSourceError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| FrameSourceError::Empty(self.dir.clone()))?;
        let (width, height) = image::image_dimensions(first).map_err(|source| {
            FrameSourceError::Decode {
                path: first.clone(),
                source,
            }
        })?;

        let metadata = SourceMetadata {
            width,
            height,
            fps: self.fps,
            total_frames: paths.len(),
            rotation: self.rotation,
            source_path: Some(self.dir.clone()),
        };
        log::info!(
            "Opened {} images from {} ({}x{})",
            paths.len(),
            self.dir.display(),
            width,
            height
        );
        self.opened = Some((paths, metadata.clone()));
        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, FrameSourceError>> + '_> {
        let Some((paths, meta)) = self.opened.as_ref() else {
            return Box::new(std::iter::once(Err(FrameSourceError::NotOpened)));
        };
        Box::new(paths.iter().enumerate().map(move |(index, path)| {
            let frame = decode(path, index, meta.rotation)?;
            Ok(frame.with_timestamp(meta.timestamp_of(index)))
        }))
    }

    fn close(&mut self) {
        self.opened = None;
    }
}
