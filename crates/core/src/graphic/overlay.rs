use std::sync::{PoisonError, RwLock};

use crate::shared::geometry::Size;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct OverlayState {
    size: Size,
    front_camera: bool,
}

/// Display surface detections are drawn on.
///
/// Shared between the UI side, which resizes it or switches cameras, and
/// the scalers mapping detections into it.
#[derive(Debug, Default)]
pub struct Overlay {
    state: RwLock<OverlayState>,
}

impl Overlay {
    pub fn new(size: Size, front_camera: bool) -> Self {
        Self {
            state: RwLock::new(OverlayState { size, front_camera }),
        }
    }

    pub fn size(&self) -> Size {
        self.read().size
    }

    pub fn set_size(&self, size: Size) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).size = size;
    }

    /// Front camera frames are mirrored horizontally on screen.
    pub fn is_front_camera(&self) -> bool {
        self.read().front_camera
    }

    pub fn set_front_camera(&self, front_camera: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .front_camera = front_camera;
    }

    fn read(&self) -> OverlayState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_are_visible() {
        let overlay = Overlay::new(Size::new(1080, 1920), false);
        overlay.set_size(Size::new(720, 1280));
        overlay.set_front_camera(true);
        assert_eq!(overlay.size(), Size::new(720, 1280));
        assert!(overlay.is_front_camera());
    }
}
