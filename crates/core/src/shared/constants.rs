use std::time::Duration;

/// How long an interpolated move toward a new detection lasts.
pub const DEFAULT_ANIMATION_DURATION: Duration = Duration::from_millis(100);

/// Grace period after a null detection before tracked bounds are forgotten.
pub const DEFAULT_LOST_OBJECT_DURATION: Duration = Duration::from_millis(200);

/// Interval between interpolation ticks (~60 fps).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Lower bound for the detector worker pool; one thread per built-in kind.
pub const MIN_WORKER_THREADS: usize = 2;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const SETTINGS_DIR_NAME: &str = "framewatch";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
