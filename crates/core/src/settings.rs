use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::animation::bounds_interpolator::InterpolatorConfig;
use crate::shared::constants::{
    DEFAULT_ANIMATION_DURATION, DEFAULT_LOST_OBJECT_DURATION, DEFAULT_TICK_INTERVAL,
    MIN_WORKER_THREADS, SETTINGS_DIR_NAME, SETTINGS_FILE_NAME,
};
use crate::shared::geometry::Size;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime tuning of the detection pipeline, stored as JSON.
///
/// Missing fields take their default, so files written by older versions
/// keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Detector worker threads; 0 picks one per core.
    pub worker_threads: usize,
    /// Bound on the per-frame join, in milliseconds. `None` waits forever.
    pub join_deadline_ms: Option<u64>,
    pub animation_ms: u64,
    pub lost_object_ms: u64,
    pub tick_ms: u64,
    pub overlay: Size,
    pub front_camera: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            join_deadline_ms: None,
            animation_ms: DEFAULT_ANIMATION_DURATION.as_millis() as u64,
            lost_object_ms: DEFAULT_LOST_OBJECT_DURATION.as_millis() as u64,
            tick_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            overlay: Size::new(1080, 1920),
            front_camera: false,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Loads the user's settings, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            log::warn!("{e}; using default settings");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_error = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_error)
    }

    /// Thread count for the worker pool, never below [`MIN_WORKER_THREADS`].
    /// `None` means one per core.
    pub fn worker_threads(&self) -> Option<usize> {
        (self.worker_threads > 0).then(|| self.worker_threads.max(MIN_WORKER_THREADS))
    }

    pub fn join_deadline(&self) -> Option<Duration> {
        self.join_deadline_ms.map(Duration::from_millis)
    }

    pub fn interpolator(&self) -> InterpolatorConfig {
        InterpolatorConfig {
            animation_duration: Duration::from_millis(self.animation_ms),
            lost_object_duration: Duration::from_millis(self.lost_object_ms),
            tick_interval: Duration::from_millis(self.tick_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_interpolator_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.interpolator(), InterpolatorConfig::default());
        assert_eq!(settings.join_deadline(), None);
        assert_eq!(settings.worker_threads(), None);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            worker_threads: 3,
            join_deadline_ms: Some(250),
            front_camera: true,
            ..Settings::default()
        };

        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();

        assert_eq!(loaded, settings);
        assert_eq!(loaded.join_deadline(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "lost_object_ms": 500 }"#).unwrap();

        let loaded = Settings::load_from(&path).unwrap();

        assert_eq!(loaded.lost_object_ms, 500);
        assert_eq!(loaded.animation_ms, 100);
        assert_eq!(loaded.overlay, Size::new(1080, 1920));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            Settings::load_from(Path::new("/nonexistent/settings.json")),
            Err(SettingsError::Io { .. })
        ));
    }

    #[test]
    fn test_worker_threads_clamped_to_minimum() {
        let settings = Settings {
            worker_threads: 1,
            ..Settings::default()
        };
        assert_eq!(settings.worker_threads(), Some(MIN_WORKER_THREADS));
    }
}
