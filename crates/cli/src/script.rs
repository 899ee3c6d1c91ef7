use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use framewatch_core::detection::domain::detection::{
    BarcodeFormat, BarcodeObject, Detection, DetectionKind,
};
use framewatch_core::detection::infrastructure::replay_detector::ReplayDetector;
use framewatch_core::shared::geometry::{BoundingBox, Rotation};

/// Replay description: the frames to generate and what each detector
/// "sees" on them.
#[derive(Debug, Deserialize)]
pub struct ReplayScript {
    pub frames: FrameSpec,
    #[serde(default)]
    pub detectors: HashMap<DetectionKind, DetectorScript>,
}

#[derive(Debug, Deserialize)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub rotation: Rotation,
    pub fps: f64,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct DetectorScript {
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub boxes: HashMap<usize, BoundingBox>,
    #[serde(default)]
    pub failing_frames: Vec<usize>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub display_value: Option<String>,
    #[serde(default)]
    pub format: BarcodeFormat,
}

fn enabled_by_default() -> bool {
    true
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read script {}: {e}", path.display()))?;
        let script: ReplayScript = serde_json::from_str(&json)
            .map_err(|e| format!("Invalid script {}: {e}", path.display()))?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.frames.width == 0 || self.frames.height == 0 {
            return Err("Frame width and height must be positive".into());
        }
        if self.frames.fps <= 0.0 {
            return Err(format!("Frame rate must be positive, got {}", self.frames.fps).into());
        }
        Ok(())
    }
}

impl DetectorScript {
    pub fn build(&self, kind: DetectionKind) -> ReplayDetector {
        let mut detector = ReplayDetector::new(kind, Arc::new(self.boxes.clone()))
            .with_latency(Duration::from_millis(self.latency_ms))
            .with_failures(self.failing_frames.iter().copied());
        if kind == DetectionKind::Barcode {
            detector = detector.with_template(Detection::Barcode(BarcodeObject {
                format: self.format,
                display_value: self.display_value.clone().unwrap_or_default(),
                ..BarcodeObject::default()
            }));
        }
        detector
    }
}
