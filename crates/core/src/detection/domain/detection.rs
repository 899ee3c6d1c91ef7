use serde::{Deserialize, Serialize};

use crate::shared::geometry::{BoundingBox, Point, Rotation, Size};
use crate::stream::vision_stream::Tagged;

/// Detector key space: one detector per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    Face,
    Barcode,
}

impl DetectionKind {
    pub const ALL: &[DetectionKind] = &[DetectionKind::Face, DetectionKind::Barcode];
}

impl std::fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionKind::Face => write!(f, "face"),
            DetectionKind::Barcode => write!(f, "barcode"),
        }
    }
}

/// Geometry of the image a detection's coordinates refer to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub size: Size,
    pub rotation: Rotation,
}

impl SourceInfo {
    pub const fn new(size: Size, rotation: Rotation) -> Self {
        Self { size, rotation }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    Nose,
    MouthLeft,
    MouthRight,
}

impl LandmarkKind {
    pub const ALL: [LandmarkKind; 5] = [
        LandmarkKind::LeftEye,
        LandmarkKind::RightEye,
        LandmarkKind::Nose,
        LandmarkKind::MouthLeft,
        LandmarkKind::MouthRight,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub position: Point,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceObject {
    pub source: SourceInfo,
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<Landmark>,
}

impl FaceObject {
    pub fn landmark(&self, kind: LandmarkKind) -> Option<&Landmark> {
        self.landmarks.iter().find(|l| l.kind == kind)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    #[default]
    Unknown,
    QrCode,
    Aztec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BarcodeObject {
    pub source: SourceInfo,
    pub bounding_box: Option<BoundingBox>,
    pub format: BarcodeFormat,
    pub display_value: String,
}

/// Result of one detector invocation.
///
/// A detection without a bounding box is the "nothing found" value of its
/// kind; detectors report it instead of staying silent so the join always
/// sees one result per invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Detection {
    Face(FaceObject),
    Barcode(BarcodeObject),
}

impl Detection {
    pub fn null(kind: DetectionKind, source: SourceInfo) -> Self {
        match kind {
            DetectionKind::Face => Detection::Face(FaceObject {
                source,
                ..FaceObject::default()
            }),
            DetectionKind::Barcode => Detection::Barcode(BarcodeObject {
                source,
                ..BarcodeObject::default()
            }),
        }
    }

    pub fn kind(&self) -> DetectionKind {
        match self {
            Detection::Face(_) => DetectionKind::Face,
            Detection::Barcode(_) => DetectionKind::Barcode,
        }
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        match self {
            Detection::Face(face) => face.bounding_box.as_ref(),
            Detection::Barcode(barcode) => barcode.bounding_box.as_ref(),
        }
    }

    pub fn source(&self) -> SourceInfo {
        match self {
            Detection::Face(face) => face.source,
            Detection::Barcode(barcode) => barcode.source,
        }
    }

    pub fn is_null(&self) -> bool {
        self.bounding_box().is_none()
    }

    /// Copy of this detection carrying `bounds` (and `source`, when the
    /// bounds live in a different coordinate system). Every other payload
    /// field is preserved.
    pub fn with_bounds(&self, bounds: BoundingBox, source: Option<SourceInfo>) -> Self {
        match self {
            Detection::Face(face) => Detection::Face(FaceObject {
                source: source.unwrap_or(face.source),
                bounding_box: Some(bounds),
                landmarks: face.landmarks.clone(),
            }),
            Detection::Barcode(barcode) => Detection::Barcode(BarcodeObject {
                source: source.unwrap_or(barcode.source),
                bounding_box: Some(bounds),
                format: barcode.format,
                display_value: barcode.display_value.clone(),
            }),
        }
    }
}

impl Tagged for Detection {
    type Tag = DetectionKind;

    fn tag(&self) -> DetectionKind {
        self.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn source() -> SourceInfo {
        SourceInfo::new(Size::new(640, 480), Rotation::Deg90)
    }

    fn barcode() -> Detection {
        Detection::Barcode(BarcodeObject {
            source: source(),
            bounding_box: Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)),
            format: BarcodeFormat::QrCode,
            display_value: "ticket-42".into(),
        })
    }

    #[rstest]
    #[case(DetectionKind::Face)]
    #[case(DetectionKind::Barcode)]
    fn test_null_detection_has_kind_and_no_bounds(#[case] kind: DetectionKind) {
        let null = Detection::null(kind, source());
        assert_eq!(null.kind(), kind);
        assert!(null.is_null());
        assert_eq!(null.source(), source());
    }

    #[test]
    fn test_with_bounds_preserves_barcode_payload() {
        let moved = barcode().with_bounds(BoundingBox::new(10.0, 10.0, 20.0, 20.0), None);
        let Detection::Barcode(b) = moved else {
            panic!("kind changed");
        };
        assert_eq!(b.bounding_box, Some(BoundingBox::new(10.0, 10.0, 20.0, 20.0)));
        assert_eq!(b.display_value, "ticket-42");
        assert_eq!(b.format, BarcodeFormat::QrCode);
        assert_eq!(b.source, source());
    }

    #[test]
    fn test_with_bounds_preserves_landmarks_and_replaces_source() {
        let face = Detection::Face(FaceObject {
            source: source(),
            bounding_box: None,
            landmarks: vec![Landmark {
                kind: LandmarkKind::Nose,
                position: Point::new(5.0, 6.0),
            }],
        });
        let overlay = SourceInfo::new(Size::new(1080, 1920), Rotation::Deg0);
        let moved = face.with_bounds(BoundingBox::new(0.0, 0.0, 1.0, 1.0), Some(overlay));
        let Detection::Face(f) = moved else {
            panic!("kind changed");
        };
        assert_eq!(f.source, overlay);
        assert_eq!(
            f.landmark(LandmarkKind::Nose).map(|l| l.position),
            Some(Point::new(5.0, 6.0))
        );
        assert!(f.landmark(LandmarkKind::LeftEye).is_none());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(barcode()).unwrap();
        assert_eq!(json["kind"], "barcode");
        assert_eq!(json["format"], "qr_code");
        assert_eq!(json["source"]["rotation"], 90);
    }
}
