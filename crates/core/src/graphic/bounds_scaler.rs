use std::sync::{Arc, Mutex, PoisonError};

use crate::detection::domain::detection::{Detection, LandmarkKind, SourceInfo};
use crate::graphic::overlay::Overlay;
use crate::shared::geometry::{BoundingBox, Point, Size};
use crate::stream::vision_stream::{Receiver, Transformer};

/// Source-to-overlay mapping, valid for one pair of sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Mapping {
    source: Size,
    target: Size,
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Mapping {
    /// Fills `target` with `source`, preserving the aspect ratio and
    /// centring the overflow.
    fn compute(source: Size, target: Size) -> Self {
        let scale = (target.width as f32 / source.width as f32)
            .max(target.height as f32 / source.height as f32);
        let scaled_width = (source.width as f32 * scale).ceil() as i64;
        let scaled_height = (source.height as f32 * scale).ceil() as i64;
        Self {
            source,
            target,
            scale,
            offset_x: ((target.width as i64 - scaled_width) / 2) as f32,
            offset_y: ((target.height as i64 - scaled_height) / 2) as f32,
        }
    }

    fn x(&self, x: f32) -> f32 {
        x * self.scale + self.offset_x
    }

    fn y(&self, y: f32) -> f32 {
        y * self.scale + self.offset_y
    }

    /// Maps a source x coordinate, mirrored first for the front camera.
    fn translate_x(&self, x: f32, mirror: bool) -> f32 {
        if mirror {
            self.x(self.source.width as f32 - x)
        } else {
            self.x(x)
        }
    }

    fn translate(&self, point: Point, mirror: bool) -> Point {
        Point::new(self.translate_x(point.x, mirror), self.y(point.y))
    }
}

/// Maps detection bounds from source frame coordinates into overlay
/// coordinates.
///
/// The scale and offsets are cached and recomputed only when the rotated
/// source size or the overlay size changes. Null detections pass through
/// untouched. Face landmarks stay in source coordinates unless selected
/// with [`translating_landmarks`](Self::translating_landmarks).
pub struct BoundsScaler {
    overlay: Arc<Overlay>,
    mapping: Mutex<Mapping>,
    landmarks: Vec<LandmarkKind>,
}

impl BoundsScaler {
    pub fn new(overlay: Arc<Overlay>) -> Self {
        Self {
            overlay,
            mapping: Mutex::new(Mapping::default()),
            landmarks: Vec::new(),
        }
    }

    /// Also maps these face landmarks into overlay coordinates, mirrored
    /// like the bounds.
    pub fn translating_landmarks(mut self, kinds: impl IntoIterator<Item = LandmarkKind>) -> Self {
        self.landmarks.extend(kinds);
        self
    }

    pub fn scale(&self, detection: &Detection) -> Detection {
        let Some(bounds) = detection.bounding_box() else {
            return detection.clone();
        };

        let source = detection.source();
        let rotated = source.rotation.rotate(source.size);
        let target = self.overlay.size();
        if rotated.is_empty() || target.is_empty() {
            log::warn!("Cannot map {} bounds from {rotated:?} to {target:?}", detection.kind());
            return detection.clone();
        }

        let mapping = self.ensure_mapping(rotated, target);
        let mirror = self.overlay.is_front_camera();
        let (left, right) = if mirror {
            (bounds.right, bounds.left)
        } else {
            (bounds.left, bounds.right)
        };
        let mapped = BoundingBox::new(
            mapping.translate_x(left, mirror),
            mapping.y(bounds.top),
            mapping.translate_x(right, mirror),
            mapping.y(bounds.bottom),
        );

        let mut scaled = detection.with_bounds(mapped, Some(SourceInfo::new(target, source.rotation)));
        if let Detection::Face(face) = &mut scaled {
            for landmark in face
                .landmarks
                .iter_mut()
                .filter(|l| self.landmarks.contains(&l.kind))
            {
                landmark.position = mapping.translate(landmark.position, mirror);
            }
        }
        scaled
    }

    /// Scales an x coordinate with the last computed mapping. Meaningless
    /// before the first detection with bounds has been mapped.
    pub fn scale_x(&self, x: f32) -> f32 {
        self.mapping().x(x)
    }

    pub fn scale_y(&self, y: f32) -> f32 {
        self.mapping().y(y)
    }

    /// Like [`scale_x`](Self::scale_x), mirrored for the front camera.
    pub fn translate_x(&self, x: f32) -> f32 {
        self.mapping().translate_x(x, self.overlay.is_front_camera())
    }

    pub fn translate_y(&self, y: f32) -> f32 {
        self.scale_y(y)
    }

    fn mapping(&self) -> Mapping {
        *self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_mapping(&self, source: Size, target: Size) -> Mapping {
        let mut mapping = self.mapping.lock().unwrap_or_else(PoisonError::into_inner);
        if mapping.source != source || mapping.target != target {
            *mapping = Mapping::compute(source, target);
            log::debug!(
                "Overlay mapping {source:?} -> {target:?}: scale {:.3}, offset ({}, {})",
                mapping.scale,
                mapping.offset_x,
                mapping.offset_y
            );
        }
        *mapping
    }
}

impl Transformer<Detection, Detection> for BoundsScaler {
    fn transform(&self, value: Detection, downstream: &Arc<dyn Receiver<Detection>>) {
        downstream.send(self.scale(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detection::{DetectionKind, FaceObject, Landmark};
    use crate::shared::geometry::Rotation;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn face(source: Size, rotation: Rotation, bounds: BoundingBox) -> Detection {
        Detection::null(DetectionKind::Face, SourceInfo::new(source, rotation)).with_bounds(bounds, None)
    }

    fn scaler(target: Size, front_camera: bool) -> BoundsScaler {
        BoundsScaler::new(Arc::new(Overlay::new(target, front_camera)))
    }

    #[test]
    fn test_null_detection_passes_through() {
        let scaler = scaler(Size::new(1080, 1920), false);
        let null = Detection::null(
            DetectionKind::Barcode,
            SourceInfo::new(Size::new(640, 480), Rotation::Deg90),
        );
        assert_eq!(scaler.scale(&null), null);
    }

    #[test]
    fn test_same_aspect_ratio_scales_without_offset() {
        let scaler = scaler(Size::new(1280, 960), false);
        let mapped = scaler.scale(&face(
            Size::new(640, 480),
            Rotation::Deg0,
            BoundingBox::new(10.0, 20.0, 110.0, 220.0),
        ));

        assert_eq!(mapped.bounding_box(), Some(&BoundingBox::new(20.0, 40.0, 220.0, 440.0)));
        assert_eq!(mapped.source().size, Size::new(1280, 960));
    }

    #[test]
    fn test_rotated_source_fills_portrait_overlay() {
        // 640x480 at 90 degrees is 480x640 upright; scale = max(1080/480, 1920/640) = 3.
        // Scaled size 1440x1920, centred: offset_x = (1080 - 1440) / 2 = -180.
        let scaler = scaler(Size::new(1080, 1920), false);
        let mapped = scaler.scale(&face(
            Size::new(640, 480),
            Rotation::Deg90,
            BoundingBox::new(100.0, 100.0, 200.0, 300.0),
        ));

        let b = mapped.bounding_box().unwrap();
        assert_relative_eq!(b.left, 120.0);
        assert_relative_eq!(b.top, 300.0);
        assert_relative_eq!(b.right, 420.0);
        assert_relative_eq!(b.bottom, 900.0);
        assert_relative_eq!(scaler.scale_x(0.0), -180.0);
        assert_relative_eq!(scaler.scale_y(0.0), 0.0);
    }

    #[test]
    fn test_front_camera_mirrors_horizontally() {
        let scaler = scaler(Size::new(640, 480), true);
        let mapped = scaler.scale(&face(
            Size::new(640, 480),
            Rotation::Deg0,
            BoundingBox::new(100.0, 50.0, 200.0, 150.0),
        ));

        assert_eq!(mapped.bounding_box(), Some(&BoundingBox::new(440.0, 50.0, 540.0, 150.0)));
        assert_relative_eq!(scaler.translate_x(100.0), 540.0);
        assert_relative_eq!(scaler.translate_y(100.0), 100.0);
    }

    #[rstest]
    #[case(Rotation::Deg0, Size::new(640, 480))]
    #[case(Rotation::Deg180, Size::new(640, 480))]
    #[case(Rotation::Deg90, Size::new(480, 640))]
    #[case(Rotation::Deg270, Size::new(480, 640))]
    fn test_mapping_uses_rotated_source(#[case] rotation: Rotation, #[case] upright: Size) {
        let scaler = scaler(upright, false);
        let mapped = scaler.scale(&face(
            Size::new(640, 480),
            rotation,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        ));
        assert_eq!(mapped.bounding_box(), Some(&BoundingBox::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_mapping_follows_overlay_resize() {
        let overlay = Arc::new(Overlay::new(Size::new(640, 480), false));
        let scaler = BoundsScaler::new(overlay.clone());
        let detection = face(
            Size::new(640, 480),
            Rotation::Deg0,
            BoundingBox::new(10.0, 10.0, 20.0, 20.0),
        );
        scaler.scale(&detection);
        assert_relative_eq!(scaler.scale_x(10.0), 10.0);

        overlay.set_size(Size::new(1280, 960));
        let mapped = scaler.scale(&detection);
        assert_eq!(mapped.bounding_box().unwrap().left, 20.0);
        assert_relative_eq!(scaler.scale_x(10.0), 20.0);
    }

    #[test]
    fn test_empty_overlay_forwards_unchanged() {
        let scaler = scaler(Size::new(0, 0), false);
        let detection = face(
            Size::new(640, 480),
            Rotation::Deg0,
            BoundingBox::new(1.0, 1.0, 2.0, 2.0),
        );
        assert_eq!(scaler.scale(&detection), detection);
    }

    #[test]
    fn test_transform_preserves_payload() {
        let scaler = scaler(Size::new(1280, 960), false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let downstream: Arc<dyn Receiver<Detection>> =
            Arc::new(move |d: Detection| sink.lock().unwrap().push(d));

        let barcode = Detection::null(
            DetectionKind::Barcode,
            SourceInfo::new(Size::new(640, 480), Rotation::Deg0),
        )
        .with_bounds(BoundingBox::new(0.0, 0.0, 1.0, 1.0), None);
        scaler.transform(barcode, &downstream);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].kind(), DetectionKind::Barcode);
        assert_eq!(seen[0].source().rotation, Rotation::Deg0);
    }

    fn face_with_landmarks() -> Detection {
        Detection::Face(FaceObject {
            source: SourceInfo::new(Size::new(640, 480), Rotation::Deg0),
            bounding_box: Some(BoundingBox::new(100.0, 50.0, 200.0, 150.0)),
            landmarks: vec![
                Landmark {
                    kind: LandmarkKind::Nose,
                    position: Point::new(150.0, 100.0),
                },
                Landmark {
                    kind: LandmarkKind::LeftEye,
                    position: Point::new(120.0, 80.0),
                },
            ],
        })
    }

    #[rstest]
    #[case::rear_camera(false, Point::new(300.0, 200.0))]
    #[case::front_camera(true, Point::new(980.0, 200.0))]
    fn test_selected_landmarks_follow_bounds(#[case] front_camera: bool, #[case] nose: Point) {
        let scaler = scaler(Size::new(1280, 960), front_camera).translating_landmarks([LandmarkKind::Nose]);

        let Detection::Face(face) = scaler.scale(&face_with_landmarks()) else {
            panic!("kind changed");
        };

        assert_eq!(face.landmark(LandmarkKind::Nose).map(|l| l.position), Some(nose));
        assert_relative_eq!(scaler.translate_x(150.0), nose.x);
        assert_relative_eq!(scaler.translate_y(100.0), nose.y);
        assert_eq!(
            face.landmark(LandmarkKind::LeftEye).map(|l| l.position),
            Some(Point::new(120.0, 80.0))
        );
    }

    #[test]
    fn test_landmarks_untouched_by_default() {
        let scaler = scaler(Size::new(1280, 960), false);
        let Detection::Face(face) = scaler.scale(&face_with_landmarks()) else {
            panic!("kind changed");
        };
        assert_eq!(
            face.landmark(LandmarkKind::Nose).map(|l| l.position),
            Some(Point::new(150.0, 100.0))
        );
    }
}
