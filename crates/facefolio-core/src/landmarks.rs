//! Landmark geometry. Turns raw detector point clusters into percent-space
//! feature boxes and eye alignment vectors, and re-projects them after a
//! raster rotation.

use crate::types::{Alignment, LandmarkData, PercentBox, PixelRect, Point};
use serde::{Deserialize, Serialize};

/// Raw detector output, all coordinates in image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacePoints {
    pub face: PixelRect,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub nose: Vec<Point>,
    pub mouth: Vec<Point>,
}

/// Min/max bounds of a point cluster, normalised to percent of the image.
///
/// Returns `None` for an empty cluster or a zero-sized image.
pub fn percent_bounds(points: &[Point], width: u32, height: u32) -> Option<PercentBox> {
    if points.is_empty() || width == 0 || height == 0 {
        return None;
    }

    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    Some(percent_rect(
        &PixelRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        },
        width,
        height,
    ))
}

/// Convert a top-left pixel rect into a centered percent box.
pub fn percent_rect(rect: &PixelRect, width: u32, height: u32) -> PercentBox {
    let w = width as f32;
    let h = height as f32;
    PercentBox {
        x: (rect.x + rect.width / 2.0) / w * 100.0,
        y: (rect.y + rect.height / 2.0) / h * 100.0,
        width: rect.width / w * 100.0,
        height: rect.height / h * 100.0,
    }
}

/// Arithmetic mean of a point cluster, in the cluster's own units.
pub fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

impl LandmarkData {
    /// Derive the feature boxes and alignment centroids from detector points.
    ///
    /// `width`/`height` are the natural dimensions of the image the points
    /// were detected on.
    pub fn from_face_points(points: &FacePoints, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }

        let both_eyes: Vec<Point> = points
            .left_eye
            .iter()
            .chain(points.right_eye.iter())
            .copied()
            .collect();

        Some(Self {
            face: percent_rect(&points.face, width, height),
            eyes: percent_bounds(&both_eyes, width, height)?,
            nose: percent_bounds(&points.nose, width, height)?,
            mouth: percent_bounds(&points.mouth, width, height)?,
            alignment: Alignment {
                left: centroid(&points.left_eye)?,
                right: centroid(&points.right_eye)?,
            },
        })
    }
}

/// Tilt of the eye line in radians, `atan2(dy, dx)` from left to right eye.
///
/// Positive when the right eye sits lower than the left (y grows downward).
pub fn tilt_angle(alignment: &Alignment) -> f32 {
    let dy = alignment.right.y - alignment.left.y;
    let dx = alignment.right.x - alignment.left.x;
    dy.atan2(dx)
}

/// Rotate a pixel-space point by `-angle` about `center`.
fn rotate_pixel(p: Point, center: Point, angle: f32) -> Point {
    let (sin, cos) = (-angle).sin_cos();
    let dx = p.x - center.x;
    let dy = p.y - center.y;
    Point::new(
        center.x + dx * cos - dy * sin,
        center.y + dx * sin + dy * cos,
    )
}

/// Rotate a percent-space point by `-angle` about the image center, going
/// through pixel space so non-square images rotate correctly.
fn rotate_percent(p: Point, angle: f32, width: u32, height: u32) -> Point {
    let w = width as f32;
    let h = height as f32;
    let px = Point::new(p.x / 100.0 * w, p.y / 100.0 * h);
    let rotated = rotate_pixel(px, Point::new(w / 2.0, h / 2.0), angle);
    Point::new(rotated.x / w * 100.0, rotated.y / h * 100.0)
}

fn rotate_box(b: &PercentBox, angle: f32, width: u32, height: u32) -> PercentBox {
    let c = rotate_percent(b.center(), angle, width, height);
    // Only the center moves; width/height are carried over unchanged.
    PercentBox { x: c.x, y: c.y, ..*b }
}

/// Re-project landmark data through a `-angle` rotation about the image
/// center, so cached features stay valid for the leveled raster.
///
/// `width`/`height` are the dimensions of the image before rotation.
pub fn reproject(data: &LandmarkData, angle: f32, width: u32, height: u32) -> LandmarkData {
    let center = Point::new(width as f32 / 2.0, height as f32 / 2.0);
    LandmarkData {
        face: rotate_box(&data.face, angle, width, height),
        eyes: rotate_box(&data.eyes, angle, width, height),
        nose: rotate_box(&data.nose, angle, width, height),
        mouth: rotate_box(&data.mouth, angle, width, height),
        alignment: Alignment {
            left: rotate_pixel(data.alignment.left, center, angle),
            right: rotate_pixel(data.alignment.right, center, angle),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(f32, f32)]) -> Vec<Point> {
        raw.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    fn sample_points() -> FacePoints {
        FacePoints {
            face: PixelRect { x: 300.0, y: 150.0, width: 200.0, height: 250.0 },
            left_eye: pts(&[(350.0, 220.0), (370.0, 215.0), (390.0, 225.0)]),
            right_eye: pts(&[(410.0, 225.0), (430.0, 215.0), (450.0, 230.0)]),
            nose: pts(&[(400.0, 240.0), (390.0, 290.0), (410.0, 290.0)]),
            mouth: pts(&[(360.0, 320.0), (440.0, 320.0), (400.0, 340.0)]),
        }
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_percent_bounds_center_and_size() {
        let b = percent_bounds(&pts(&[(100.0, 100.0), (300.0, 200.0)]), 800, 600).unwrap();
        assert!(approx(b.x, 25.0), "x = {}", b.x);
        assert!(approx(b.y, 25.0), "y = {}", b.y);
        assert!(approx(b.width, 25.0), "width = {}", b.width);
        assert!(approx(b.height, 100.0 / 6.0), "height = {}", b.height);
    }

    #[test]
    fn test_percent_bounds_empty() {
        assert!(percent_bounds(&[], 800, 600).is_none());
        assert!(percent_bounds(&pts(&[(1.0, 1.0)]), 0, 600).is_none());
    }

    #[test]
    fn test_centroid() {
        let c = centroid(&pts(&[(0.0, 0.0), (10.0, 0.0), (5.0, 9.0)])).unwrap();
        assert!(approx(c.x, 5.0));
        assert!(approx(c.y, 3.0));
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn test_from_face_points() {
        let data = LandmarkData::from_face_points(&sample_points(), 800, 600).unwrap();
        // Face box center (400, 275) of 800x600.
        assert!(approx(data.face.x, 50.0), "face.x = {}", data.face.x);
        assert!(approx(data.face.y, 275.0 / 6.0), "face.y = {}", data.face.y);
        assert!(approx(data.face.width, 25.0));
        // Eyes span x 350..450 over both clusters.
        assert!(approx(data.eyes.width, 12.5), "eyes.width = {}", data.eyes.width);
        assert!(approx(data.eyes.x, 50.0));
        // Alignment stays in pixels.
        assert!(approx(data.alignment.left.x, 370.0));
        assert!(approx(data.alignment.right.y, 670.0 / 3.0));
    }

    #[test]
    fn test_from_face_points_missing_cluster() {
        let mut p = sample_points();
        p.mouth.clear();
        assert!(LandmarkData::from_face_points(&p, 800, 600).is_none());
    }

    #[test]
    fn test_tilt_angle() {
        let level = Alignment { left: Point::new(10.0, 50.0), right: Point::new(90.0, 50.0) };
        assert!(tilt_angle(&level).abs() < 1e-6);

        let tilted = Alignment { left: Point::new(0.0, 0.0), right: Point::new(10.0, 10.0) };
        assert!(approx(tilt_angle(&tilted), std::f32::consts::FRAC_PI_4));
    }

    #[test]
    fn test_reproject_zero_angle_is_identity() {
        let data = LandmarkData::from_face_points(&sample_points(), 800, 600).unwrap();
        let out = reproject(&data, 0.0, 800, 600);
        for (a, b) in [
            (&data.face, &out.face),
            (&data.eyes, &out.eyes),
            (&data.nose, &out.nose),
            (&data.mouth, &out.mouth),
        ] {
            assert!(approx(a.x, b.x) && approx(a.y, b.y), "{a:?} vs {b:?}");
            assert_eq!(a.width, b.width);
            assert_eq!(a.height, b.height);
        }
        assert!(approx(data.alignment.left.x, out.alignment.left.x));
        assert!(approx(data.alignment.right.y, out.alignment.right.y));
    }

    #[test]
    fn test_reproject_levels_eye_line() {
        let mut data = LandmarkData::from_face_points(&sample_points(), 800, 600).unwrap();
        data.alignment = Alignment { left: Point::new(300.0, 280.0), right: Point::new(500.0, 320.0) };
        let angle = tilt_angle(&data.alignment);
        let out = reproject(&data, angle, 800, 600);
        assert!(
            (out.alignment.left.y - out.alignment.right.y).abs() < 1e-2,
            "eyes not level: {:?}",
            out.alignment
        );
        // Box size is carried over untouched.
        assert_eq!(out.face.width, data.face.width);
        assert_eq!(out.face.height, data.face.height);
    }

    #[test]
    fn test_reproject_center_is_fixed_point() {
        let mut data = LandmarkData::from_face_points(&sample_points(), 800, 600).unwrap();
        data.nose = PercentBox::new(50.0, 50.0, 4.0, 8.0);
        let out = reproject(&data, 0.3, 800, 600);
        assert!(approx(out.nose.x, 50.0) && approx(out.nose.y, 50.0), "{:?}", out.nose);
    }
}
