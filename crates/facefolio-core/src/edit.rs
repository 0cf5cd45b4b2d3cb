//! Destructive image edits: background removal, eye censoring and eye
//! leveling. Each edit yields a new raster; the session swaps it in under a
//! fresh image handle.

use crate::landmarks::{reproject, tilt_angle};
use crate::types::{ImageRef, LandmarkData, PercentBox};
use futures::future::BoxFuture;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// Censor bar padding, as fractions of the eyes box.
const CENSOR_PAD_X: f32 = 0.15;
const CENSOR_TOP: f32 = -0.2;
const CENSOR_BOTTOM: f32 = 1.2;
const CENSOR_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Error, Debug)]
pub enum EditError {
    #[error("background removal failed: {0}")]
    BackgroundRemoval(String),
    #[error("edit worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// External background segmentation.
pub trait BackgroundRemover: Send + Sync {
    fn remove_background<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> BoxFuture<'a, Result<DynamicImage, EditError>>;
}

/// Which destructive edit a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditKind {
    RemoveBackground,
    CensorEyes,
    LevelEyes,
}

impl EditKind {
    /// Progress line for item `index` (1-based) of `total`.
    pub fn progress_text(self, index: usize, total: usize) -> String {
        let verb = match self {
            EditKind::RemoveBackground => "Removing background",
            EditKind::CensorEyes => "Censoring eyes",
            EditKind::LevelEyes => "Leveling eyes",
        };
        format!("{verb} ({index}/{total})...")
    }
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EditKind::RemoveBackground => "remove-background",
            EditKind::CensorEyes => "censor-eyes",
            EditKind::LevelEyes => "level-eyes",
        };
        f.write_str(name)
    }
}

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub applied: usize,
    /// Items without the landmarks the edit needs.
    pub skipped: usize,
    pub failed: usize,
}

/// Paint an opaque bar over the eyes.
///
/// The percent box is converted to pixels with the image's natural size,
/// widened by 15% of its width on each side and stretched from 20% above the
/// box to 20% below it, so brows and lids are covered too.
pub fn censor_eyes(image: &DynamicImage, eyes: &PercentBox) -> RgbaImage {
    let mut out = image.to_rgba8();
    let (width, height) = out.dimensions();
    let rect = eyes.to_pixels(width, height);

    let pad = rect.width * CENSOR_PAD_X;
    let x0 = rect.x - pad;
    let x1 = rect.x + rect.width + pad;
    let y0 = rect.y + rect.height * CENSOR_TOP;
    let y1 = rect.y + rect.height * CENSOR_BOTTOM;

    let clamp_x = |v: f32| v.round().clamp(0.0, width as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, height as f32) as u32;

    for y in clamp_y(y0)..clamp_y(y1) {
        for x in clamp_x(x0)..clamp_x(x1) {
            out.put_pixel(x, y, CENSOR_COLOR);
        }
    }
    out
}

/// Rotate an RGBA raster by `-angle` radians about its center, keeping the
/// canvas size. Uses bilinear interpolation; uncovered pixels are transparent.
pub fn rotate_about_center(src: &RgbaImage, angle: f32) -> RgbaImage {
    let (width, height) = src.dimensions();
    let mut out = RgbaImage::new(width, height);
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    // Output pixel → source: rotate back by +angle.
    let (sin, cos) = angle.sin_cos();

    for oy in 0..height {
        for ox in 0..width {
            let dx = ox as f32 + 0.5 - cx;
            let dy = oy as f32 + 0.5 - cy;
            let sx = cx + dx * cos - dy * sin - 0.5;
            let sy = cy + dx * sin + dy * cos - 0.5;
            out.put_pixel(ox, oy, sample_bilinear(src, sx, sy));
        }
    }
    out
}

/// Bilinear RGBA sample at fractional pixel coordinates. Outside is transparent.
pub(crate) fn sample_bilinear(src: &RgbaImage, sx: f32, sy: f32) -> Rgba<u8> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let texel = |x: i64, y: i64| -> [f32; 4] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = src.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        } else {
            [0.0; 4]
        }
    };

    let tl = texel(x0, y0);
    let tr = texel(x0 + 1, y0);
    let bl = texel(x0, y0 + 1);
    let br = texel(x0 + 1, y0 + 1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Result of leveling one image.
#[derive(Debug, Clone)]
pub struct Leveled {
    pub image: RgbaImage,
    pub landmarks: LandmarkData,
    /// Tilt that was removed, radians.
    pub angle: f32,
}

/// Rotate the raster so the eye line is horizontal and carry the landmarks
/// through the same rotation instead of detecting again.
pub fn level_eyes(image: &DynamicImage, data: &LandmarkData) -> Leveled {
    let angle = tilt_angle(&data.alignment);
    let (width, height) = (image.width(), image.height());
    let rgba = image.to_rgba8();

    let rotated = if angle == 0.0 {
        rgba
    } else {
        rotate_about_center(&rgba, angle)
    };

    Leveled {
        image: rotated,
        landmarks: reproject(data, angle, width, height),
        angle,
    }
}

/// Background remover that keys out the dominant border colour.
///
/// Pixels within `tolerance` (Euclidean RGB distance) of the mean border
/// colour become transparent. Good enough for studio backdrops; real
/// segmentation belongs to an external model.
#[derive(Debug, Clone, Copy)]
pub struct LumaKeyRemover {
    pub tolerance: f32,
}

impl Default for LumaKeyRemover {
    fn default() -> Self {
        Self { tolerance: 40.0 }
    }
}

impl LumaKeyRemover {
    pub fn key_out(&self, image: &DynamicImage) -> RgbaImage {
        let mut out = image.to_rgba8();
        let (w, h) = out.dimensions();
        if w == 0 || h == 0 {
            return out;
        }

        let mut sum = [0.0f64; 3];
        let mut count = 0.0f64;
        for (x, y, p) in out.enumerate_pixels() {
            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                for c in 0..3 {
                    sum[c] += f64::from(p[c]);
                }
                count += 1.0;
            }
        }
        let key = sum.map(|s| (s / count) as f32);
        let limit = self.tolerance * self.tolerance;

        for p in out.pixels_mut() {
            let d: f32 = (0..3).map(|c| (p[c] as f32 - key[c]).powi(2)).sum();
            if d <= limit {
                p[3] = 0;
            }
        }
        out
    }
}

impl BackgroundRemover for LumaKeyRemover {
    fn remove_background<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> BoxFuture<'a, Result<DynamicImage, EditError>> {
        let remover = *self;
        let image = image.clone();
        Box::pin(async move {
            let keyed =
                tokio::task::spawn_blocking(move || remover.key_out(image.image())).await?;
            Ok(DynamicImage::ImageRgba8(keyed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alignment, Point};

    fn data_with_alignment(left: Point, right: Point) -> LandmarkData {
        LandmarkData {
            face: PercentBox::new(50.0, 50.0, 40.0, 50.0),
            eyes: PercentBox::new(50.0, 40.0, 30.0, 10.0),
            nose: PercentBox::new(50.0, 55.0, 8.0, 12.0),
            mouth: PercentBox::new(50.0, 70.0, 20.0, 6.0),
            alignment: Alignment { left, right },
        }
    }

    #[test]
    fn test_censor_covers_padded_region() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255])));
        // 40x10 px box centered at (100, 50) → top-left (80, 45).
        let out = censor_eyes(&img, &PercentBox::new(50.0, 50.0, 20.0, 10.0));

        // Horizontal padding: 6 px on each side → x 74..126.
        assert_eq!(out.get_pixel(74, 50), &CENSOR_COLOR);
        assert_eq!(out.get_pixel(125, 50), &CENSOR_COLOR);
        assert_eq!(out.get_pixel(73, 50)[0], 255);
        assert_eq!(out.get_pixel(126, 50)[0], 255);
        // Vertical span: 45 - 2 = 43 up to 45 + 12 = 57.
        assert_eq!(out.get_pixel(100, 43), &CENSOR_COLOR);
        assert_eq!(out.get_pixel(100, 56), &CENSOR_COLOR);
        assert_eq!(out.get_pixel(100, 42)[0], 255);
        assert_eq!(out.get_pixel(100, 57)[0], 255);
    }

    #[test]
    fn test_censor_clips_to_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(50, 50));
        let out = censor_eyes(&img, &PercentBox::new(2.0, 2.0, 30.0, 30.0));
        assert_eq!(out.dimensions(), (50, 50));
        assert_eq!(out.get_pixel(0, 0), &CENSOR_COLOR);
    }

    #[test]
    fn test_level_eyes_zero_angle_is_noop() {
        let mut src = RgbaImage::new(40, 20);
        src.put_pixel(3, 4, Rgba([9, 8, 7, 255]));
        let img = DynamicImage::ImageRgba8(src.clone());
        let data = data_with_alignment(Point::new(10.0, 8.0), Point::new(30.0, 8.0));

        let leveled = level_eyes(&img, &data);
        assert_eq!(leveled.angle, 0.0);
        assert_eq!(leveled.image, src);
        let eyes = leveled.landmarks.eyes;
        assert!((eyes.x - data.eyes.x).abs() < 1e-3 && (eyes.y - data.eyes.y).abs() < 1e-3);
    }

    #[test]
    fn test_level_eyes_rotates_landmarks() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([200, 0, 0, 255])));
        let data = data_with_alignment(Point::new(30.0, 40.0), Point::new(70.0, 50.0));

        let leveled = level_eyes(&img, &data);
        let a = leveled.landmarks.alignment;
        assert!(leveled.angle > 0.0);
        assert!((a.left.y - a.right.y).abs() < 1e-3, "eyes not level: {a:?}");
        // Center stays opaque; a corner is rotated out of frame.
        assert_eq!(leveled.image.get_pixel(50, 50)[3], 255);
        assert!(leveled.image.get_pixel(0, 0)[3] < 255);
    }

    #[test]
    fn test_rotate_identity_preserves_pixels() {
        let mut src = RgbaImage::new(8, 8);
        src.put_pixel(2, 5, Rgba([1, 2, 3, 255]));
        let out = rotate_about_center(&src, 0.0);
        assert_eq!(out, src);
    }

    #[test]
    fn test_luma_key_clears_backdrop() {
        let mut src = RgbaImage::from_pixel(20, 20, Rgba([240, 240, 240, 255]));
        for y in 6..14 {
            for x in 6..14 {
                src.put_pixel(x, y, Rgba([120, 80, 60, 255]));
            }
        }
        let out = LumaKeyRemover::default().key_out(&DynamicImage::ImageRgba8(src));
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(10, 10)[3], 255);
    }

    #[test]
    fn test_progress_text() {
        assert_eq!(EditKind::CensorEyes.progress_text(2, 3), "Censoring eyes (2/3)...");
    }
}
