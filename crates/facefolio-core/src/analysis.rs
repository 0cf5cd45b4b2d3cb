//! Facial proportion analysis from a 68-point landmark shape (iBUG ordering).
//!
//! Vertical thirds, horizontal fifths and two feature ratios, plus an overlay
//! that draws the guide lines onto the photo.

use crate::text::draw_label;
use crate::types::Point;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SHAPE_POINTS: usize = 68;

const THIRDS_COLOR: Rgba<u8> = Rgba([0, 188, 212, 204]);
const FIFTHS_COLOR: Rgba<u8> = Rgba([255, 193, 7, 204]);
const LABEL_COLOR: Rgba<u8> = Rgba([0, 0, 0, 153]);
const LABEL_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_TEXT_SIZE: f32 = 12.0;
const LINE_WIDTH: u32 = 2;
const DASH: u32 = 5;

#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    #[error("expected {SHAPE_POINTS} landmarks, got {0}")]
    TooFewPoints(usize),
    #[error("degenerate landmarks: {0} is zero")]
    Degenerate(&'static str),
}

/// One vertical section of the face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub label: String,
    pub height: f32,
}

/// Horizontal guide lines, top to bottom, in image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thirds {
    /// Estimated hairline: the 68-point model has no forehead points.
    pub trichion: f32,
    pub glabella: f32,
    pub subnasale: f32,
    pub menton: f32,
    pub total_height: f32,
    pub sections: [Section; 3],
}

impl Thirds {
    pub fn lines(&self) -> [f32; 4] {
        [self.trichion, self.glabella, self.subnasale, self.menton]
    }
}

/// Vertical guide lines, left to right: face edge, eye corners, face edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fifths {
    pub lines: [f32; 6],
}

impl Fifths {
    pub fn widths(&self) -> [f32; 5] {
        std::array::from_fn(|i| self.lines[i + 1] - self.lines[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ratios {
    /// Mouth width over interpupillary distance.
    pub mouth_to_eye: f32,
    /// Left eye width over nose width.
    pub eye_to_nose: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacialAnalysis {
    pub thirds: Thirds,
    pub fifths: Fifths,
    pub ratios: Ratios,
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

fn ratio(num: f32, den: f32, name: &'static str) -> Result<f32, AnalysisError> {
    if den.abs() < f32::EPSILON {
        return Err(AnalysisError::Degenerate(name));
    }
    Ok(round2(num / den))
}

/// Measure proportions from a 68-point shape in image pixels.
pub fn analyze(points: &[Point]) -> Result<FacialAnalysis, AnalysisError> {
    if points.len() < SHAPE_POINTS {
        return Err(AnalysisError::TooFewPoints(points.len()));
    }
    let p = points;

    let glabella = (p[21].y + p[22].y) / 2.0;
    let subnasale = p[33].y;
    let menton = p[8].y;
    let trichion = glabella - (menton - glabella) / 2.0;

    let thirds = Thirds {
        trichion,
        glabella,
        subnasale,
        menton,
        total_height: menton - trichion,
        sections: [
            Section { label: "Upper third".into(), height: glabella - trichion },
            Section { label: "Middle third".into(), height: subnasale - glabella },
            Section { label: "Lower third".into(), height: menton - subnasale },
        ],
    };

    let fifths = Fifths {
        lines: [p[0].x, p[36].x, p[39].x, p[42].x, p[45].x, p[16].x],
    };

    let mouth_width = p[54].x - p[48].x;
    let interpupillary = (p[42].x + p[45].x) / 2.0 - (p[36].x + p[39].x) / 2.0;
    let nose_width = p[35].x - p[31].x;
    let eye_width = p[39].x - p[36].x;

    let ratios = Ratios {
        mouth_to_eye: ratio(mouth_width, interpupillary, "interpupillary distance")?,
        eye_to_nose: ratio(eye_width, nose_width, "nose width")?,
    };

    Ok(FacialAnalysis { thirds, fifths, ratios })
}

fn blend(dst: &mut Rgba<u8>, color: Rgba<u8>) {
    let a = f32::from(color[3]) / 255.0;
    for c in 0..3 {
        dst[c] = (f32::from(color[c]) * a + f32::from(dst[c]) * (1.0 - a)).round() as u8;
    }
    dst[3] = dst[3].max(color[3]);
}

fn dashed_hline(img: &mut RgbaImage, y: f32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let top = y.round() as i64 - i64::from(LINE_WIDTH / 2);
    for row in top..top + i64::from(LINE_WIDTH) {
        if row < 0 || row >= i64::from(h) {
            continue;
        }
        for x in (0..w).filter(|x| (x / DASH) % 2 == 0) {
            blend(img.get_pixel_mut(x, row as u32), color);
        }
    }
}

fn dashed_vline(img: &mut RgbaImage, x: f32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let left = x.round() as i64 - i64::from(LINE_WIDTH / 2);
    for col in left..left + i64::from(LINE_WIDTH) {
        if col < 0 || col >= i64::from(w) {
            continue;
        }
        for y in (0..h).filter(|y| (y / DASH) % 2 == 0) {
            blend(img.get_pixel_mut(col as u32, y), color);
        }
    }
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: f32, width: u32, height: u32, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let y0 = y.round().max(0.0) as u32;
    for py in y0..(y0 + height).min(h) {
        for px in x..(x + width).min(w) {
            blend(img.get_pixel_mut(px, py), color);
        }
    }
}

/// Draw dashed cyan third lines, dashed amber fifth lines and a labelled
/// tab under the top edge of each third.
pub fn draw_overlay(image: &DynamicImage, analysis: &FacialAnalysis) -> RgbaImage {
    let mut out = image.to_rgba8();

    for y in analysis.thirds.lines() {
        dashed_hline(&mut out, y, THIRDS_COLOR);
    }
    for x in analysis.fifths.lines {
        dashed_vline(&mut out, x, FIFTHS_COLOR);
    }

    let [top, middle, lower, _] = analysis.thirds.lines();
    for (y, section) in [top, middle, lower].into_iter().zip(&analysis.thirds.sections) {
        fill_rect(&mut out, 5, y + 5.0, 100, 20, LABEL_COLOR);
        draw_label(
            &mut out,
            &section.label,
            10,
            (y + 9.0).round() as i32,
            LABEL_TEXT_SIZE,
            LABEL_TEXT,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A symmetric synthetic face on a 400x400 image.
    fn shape() -> Vec<Point> {
        let mut p = vec![Point::new(200.0, 200.0); SHAPE_POINTS];
        p[0] = Point::new(100.0, 180.0);
        p[16] = Point::new(300.0, 180.0);
        p[8] = Point::new(200.0, 340.0);
        p[21] = Point::new(185.0, 150.0);
        p[22] = Point::new(215.0, 150.0);
        p[33] = Point::new(200.0, 240.0);
        p[31] = Point::new(185.0, 235.0);
        p[35] = Point::new(215.0, 235.0);
        p[36] = Point::new(140.0, 170.0);
        p[39] = Point::new(180.0, 170.0);
        p[42] = Point::new(220.0, 170.0);
        p[45] = Point::new(260.0, 170.0);
        p[48] = Point::new(170.0, 290.0);
        p[54] = Point::new(230.0, 290.0);
        p
    }

    #[test]
    fn test_thirds() {
        let a = analyze(&shape()).unwrap();
        let t = &a.thirds;
        assert_eq!(t.glabella, 150.0);
        assert_eq!(t.subnasale, 240.0);
        assert_eq!(t.menton, 340.0);
        // 150 - (340 - 150) / 2
        assert!((t.trichion - 55.0).abs() < 1e-4, "trichion = {}", t.trichion);
        assert!((t.total_height - 285.0).abs() < 1e-4);
        let heights: Vec<f32> = t.sections.iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![95.0, 90.0, 100.0]);
    }

    #[test]
    fn test_fifths() {
        let a = analyze(&shape()).unwrap();
        assert_eq!(a.fifths.lines, [100.0, 140.0, 180.0, 220.0, 260.0, 300.0]);
        assert_eq!(a.fifths.widths(), [40.0; 5]);
    }

    #[test]
    fn test_ratios_rounded() {
        let a = analyze(&shape()).unwrap();
        // Mouth 60 over interpupillary 80.
        assert_eq!(a.ratios.mouth_to_eye, 0.75);
        // Eye 40 over nose 30 = 1.333…
        assert_eq!(a.ratios.eye_to_nose, 1.33);
    }

    #[test]
    fn test_too_few_points() {
        let err = analyze(&shape()[..67]).unwrap_err();
        assert_eq!(err, AnalysisError::TooFewPoints(67));
    }

    #[test]
    fn test_degenerate_nose() {
        let mut p = shape();
        p[35] = p[31];
        assert_eq!(analyze(&p).unwrap_err(), AnalysisError::Degenerate("nose width"));
    }

    #[test]
    fn test_overlay_draws_dashes() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 400, Rgba([255, 255, 255, 255])));
        let a = analyze(&shape()).unwrap();
        let out = draw_overlay(&img, &a);

        // Dash on at x 0..5 along the subnasale line, off at 5..10.
        assert_ne!(out.get_pixel(300, 240), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(306, 240), &Rgba([255, 255, 255, 255]));
        // Amber fifth at x = 300.
        let px = out.get_pixel(300, 2);
        assert!(px[2] < 100, "expected amber, got {px:?}");
    }

    #[test]
    fn test_overlay_tabs_carry_section_names() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 400, Rgba([0, 0, 0, 255])));
        let a = analyze(&shape()).unwrap();
        let out = draw_overlay(&img, &a);

        // Upper third tab spans y 60..80 below the estimated hairline at 55.
        // Stay left of the amber fifth at x = 100.
        let lit = (60..80)
            .flat_map(|y| (10..95).map(move |x| (x, y)))
            .filter(|&(x, y)| out.get_pixel(x, y)[2] > 128)
            .count();
        assert!(lit > 20, "tab has no text ({lit} lit pixels)");
    }
}
