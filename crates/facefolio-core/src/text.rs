//! Label text for overlays, set in the bundled DejaVu Sans.

use ab_glyph::{FontRef, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

static FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

fn font() -> Option<FontRef<'static>> {
    match FontRef::try_from_slice(FONT_BYTES) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "label font failed to load; drawing without text");
            None
        }
    }
}

/// Width and height of `text` set at `height` pixels.
pub(crate) fn label_size(text: &str, height: f32) -> (u32, u32) {
    match font() {
        Some(font) if !text.is_empty() => text_size(PxScale::from(height), &font, text),
        _ => (0, 0),
    }
}

/// Draw `text` with its top-left corner at `(x, y)`.
pub(crate) fn draw_label(
    canvas: &mut RgbaImage,
    text: &str,
    x: i32,
    y: i32,
    height: f32,
    color: Rgba<u8>,
) {
    if text.is_empty() || height <= 0.0 {
        return;
    }
    if let Some(font) = font() {
        draw_text_mut(canvas, color, x, y, PxScale::from(height), &font, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_size_grows_with_text() {
        let (short, h) = label_size("Or", 12.0);
        let (long, _) = label_size("Original", 12.0);
        assert!(short > 0 && h > 0);
        assert!(long > short, "{long} <= {short}");
        assert_eq!(label_size("", 12.0), (0, 0));
    }

    #[test]
    fn test_draw_label_marks_pixels() {
        let mut canvas = RgbaImage::from_pixel(80, 24, Rgba([0, 0, 0, 255]));
        draw_label(&mut canvas, "Upper third", 2, 4, 12.0, Rgba([255, 255, 255, 255]));
        let lit = canvas.pixels().filter(|p| p[0] > 128).count();
        assert!(lit > 10, "only {lit} glyph pixels");
        // Nothing to the left of the pen.
        assert!((0..24).all(|y| canvas.get_pixel(0, y)[0] == 0));
    }
}
