//! Composition renderer.
//!
//! The session describes the finished collage as a [`CompositionPlan`]; a
//! [`Rasterizer`] flattens it into encoded image bytes. [`ImageRasterizer`]
//! is the built-in implementation on top of the `image` crate.

use crate::edit::sample_bilinear;
use crate::layout::SlotRect;
use crate::text::{draw_label, label_size};
use crate::types::{ImageRef, Point};
use crate::zoom::RenderTransform;
use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_BAR_FRACTION: f32 = 0.08;
const LABEL_MIN_HEIGHT: f32 = 6.0;
const LABEL_TEXT_FRACTION: f32 = 0.75;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("composition root not found: plan has no slots or a zero-sized canvas")]
    MissingRoot,
    #[error("canvas {width}x{height} at scale {scale} is too large")]
    CanvasTooLarge { width: u32, height: u32, scale: u32 },
    #[error("encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("render worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Why a finalize attempt was refused.
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("fill every slot before saving (empty: {missing:?})")]
    Validation { missing: Vec<usize> },
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Output settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Supersampling factor applied to the canvas size.
    pub scale: u32,
    pub transparent_background: bool,
    /// Frame and gutter width in canvas pixels, used when the plan has a border.
    pub border_px: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            canvas_width: 800,
            canvas_height: 800,
            scale: 2,
            transparent_background: true,
            border_px: 8,
        }
    }
}

/// Badge painted over a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Overlay {
    /// Before/after indicator; `original` while the original is shown.
    Comparison { original: bool },
    Date(String),
}

impl Overlay {
    pub fn label(&self) -> &str {
        match self {
            Overlay::Comparison { original: true } => "Original",
            Overlay::Comparison { original: false } => "Current",
            Overlay::Date(date) => date,
        }
    }

    fn color(&self) -> Rgba<u8> {
        match self {
            Overlay::Comparison { original: true } => Rgba([245, 158, 11, 200]),
            Overlay::Comparison { original: false } => Rgba([16, 185, 129, 200]),
            Overlay::Date(_) => Rgba([0, 0, 0, 150]),
        }
    }
}

/// One filled slot of the composition.
#[derive(Debug, Clone)]
pub struct SlotLayer {
    pub slot: usize,
    pub rect: SlotRect,
    /// Image shown in the slot right now (original during a before/after flip).
    pub image: ImageRef,
    pub transform: RenderTransform,
    pub overlay: Option<Overlay>,
}

/// Everything a rasterizer needs to draw the collage.
#[derive(Debug, Clone)]
pub struct CompositionPlan {
    pub width: u32,
    pub height: u32,
    pub border: bool,
    pub layers: Vec<SlotLayer>,
}

impl CompositionPlan {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() || self.width == 0 || self.height == 0
    }
}

/// External rasterizer.
pub trait Rasterizer: Send + Sync {
    fn render<'a>(
        &'a self,
        plan: &'a CompositionPlan,
        options: RenderOptions,
    ) -> BoxFuture<'a, Result<Vec<u8>, RenderError>>;
}

/// Pixel bounds of a slot on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SlotBounds {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

fn slot_bounds(rect: &SlotRect, canvas_w: f32, canvas_h: f32, gutter: f32) -> SlotBounds {
    // Outer frame is half a gutter; each slot is inset by another half.
    let half = gutter / 2.0;
    let inner_w = canvas_w - gutter;
    let inner_h = canvas_h - gutter;
    SlotBounds {
        x: half + rect.x * inner_w + half,
        y: half + rect.y * inner_h + half,
        width: (rect.width * inner_w - gutter).max(0.0),
        height: (rect.height * inner_h - gutter).max(0.0),
    }
}

/// Source-over compositing of `fg` onto `bg`.
fn blend_over(bg: Rgba<u8>, fg: Rgba<u8>) -> Rgba<u8> {
    let fa = f32::from(fg[3]) / 255.0;
    if fa >= 1.0 {
        return fg;
    }
    if fa <= 0.0 {
        return bg;
    }
    let ba = f32::from(bg[3]) / 255.0;
    let out_a = fa + ba * (1.0 - fa);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (f32::from(fg[c]) * fa + f32::from(bg[c]) * ba * (1.0 - fa)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}

fn draw_layer(canvas: &mut RgbaImage, layer: &SlotLayer, bounds: SlotBounds) {
    let src = layer.image.image().to_rgba8();
    let placement = layer
        .transform
        .resolve(bounds.width, bounds.height, src.width(), src.height());

    let iw = src.width() as f32;
    let ih = src.height() as f32;
    let (cw, ch) = canvas.dimensions();
    let x0 = bounds.x.round().max(0.0) as u32;
    let y0 = bounds.y.round().max(0.0) as u32;
    let x1 = ((bounds.x + bounds.width).round() as u32).min(cw);
    let y1 = ((bounds.y + bounds.height).round() as u32).min(ch);

    for py in y0..y1 {
        for px in x0..x1 {
            let local = Point::new(px as f32 + 0.5 - bounds.x, py as f32 + 0.5 - bounds.y);
            let p = placement.to_image(local);
            if p.x < 0.0 || p.y < 0.0 || p.x > iw || p.y > ih {
                continue;
            }
            // Clamp to edge texels so image borders stay crisp.
            let sx = (p.x - 0.5).clamp(0.0, iw - 1.0);
            let sy = (p.y - 0.5).clamp(0.0, ih - 1.0);
            let texel = sample_bilinear(&src, sx, sy);
            if texel[3] == 0 {
                continue;
            }
            let bg = *canvas.get_pixel(px, py);
            canvas.put_pixel(px, py, blend_over(bg, texel));
        }
    }

    if let Some(overlay) = &layer.overlay {
        draw_label_bar(canvas, overlay, bounds);
    }
}

/// Translucent badge along the bottom-left of the slot with the label in
/// white, sized to the text.
fn draw_label_bar(canvas: &mut RgbaImage, overlay: &Overlay, bounds: SlotBounds) {
    let bar_h = (bounds.height * LABEL_BAR_FRACTION).max(LABEL_MIN_HEIGHT);
    let margin = bar_h / 2.0;
    let text_h = bar_h * LABEL_TEXT_FRACTION;
    let (text_w, _) = label_size(overlay.label(), text_h);
    let wanted = text_w as f32 + bar_h;
    let bar_w = wanted.min(bounds.width - 2.0 * margin);
    if bar_w <= 0.0 || bar_h + 2.0 * margin > bounds.height {
        return;
    }

    let left = bounds.x + margin;
    let top = bounds.y + bounds.height - margin - bar_h;
    let color = overlay.color();
    let (cw, ch) = canvas.dimensions();

    let x0 = left.round().max(0.0) as u32;
    let y0 = top.round().max(0.0) as u32;
    let x1 = ((left + bar_w).round() as u32).min(cw);
    let y1 = ((top + bar_h).round() as u32).min(ch);
    for y in y0..y1 {
        for x in x0..x1 {
            let bg = *canvas.get_pixel(x, y);
            canvas.put_pixel(x, y, blend_over(bg, color));
        }
    }

    // Text that does not fit the slot is left off rather than spilling over.
    if wanted <= bar_w {
        let text_x = (left + bar_h / 2.0).round() as i32;
        let text_y = (top + (bar_h - text_h) / 2.0).round() as i32;
        draw_label(canvas, overlay.label(), text_x, text_y, text_h, WHITE);
    }
}

/// Flatten a plan into an RGBA canvas of `plan size × scale`.
pub fn rasterize(plan: &CompositionPlan, options: &RenderOptions) -> Result<RgbaImage, RenderError> {
    if plan.is_empty() {
        return Err(RenderError::MissingRoot);
    }

    let scale = options.scale.max(1);
    let (Some(width), Some(height)) = (plan.width.checked_mul(scale), plan.height.checked_mul(scale))
    else {
        return Err(RenderError::CanvasTooLarge {
            width: plan.width,
            height: plan.height,
            scale,
        });
    };

    let background = if plan.border || !options.transparent_background {
        WHITE
    } else {
        Rgba([0, 0, 0, 0])
    };
    let mut canvas = RgbaImage::from_pixel(width, height, background);

    let gutter = if plan.border {
        options.border_px.saturating_mul(scale) as f32
    } else {
        0.0
    };

    for layer in &plan.layers {
        let bounds = slot_bounds(&layer.rect, width as f32, height as f32, gutter);
        draw_layer(&mut canvas, layer, bounds);
    }

    tracing::debug!(width, height, layers = plan.layers.len(), "composition rasterized");
    Ok(canvas)
}

pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>, RenderError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

/// Built-in rasterizer: draws on a worker thread and returns PNG bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRasterizer;

impl Rasterizer for ImageRasterizer {
    fn render<'a>(
        &'a self,
        plan: &'a CompositionPlan,
        options: RenderOptions,
    ) -> BoxFuture<'a, Result<Vec<u8>, RenderError>> {
        let plan = plan.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || encode_png(rasterize(&plan, &options)?)).await?
        })
    }
}
