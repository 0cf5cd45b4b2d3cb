//! Feature-relative zoom: the scale and translation that center a facial
//! feature in a slot viewport.

use crate::layout::{Framing, Layout, ObjectFit};
use crate::types::{LandmarkState, Point, ZoomTarget};
use serde::{Deserialize, Serialize};

/// Feature sizes below this (percent) are treated as this.
pub const MIN_FEATURE_SIZE: f32 = 1.0;
pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 20.0;
/// Minimum extent of an anchored image, as a multiple of the slot size.
pub const ANCHORED_MIN_EXTENT: f32 = 1.5;

/// Axis along which an anchored image is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomAxis {
    Width,
    Height,
}

/// How the image sits in its slot before rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Placement {
    /// The image box fills the slot; content follows `object-fit`/`object-position`.
    Framed(Framing),
    /// The image is sized along `axis` to `zoom` times the slot and shifted
    /// so that `origin` (percent of the image) lands on the slot center.
    Anchored {
        axis: ZoomAxis,
        zoom: f32,
        origin: Point,
    },
}

/// Per-slot render transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderTransform {
    pub placement: Placement,
    /// Coarse + fine rotation, degrees, about the slot center.
    pub rotation_deg: f32,
}

/// Fraction of the slot a feature should fill, in percent.
pub fn target_fill(target: ZoomTarget) -> f32 {
    match target {
        ZoomTarget::Mouth => 50.0,
        _ => 60.0,
    }
}

/// `clamp(fill / max(size, 1), 1, 20)`, bounds inclusive.
pub fn zoom_factor(feature_size: f32, fill: f32) -> f32 {
    let size = feature_size.max(MIN_FEATURE_SIZE);
    (fill / size).clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Compute the render transform for one slot.
///
/// Feature targets without resolved landmarks fall back to plain `cover`
/// framing; no zoom math is attempted.
pub fn compute_transform(
    layout: Layout,
    slot: usize,
    target: ZoomTarget,
    landmarks: Option<&LandmarkState>,
    rotation_deg: f32,
) -> RenderTransform {
    let feature = landmarks
        .and_then(LandmarkState::data)
        .and_then(|data| data.feature(target));

    let placement = match (target, feature) {
        (ZoomTarget::Whole, _) => Placement::Framed(layout.default_framing(slot)),
        (_, None) => Placement::Framed(Framing::COVER),
        (target, Some(feature)) => {
            // The nose reads by its height in a portrait crop; everything
            // else by its width.
            let (axis, size) = if target == ZoomTarget::Nose {
                (ZoomAxis::Height, feature.height)
            } else {
                (ZoomAxis::Width, feature.width)
            };
            Placement::Anchored {
                axis,
                zoom: zoom_factor(size, target_fill(target)),
                origin: feature.center(),
            }
        }
    };

    RenderTransform { placement, rotation_deg }
}

/// A transform resolved against concrete slot and image sizes.
///
/// Maps slot-space points to image pixels: the image is drawn at `scale`
/// with its top-left at `origin`, then rotated about `pivot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotPlacement {
    pub scale: f32,
    pub origin: Point,
    pub pivot: Point,
    pub rotation_rad: f32,
}

impl SlotPlacement {
    /// Inverse mapping: slot pixel → source image pixel.
    pub fn to_image(&self, s: Point) -> Point {
        let (sin, cos) = (-self.rotation_rad).sin_cos();
        let dx = s.x - self.pivot.x;
        let dy = s.y - self.pivot.y;
        let ux = self.pivot.x + dx * cos - dy * sin - self.origin.x;
        let uy = self.pivot.y + dx * sin + dy * cos - self.origin.y;
        Point::new(ux / self.scale, uy / self.scale)
    }
}

impl RenderTransform {
    /// Resolve against a slot of `slot_w`×`slot_h` pixels and an image of
    /// `img_w`×`img_h` pixels.
    pub fn resolve(&self, slot_w: f32, slot_h: f32, img_w: u32, img_h: u32) -> SlotPlacement {
        let iw = img_w.max(1) as f32;
        let ih = img_h.max(1) as f32;
        let pivot = Point::new(slot_w / 2.0, slot_h / 2.0);

        let (scale, origin) = match self.placement {
            Placement::Framed(framing) => {
                let sx = slot_w / iw;
                let sy = slot_h / ih;
                let scale = match framing.fit {
                    ObjectFit::Contain => sx.min(sy),
                    ObjectFit::Cover => sx.max(sy),
                };
                let free_w = slot_w - iw * scale;
                let free_h = slot_h - ih * scale;
                let origin = Point::new(
                    free_w * framing.position.horizontal.fraction(),
                    free_h * framing.position.vertical.fraction(),
                );
                (scale, origin)
            }
            Placement::Anchored { axis, zoom, origin } => {
                let sized = match axis {
                    ZoomAxis::Width => zoom * slot_w / iw,
                    ZoomAxis::Height => zoom * slot_h / ih,
                };
                let min_scale = (ANCHORED_MIN_EXTENT * slot_w / iw)
                    .max(ANCHORED_MIN_EXTENT * slot_h / ih);
                let scale = sized.max(min_scale);
                let feature = Point::new(origin.x / 100.0 * iw * scale, origin.y / 100.0 * ih * scale);
                (scale, Point::new(pivot.x - feature.x, pivot.y - feature.y))
            }
        };

        SlotPlacement {
            scale,
            origin,
            pivot,
            rotation_rad: self.rotation_deg.to_radians(),
        }
    }

    /// Equivalent CSS declarations for callers painting with a browser engine.
    pub fn css(&self) -> String {
        match self.placement {
            Placement::Framed(framing) => {
                let fit = match framing.fit {
                    ObjectFit::Contain => "contain",
                    ObjectFit::Cover => "cover",
                };
                format!(
                    "width: 100%; height: 100%; object-fit: {fit}; object-position: {}; transform: rotate({}deg)",
                    framing.position.css(),
                    self.rotation_deg
                )
            }
            Placement::Anchored { axis, zoom, origin } => {
                let size = zoom * 100.0;
                let dims = match axis {
                    ZoomAxis::Width => format!("width: {size}%; height: auto"),
                    ZoomAxis::Height => format!("height: {size}%; width: auto"),
                };
                let min = ANCHORED_MIN_EXTENT * 100.0;
                format!(
                    "position: absolute; left: 50%; top: 50%; min-width: {min}%; min-height: {min}%; {dims}; transform: translate(-{}%, -{}%) rotate({}deg)",
                    origin.x, origin.y, self.rotation_deg
                )
            }
        }
    }
}
