use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A 2D point. Pixel or percent units depending on where it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Box in percent-of-image units (0–100). `x`, `y` is the box CENTER.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PercentBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PercentBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Convert back to a top-left pixel rect for an image of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let w = self.width / 100.0 * width as f32;
        let h = self.height / 100.0 * height as f32;
        PixelRect {
            x: self.x / 100.0 * width as f32 - w / 2.0,
            y: self.y / 100.0 * height as f32 - h / 2.0,
            width: w,
            height: h,
        }
    }
}

/// Axis-aligned rectangle in raw pixels, `x`, `y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Eye cluster centroids in raw pixel units. Only used for the tilt angle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Alignment {
    pub left: Point,
    pub right: Point,
}

/// Derived landmark geometry for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkData {
    pub face: PercentBox,
    pub eyes: PercentBox,
    pub nose: PercentBox,
    pub mouth: PercentBox,
    pub alignment: Alignment,
}

impl LandmarkData {
    /// Bounding box for a feature zoom target; `None` for [`ZoomTarget::Whole`].
    pub fn feature(&self, target: ZoomTarget) -> Option<&PercentBox> {
        match target {
            ZoomTarget::Whole => None,
            ZoomTarget::Face => Some(&self.face),
            ZoomTarget::Eyes => Some(&self.eyes),
            ZoomTarget::Nose => Some(&self.nose),
            ZoomTarget::Mouth => Some(&self.mouth),
        }
    }
}

/// Cached detection outcome for a slot's current image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "lowercase")]
pub enum LandmarkState {
    /// Nothing usable yet: never requested, in flight, or superseded.
    #[default]
    Pending,
    /// Detection ran and found no face (or failed). Permanent for the image.
    Fallback,
    Resolved(LandmarkData),
}

impl LandmarkState {
    pub fn data(&self) -> Option<&LandmarkData> {
        match self {
            Self::Resolved(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown zoom target: {0}")]
pub struct UnknownZoomTarget(pub String);

/// What a slot zooms to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomTarget {
    #[default]
    Whole,
    Face,
    Eyes,
    Nose,
    Mouth,
}

impl ZoomTarget {
    pub const ALL: [ZoomTarget; 5] = [
        ZoomTarget::Face,
        ZoomTarget::Eyes,
        ZoomTarget::Nose,
        ZoomTarget::Mouth,
        ZoomTarget::Whole,
    ];

    /// Whether this target needs landmark data.
    pub fn is_feature(self) -> bool {
        self != ZoomTarget::Whole
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ZoomTarget::Whole => "whole",
            ZoomTarget::Face => "face",
            ZoomTarget::Eyes => "eyes",
            ZoomTarget::Nose => "nose",
            ZoomTarget::Mouth => "mouth",
        }
    }
}

impl fmt::Display for ZoomTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoomTarget {
    type Err = UnknownZoomTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZoomTarget::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownZoomTarget(s.to_string()))
    }
}

/// Fine rotation slider bounds, in degrees.
pub const FINE_ROTATION_LIMIT: f32 = 45.0;

/// Per-slot rotation: coarse quarter turns plus a fine slider angle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub quarter_turns: u8,
    pub fine_deg: f32,
}

impl Rotation {
    /// Combined rotation in degrees (coarse + fine).
    pub fn degrees(&self) -> f32 {
        f32::from(self.quarter_turns % 4) * 90.0 + self.fine_deg
    }
}

/// Handle to raster image data.
///
/// Two references are the same image iff their handles are identical; pixel
/// content is never compared. Cloning is cheap.
#[derive(Clone)]
pub struct ImageRef {
    handle: Arc<str>,
    image: Arc<DynamicImage>,
}

impl ImageRef {
    pub fn new(handle: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            handle: Arc::from(handle.into()),
            image: Arc::new(image),
        }
    }

    /// Wrap an edit result under a fresh, never-seen-before `blob:` handle.
    pub fn blob(image: DynamicImage) -> Self {
        Self::new(format!("blob:{}", uuid::Uuid::new_v4()), image)
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Natural pixel dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

impl PartialEq for ImageRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for ImageRef {}

impl Hash for ImageRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        f.debug_struct("ImageRef")
            .field("handle", &self.handle)
            .field("size", &format_args!("{w}x{h}"))
            .finish()
    }
}
