//! facefolio-core — Collage composition engine for clinical face photos.
//!
//! Places photos into fixed layouts, zooms each slot onto a facial feature
//! using detected landmarks, applies destructive edits (background removal,
//! eye censoring, eye leveling) and flattens the result into one image.

pub mod analysis;
pub mod detection;
pub mod edit;
pub mod landmarks;
pub mod layout;
pub mod photos;
pub mod render;
pub mod session;
mod text;
pub mod types;
pub mod zoom;

pub use detection::{DetectionCache, DetectorError, FaceDetector};
pub use edit::{BackgroundRemover, BatchReport, EditError, EditKind, LumaKeyRemover};
pub use landmarks::FacePoints;
pub use layout::{slot_count_for, Layout};
pub use photos::{PhotoLibrary, PhotoRecord};
pub use render::{
    CompositionPlan, FinalizeError, ImageRasterizer, Rasterizer, RenderError, RenderOptions,
};
pub use session::{AiStatus, Capabilities, CollageSession, LabelMode, SessionError, Status};
pub use types::{ImageRef, LandmarkData, LandmarkState, PercentBox, Point, ZoomTarget};
pub use zoom::{compute_transform, zoom_factor, RenderTransform};
