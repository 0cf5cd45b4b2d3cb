//! Collage description files.
//!
//! ```toml
//! layout = "four-grid"
//! zoom = "face"
//! border = true
//! labels = "date"
//! edits = ["level-eyes", "remove-background"]
//!
//! [[photos]]
//! id = "p1"
//! url = "before.jpg"
//! date = "2024-03-01"
//!
//! [[slots]]
//! slot = 0
//! image = "before.jpg"
//! zoom = "eyes"
//! quarter_turns = 1
//! fine_rotation = -4.5
//! ```

use facefolio_core::{EditKind, LabelMode, Layout, PhotoRecord, ZoomTarget};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Collage {
    pub layout: Layout,
    #[serde(default)]
    pub zoom: ZoomTarget,
    #[serde(default)]
    pub border: bool,
    #[serde(default)]
    pub labels: LabelMode,
    /// Show originals instead of edited images when labels are before-after.
    #[serde(default)]
    pub show_original: bool,
    #[serde(default)]
    pub edits: Vec<EditKind>,
    #[serde(default)]
    pub photos: Vec<PhotoRecord>,
    #[serde(default)]
    pub slots: Vec<SlotEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotEntry {
    pub slot: usize,
    /// Path relative to the collage file.
    pub image: String,
    pub zoom: Option<ZoomTarget>,
    #[serde(default)]
    pub quarter_turns: u8,
    #[serde(default)]
    pub fine_rotation: f32,
}

impl Collage {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }
}
