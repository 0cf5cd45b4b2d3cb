//! Collage layout templates: slot counts, default framing and slot geometry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Slot count used for an unrecognised layout id.
pub const DEFAULT_SLOT_COUNT: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown layout: {0}")]
pub struct UnknownLayout(pub String);

/// A fixed collage template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Layout {
    #[default]
    TwoCol,
    TwoRow,
    ThreeCol,
    ThreeRow,
    /// One tall slot on the right, two stacked on the left.
    ThreeMixedA,
    /// One tall slot on the left, two stacked on the right.
    ThreeMixedB,
    /// One wide slot on top, two side by side below.
    ThreeMixedC,
    FourGrid,
    /// One frame split down the middle; both halves read as one image.
    TwoSplitV,
    /// One frame split across the middle.
    TwoSplitH,
}

/// CSS-style `object-fit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFit {
    Contain,
    Cover,
}

/// Edge the image is anchored to inside its slot, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Start,
    Center,
    End,
}

impl Anchor {
    /// Fraction of the free space placed before the image.
    pub fn fraction(self) -> f32 {
        match self {
            Anchor::Start => 0.0,
            Anchor::Center => 0.5,
            Anchor::End => 1.0,
        }
    }
}

/// CSS-style `object-position`, horizontal then vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPosition {
    pub horizontal: Anchor,
    pub vertical: Anchor,
}

impl ObjectPosition {
    pub const CENTER: Self = Self {
        horizontal: Anchor::Center,
        vertical: Anchor::Center,
    };

    pub fn css(&self) -> String {
        let h = match self.horizontal {
            Anchor::Start => "left",
            Anchor::Center => "center",
            Anchor::End => "right",
        };
        let v = match self.vertical {
            Anchor::Start => "top",
            Anchor::Center => "center",
            Anchor::End => "bottom",
        };
        format!("{h} {v}")
    }
}

/// Default fit/position for a slot when no feature zoom applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framing {
    pub fit: ObjectFit,
    pub position: ObjectPosition,
}

impl Framing {
    pub const CONTAIN: Self = Self {
        fit: ObjectFit::Contain,
        position: ObjectPosition::CENTER,
    };

    pub const COVER: Self = Self {
        fit: ObjectFit::Cover,
        position: ObjectPosition::CENTER,
    };
}

/// A slot's rectangle as fractions (0–1) of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SlotRect {
    const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

const THIRD: f32 = 1.0 / 3.0;

impl Layout {
    pub const ALL: [Layout; 10] = [
        Layout::TwoCol,
        Layout::TwoRow,
        Layout::ThreeCol,
        Layout::ThreeRow,
        Layout::ThreeMixedA,
        Layout::ThreeMixedB,
        Layout::ThreeMixedC,
        Layout::FourGrid,
        Layout::TwoSplitV,
        Layout::TwoSplitH,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Layout::TwoCol => "two-col",
            Layout::TwoRow => "two-row",
            Layout::ThreeCol => "three-col",
            Layout::ThreeRow => "three-row",
            Layout::ThreeMixedA => "three-mixed-a",
            Layout::ThreeMixedB => "three-mixed-b",
            Layout::ThreeMixedC => "three-mixed-c",
            Layout::FourGrid => "four-grid",
            Layout::TwoSplitV => "two-split-v",
            Layout::TwoSplitH => "two-split-h",
        }
    }

    /// Alternate spellings accepted by [`FromStr`].
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Layout::TwoCol => &["two-cols", "2-cols"],
            Layout::TwoRow => &["two-rows", "2-rows"],
            Layout::ThreeCol => &["three-cols", "3-cols"],
            Layout::ThreeRow => &["three-rows", "3-rows"],
            Layout::ThreeMixedA => &["1-right-2-left"],
            Layout::ThreeMixedB => &["1-left-2-right"],
            Layout::ThreeMixedC => &["1-top-2-bottom"],
            Layout::FourGrid => &["4-mix", "four-mix"],
            Layout::TwoSplitV => &["1-vertical-split"],
            Layout::TwoSplitH => &["1-horizontal-split"],
        }
    }

    /// Number of slots; fixed per layout.
    pub fn slot_count(self) -> usize {
        match self {
            Layout::TwoCol | Layout::TwoRow | Layout::TwoSplitV | Layout::TwoSplitH => 2,
            Layout::ThreeCol
            | Layout::ThreeRow
            | Layout::ThreeMixedA
            | Layout::ThreeMixedB
            | Layout::ThreeMixedC => 3,
            Layout::FourGrid => 4,
        }
    }

    /// Framing for a slot when the zoom target is `whole`.
    ///
    /// Only the split layouts differ from `contain`/center: each half covers
    /// its slot, anchored to its outer edge.
    pub fn default_framing(self, slot: usize) -> Framing {
        let outer = if slot == 0 { Anchor::Start } else { Anchor::End };
        match self {
            Layout::TwoSplitV => Framing {
                fit: ObjectFit::Cover,
                position: ObjectPosition { horizontal: outer, vertical: Anchor::Center },
            },
            Layout::TwoSplitH => Framing {
                fit: ObjectFit::Cover,
                position: ObjectPosition { horizontal: Anchor::Center, vertical: outer },
            },
            _ => Framing::CONTAIN,
        }
    }

    /// Slot rectangles as canvas fractions, indexed by slot.
    pub fn slot_rects(self) -> Vec<SlotRect> {
        match self {
            Layout::TwoCol | Layout::TwoSplitV => vec![
                SlotRect::new(0.0, 0.0, 0.5, 1.0),
                SlotRect::new(0.5, 0.0, 0.5, 1.0),
            ],
            Layout::TwoRow | Layout::TwoSplitH => vec![
                SlotRect::new(0.0, 0.0, 1.0, 0.5),
                SlotRect::new(0.0, 0.5, 1.0, 0.5),
            ],
            Layout::ThreeCol => (0..3)
                .map(|i| SlotRect::new(i as f32 * THIRD, 0.0, THIRD, 1.0))
                .collect(),
            Layout::ThreeRow => (0..3)
                .map(|i| SlotRect::new(0.0, i as f32 * THIRD, 1.0, THIRD))
                .collect(),
            Layout::ThreeMixedA => vec![
                SlotRect::new(0.5, 0.0, 0.5, 1.0),
                SlotRect::new(0.0, 0.0, 0.5, 0.5),
                SlotRect::new(0.0, 0.5, 0.5, 0.5),
            ],
            Layout::ThreeMixedB => vec![
                SlotRect::new(0.0, 0.0, 0.5, 1.0),
                SlotRect::new(0.5, 0.0, 0.5, 0.5),
                SlotRect::new(0.5, 0.5, 0.5, 0.5),
            ],
            Layout::ThreeMixedC => vec![
                SlotRect::new(0.0, 0.0, 1.0, 0.5),
                SlotRect::new(0.0, 0.5, 0.5, 0.5),
                SlotRect::new(0.5, 0.5, 0.5, 0.5),
            ],
            Layout::FourGrid => vec![
                SlotRect::new(0.0, 0.0, 0.5, 0.5),
                SlotRect::new(0.5, 0.0, 0.5, 0.5),
                SlotRect::new(0.0, 0.5, 0.5, 0.5),
                SlotRect::new(0.5, 0.5, 0.5, 0.5),
            ],
        }
    }
}

/// Slot count for a raw layout id; unknown ids get [`DEFAULT_SLOT_COUNT`].
pub fn slot_count_for(id: &str) -> usize {
    id.parse::<Layout>()
        .map(Layout::slot_count)
        .unwrap_or(DEFAULT_SLOT_COUNT)
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Layout {
    type Err = UnknownLayout;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Layout::ALL
            .into_iter()
            .find(|l| l.id() == needle || l.aliases().contains(&needle.as_str()))
            .ok_or_else(|| UnknownLayout(s.to_string()))
    }
}

impl TryFrom<String> for Layout {
    type Error = UnknownLayout;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Layout> for String {
    fn from(layout: Layout) -> Self {
        layout.id().to_string()
    }
}
