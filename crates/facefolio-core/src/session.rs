//! Collage editor session.
//!
//! Owns every piece of per-slot state for one editor: image assignments,
//! rotations, zoom overrides, selection and label modes. Landmarks live in the
//! shared [`DetectionCache`]. All external work goes through the
//! [`Capabilities`] handed in at construction.

use crate::detection::{DetectionCache, FaceDetector};
use crate::edit::{censor_eyes, level_eyes, BackgroundRemover, BatchReport, EditError, EditKind};
use crate::layout::Layout;
use crate::photos::PhotoLibrary;
use crate::render::{
    CompositionPlan, FinalizeError, Overlay, Rasterizer, RenderOptions, SlotLayer,
};
use crate::types::{ImageRef, LandmarkState, Rotation, ZoomTarget, FINE_ROTATION_LIMIT};
use crate::zoom::{compute_transform, RenderTransform};
use futures::future::join_all;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("slot {slot} is out of range for layout {layout} ({count} slots)")]
    SlotOutOfRange {
        slot: usize,
        layout: Layout,
        count: usize,
    },
}

/// External services a session calls into.
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Arc<dyn FaceDetector>,
    pub background_remover: Arc<dyn BackgroundRemover>,
    pub rasterizer: Arc<dyn Rasterizer>,
}

/// Busy indicator published while long operations run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Processing(String),
}

/// Per-slot detection badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    Analyzing,
    Detected,
    NotDetected,
}

/// Which badge, if any, is drawn on every slot. The two modes exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelMode {
    #[default]
    None,
    BeforeAfter,
    Date,
}

#[derive(Debug, Clone, Default)]
pub struct SlotRecord {
    pub current: Option<ImageRef>,
    /// First image placed since the slot was last assigned; edits never touch it.
    pub original: Option<ImageRef>,
    pub rotation: Rotation,
    /// Overrides the session-wide zoom target when set.
    pub zoom: Option<ZoomTarget>,
}

impl SlotRecord {
    pub fn is_filled(&self) -> bool {
        self.current.is_some()
    }
}

pub struct CollageSession {
    layout: Layout,
    slots: Vec<SlotRecord>,
    cache: Arc<DetectionCache>,
    background_remover: Arc<dyn BackgroundRemover>,
    rasterizer: Arc<dyn Rasterizer>,
    photos: PhotoLibrary,
    options: RenderOptions,
    zoom: ZoomTarget,
    selected_slot: Option<usize>,
    pending_photo: Option<ImageRef>,
    border: bool,
    labels: LabelMode,
    showing_original: bool,
    status: watch::Sender<Status>,
}

impl CollageSession {
    pub fn new(capabilities: Capabilities, layout: Layout) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        Self {
            layout,
            slots: vec![SlotRecord::default(); layout.slot_count()],
            cache: Arc::new(DetectionCache::new(capabilities.detector)),
            background_remover: capabilities.background_remover,
            rasterizer: capabilities.rasterizer,
            photos: PhotoLibrary::default(),
            options: RenderOptions::default(),
            zoom: ZoomTarget::Whole,
            selected_slot: None,
            pending_photo: None,
            border: false,
            labels: LabelMode::None,
            showing_original: false,
            status,
        }
    }

    pub fn with_photos(mut self, photos: PhotoLibrary) -> Self {
        self.photos = photos;
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    // --- accessors ---

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, slot: usize) -> Option<&SlotRecord> {
        self.slots.get(slot)
    }

    pub fn slots(&self) -> &[SlotRecord] {
        &self.slots
    }

    pub fn cache(&self) -> &Arc<DetectionCache> {
        &self.cache
    }

    pub fn photos(&self) -> &PhotoLibrary {
        &self.photos
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn zoom(&self) -> ZoomTarget {
        self.zoom
    }

    pub fn selected_slot(&self) -> Option<usize> {
        self.selected_slot
    }

    pub fn pending_photo(&self) -> Option<&ImageRef> {
        self.pending_photo.as_ref()
    }

    pub fn border(&self) -> bool {
        self.border
    }

    pub fn label_mode(&self) -> LabelMode {
        self.labels
    }

    pub fn showing_original(&self) -> bool {
        self.showing_original
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    fn set_status(&self, status: Status) {
        self.status.send_replace(status);
    }

    fn check_slot(&self, slot: usize) -> Result<(), SessionError> {
        if slot < self.slots.len() {
            Ok(())
        } else {
            Err(SessionError::SlotOutOfRange {
                slot,
                layout: self.layout,
                count: self.slots.len(),
            })
        }
    }

    // --- layout and placement ---

    /// Switch layouts. Slots beyond the new count are dropped along with
    /// their cached landmarks.
    pub fn set_layout(&mut self, layout: Layout) {
        let count = layout.slot_count();
        for slot in count..self.slots.len() {
            self.cache.forget(slot);
        }
        self.slots.resize_with(count, SlotRecord::default);
        if self.selected_slot.is_some_and(|s| s >= count) {
            self.selected_slot = None;
        }
        tracing::info!(layout = %layout, slots = count, "layout changed");
        self.layout = layout;
    }

    /// Place `image` in `slot` as both current and original. Rotations reset
    /// and the slot's landmarks are invalidated.
    pub fn assign(&mut self, slot: usize, image: ImageRef) -> Result<(), SessionError> {
        self.check_slot(slot)?;
        self.cache.invalidate(slot);
        tracing::info!(slot, handle = image.handle(), "image assigned");
        let record = &mut self.slots[slot];
        record.current = Some(image.clone());
        record.original = Some(image);
        record.rotation = Rotation::default();
        Ok(())
    }

    /// Pick a photo for tap-to-place. Picking the same photo again clears it.
    pub fn select_photo(&mut self, image: ImageRef) {
        if self.pending_photo.as_ref() == Some(&image) {
            self.pending_photo = None;
        } else {
            self.pending_photo = Some(image);
            self.selected_slot = None;
        }
    }

    /// Place the pending photo in `slot`, or select the slot when no photo
    /// is pending.
    pub fn tap_slot(&mut self, slot: usize) -> Result<(), SessionError> {
        self.check_slot(slot)?;
        match self.pending_photo.take() {
            Some(image) => self.assign(slot, image),
            None => {
                self.selected_slot = Some(slot);
                Ok(())
            }
        }
    }

    pub fn select_slot(&mut self, slot: usize) -> Result<(), SessionError> {
        self.check_slot(slot)?;
        self.selected_slot = Some(slot);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected_slot = None;
    }

    // --- detection ---

    /// Run detection for every filled slot whose current image has not been
    /// scanned yet. Slots are detected concurrently. Returns how many scans
    /// were started.
    pub async fn reconcile(&self) -> usize {
        if !self.cache.is_ready() {
            return 0;
        }

        let jobs: Vec<(usize, ImageRef)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.current.clone().map(|image| (slot, image)))
            .filter(|(slot, image)| self.cache.claim_scan(*slot, image))
            .collect();

        if jobs.is_empty() {
            return 0;
        }
        tracing::debug!(count = jobs.len(), "scanning slots");

        join_all(jobs.iter().map(|(slot, image)| self.cache.ensure(*slot, image))).await;
        jobs.len()
    }

    /// Landmarks bound to the slot's current image, if any.
    pub fn landmarks(&self, slot: usize) -> Option<LandmarkState> {
        let current = self.slots.get(slot)?.current.as_ref()?;
        self.cache.get(slot, current)
    }

    pub fn ai_status(&self, slot: usize) -> Option<AiStatus> {
        if !self.cache.is_ready() || !self.slots.get(slot)?.is_filled() {
            return None;
        }
        Some(match self.landmarks(slot) {
            Some(LandmarkState::Resolved(_)) => AiStatus::Detected,
            Some(LandmarkState::Fallback) => AiStatus::NotDetected,
            Some(LandmarkState::Pending) | None => AiStatus::Analyzing,
        })
    }

    // --- zoom and rotation ---

    /// With a slot selected, override its zoom and detect on demand for
    /// feature targets. Otherwise set the session-wide target and drop all
    /// overrides.
    pub async fn set_zoom(&mut self, target: ZoomTarget) {
        let Some(slot) = self.selected_slot else {
            self.zoom = target;
            for record in &mut self.slots {
                record.zoom = None;
            }
            tracing::debug!(target = %target, "global zoom set");
            return;
        };

        let current = match self.slots.get_mut(slot) {
            Some(record) => {
                record.zoom = Some(target);
                record.current.clone()
            }
            None => return,
        };
        tracing::debug!(slot, target = %target, "slot zoom set");

        if let Some(image) = current.filter(|_| target.is_feature()) {
            let needs_detection = !matches!(
                self.cache.get(slot, &image),
                Some(LandmarkState::Resolved(_))
            );
            if needs_detection {
                self.cache.ensure(slot, &image).await;
            }
        }
    }

    /// Effective zoom target for a slot.
    pub fn zoom_for(&self, slot: usize) -> ZoomTarget {
        self.slots
            .get(slot)
            .and_then(|r| r.zoom)
            .unwrap_or(self.zoom)
    }

    pub fn rotate_quarter(&mut self, slot: usize) -> Result<(), SessionError> {
        self.check_slot(slot)?;
        let rotation = &mut self.slots[slot].rotation;
        rotation.quarter_turns = (rotation.quarter_turns + 1) % 4;
        Ok(())
    }

    /// Set the fine rotation, clamped to ±45°.
    pub fn set_fine_rotation(&mut self, slot: usize, degrees: f32) -> Result<(), SessionError> {
        self.check_slot(slot)?;
        self.slots[slot].rotation.fine_deg = degrees.clamp(-FINE_ROTATION_LIMIT, FINE_ROTATION_LIMIT);
        Ok(())
    }

    pub fn transform(&self, slot: usize) -> RenderTransform {
        let rotation = self
            .slots
            .get(slot)
            .map(|r| r.rotation.degrees())
            .unwrap_or_default();
        let landmarks = self.landmarks(slot);
        compute_transform(self.layout, slot, self.zoom_for(slot), landmarks.as_ref(), rotation)
    }

    // --- presentation ---

    pub fn set_border(&mut self, border: bool) {
        self.border = border;
    }

    /// Toggle the before/after comparison. Turning it on disables the date
    /// labels and starts on the original.
    pub fn toggle_before_after(&mut self) -> bool {
        if self.labels == LabelMode::BeforeAfter {
            self.labels = LabelMode::None;
            self.showing_original = false;
        } else {
            self.labels = LabelMode::BeforeAfter;
            self.showing_original = true;
        }
        self.labels == LabelMode::BeforeAfter
    }

    /// Toggle date labels. Turning them on disables the comparison.
    pub fn toggle_date(&mut self) -> bool {
        self.showing_original = false;
        self.labels = if self.labels == LabelMode::Date {
            LabelMode::None
        } else {
            LabelMode::Date
        };
        self.labels == LabelMode::Date
    }

    /// Swap between original and current while the comparison is active.
    /// The caller drives the timing. Returns whether the original is shown.
    pub fn flip_comparison(&mut self) -> bool {
        if self.labels == LabelMode::BeforeAfter {
            self.showing_original = !self.showing_original;
        }
        self.showing_original
    }

    // --- destructive edits ---

    pub async fn remove_background(&mut self) -> BatchReport {
        self.run_batch(EditKind::RemoveBackground).await
    }

    pub async fn censor_eyes(&mut self) -> BatchReport {
        self.run_batch(EditKind::CensorEyes).await
    }

    pub async fn level_eyes(&mut self) -> BatchReport {
        self.run_batch(EditKind::LevelEyes).await
    }

    /// The selected slot if any, otherwise every filled slot.
    fn batch_targets(&self) -> Vec<usize> {
        match self.selected_slot {
            Some(slot) => vec![slot],
            None => self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_filled())
                .map(|(slot, _)| slot)
                .collect(),
        }
    }

    /// Run one edit over the selected slot, or over every filled slot when
    /// nothing is selected. Items run one after another; a failed item is
    /// logged and the batch moves on.
    pub async fn run_batch(&mut self, kind: EditKind) -> BatchReport {
        let targets = self.batch_targets();
        let total = targets.len();
        let mut report = BatchReport { total, ..BatchReport::default() };
        if total == 0 {
            return report;
        }

        for (i, slot) in targets.into_iter().enumerate() {
            self.set_status(Status::Processing(kind.progress_text(i + 1, total)));
            tracing::info!(slot, edit = %kind, item = i + 1, total, "processing");

            match self.apply_edit(kind, slot).await {
                Ok(true) => report.applied += 1,
                Ok(false) => {
                    tracing::info!(slot, edit = %kind, "nothing to edit, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(slot, edit = %kind, error = %e, "edit failed, continuing");
                    report.failed += 1;
                }
            }
        }

        self.set_status(Status::Idle);
        tracing::info!(
            edit = %kind,
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "batch finished"
        );
        report
    }

    /// Apply one edit to one slot. `Ok(false)` when the slot is empty or
    /// lacks the landmarks the edit needs.
    async fn apply_edit(&mut self, kind: EditKind, slot: usize) -> Result<bool, EditError> {
        let Some(current) = self.slots.get(slot).and_then(|r| r.current.clone()) else {
            return Ok(false);
        };

        let (next, landmarks) = match kind {
            EditKind::RemoveBackground => {
                let out = self.background_remover.remove_background(&current).await?;
                (ImageRef::blob(out), None)
            }
            EditKind::CensorEyes => {
                let state = self.cache.ensure(slot, &current).await;
                let Some(eyes) = state.data().map(|d| d.eyes) else {
                    return Ok(false);
                };
                let source = current.clone();
                let out =
                    tokio::task::spawn_blocking(move || censor_eyes(source.image(), &eyes)).await?;
                (ImageRef::blob(DynamicImage::ImageRgba8(out)), None)
            }
            EditKind::LevelEyes => {
                let state = self.cache.ensure(slot, &current).await;
                let Some(data) = state.data().cloned() else {
                    return Ok(false);
                };
                let source = current.clone();
                let leveled =
                    tokio::task::spawn_blocking(move || level_eyes(source.image(), &data)).await?;
                tracing::debug!(slot, angle_deg = leveled.angle.to_degrees(), "eyes leveled");
                (
                    ImageRef::blob(DynamicImage::ImageRgba8(leveled.image)),
                    Some(leveled.landmarks),
                )
            }
        };

        // Background and censor edits keep the existing landmarks; leveling
        // supplies re-projected ones. Either way the new image skips the scan.
        self.cache.rebind(slot, &next, landmarks);
        tracing::info!(slot, edit = %kind, handle = next.handle(), "edit applied");
        if let Some(record) = self.slots.get_mut(slot) {
            record.current = Some(next);
        }
        Ok(true)
    }

    // --- output ---

    /// Slots the layout requires that have no image.
    pub fn missing_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_filled())
            .map(|(slot, _)| slot)
            .collect()
    }

    fn overlay_for(&self, record: &SlotRecord) -> Option<Overlay> {
        match self.labels {
            LabelMode::None => None,
            LabelMode::BeforeAfter => Some(Overlay::Comparison { original: self.showing_original }),
            LabelMode::Date => Some(Overlay::Date(self.photos.date_label(
                record.original.as_ref().map(ImageRef::handle),
                record.current.as_ref().map(ImageRef::handle),
            ))),
        }
    }

    /// Describe the composition as it looks right now.
    pub fn plan(&self) -> CompositionPlan {
        let rects = self.layout.slot_rects();
        let layers = self
            .slots
            .iter()
            .enumerate()
            .zip(rects)
            .filter_map(|((slot, record), rect)| {
                let current = record.current.as_ref()?;
                let image = match (&record.original, self.showing_original) {
                    (Some(original), true) if self.labels == LabelMode::BeforeAfter => original,
                    _ => current,
                };
                Some(SlotLayer {
                    slot,
                    rect,
                    image: image.clone(),
                    transform: self.transform(slot),
                    overlay: self.overlay_for(record),
                })
            })
            .collect();

        CompositionPlan {
            width: self.options.canvas_width,
            height: self.options.canvas_height,
            border: self.border,
            layers,
        }
    }

    /// Validate, rasterize and hand the bytes to `on_save`.
    ///
    /// Every slot of the layout must be filled; otherwise the rasterizer is
    /// never called. `on_save` runs once, only on success.
    pub async fn finalize<F>(&mut self, on_save: F) -> Result<(), FinalizeError>
    where
        F: FnOnce(Vec<u8>),
    {
        let missing = self.missing_slots();
        if !missing.is_empty() {
            tracing::warn!(?missing, "finalize refused: empty slots");
            return Err(FinalizeError::Validation { missing });
        }

        self.selected_slot = None;
        self.set_status(Status::Processing("Generating final image...".into()));

        let plan = self.plan();
        let result = self.rasterizer.render(&plan, self.options).await;
        self.set_status(Status::Idle);

        let bytes = result.map_err(|e| {
            tracing::error!(error = %e, "rasterization failed");
            e
        })?;
        tracing::info!(bytes = bytes.len(), layout = %self.layout, "collage finalized");
        on_save(bytes);
        Ok(())
    }
}
