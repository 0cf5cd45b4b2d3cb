//! Per-slot face detection cache.
//!
//! Wraps an external [`FaceDetector`] and remembers, per slot, which image
//! produced the cached landmarks. Requests for the same slot and image share
//! one detector call; a request for a different image supersedes whatever was
//! in flight, and stale results are dropped on arrival by comparing
//! generation tokens.

use crate::landmarks::FacePoints;
use crate::types::{ImageRef, LandmarkData, LandmarkState};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector not ready")]
    NotReady,
    #[error("failed to read image {handle}: {reason}")]
    Image { handle: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// External face landmark detector.
///
/// `Ok(None)` means no face was found. Errors are treated the same way by the
/// cache: the image is tagged as a permanent fallback.
pub trait FaceDetector: Send + Sync {
    /// Whether the model is loaded and `detect` can be called.
    fn is_ready(&self) -> bool {
        true
    }

    fn detect<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> BoxFuture<'a, Result<Option<FacePoints>, DetectorError>>;
}

#[derive(Default)]
enum EntryState {
    #[default]
    Empty,
    /// A detector call is running; waiters get its result.
    InFlight(Vec<oneshot::Sender<LandmarkState>>),
    Done(LandmarkState),
}

#[derive(Default)]
struct SlotEntry {
    /// Token of the request that owns this entry.
    generation: u64,
    /// Image the entry's state belongs to.
    image: Option<ImageRef>,
    state: EntryState,
    /// Last image handed to the background scan for this slot.
    scanned: Option<ImageRef>,
}

/// Outcome of the bookkeeping step of [`DetectionCache::ensure`].
enum Claim {
    Hit(LandmarkState),
    Wait(oneshot::Receiver<LandmarkState>),
    Run(u64),
}

#[derive(Default)]
struct CacheState {
    next_generation: u64,
    slots: HashMap<usize, SlotEntry>,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Resets a slot whose detector call was dropped before it finished, so
/// waiters resolve to `Pending` and the next request runs the detector again.
struct InFlightGuard<'a> {
    cache: &'a DetectionCache,
    slot: usize,
    token: u64,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.lock();
        if let Some(entry) = state.slots.get_mut(&self.slot) {
            if entry.generation == self.token && matches!(entry.state, EntryState::InFlight(_)) {
                tracing::debug!(slot = self.slot, "detection cancelled; releasing slot");
                entry.image = None;
                entry.state = EntryState::Empty;
            }
        }
    }
}

/// Landmark cache keyed by slot index.
pub struct DetectionCache {
    detector: Arc<dyn FaceDetector>,
    inner: Mutex<CacheState>,
}

impl DetectionCache {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            detector,
            inner: Mutex::new(CacheState::default()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_ready()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Landmarks for `image` in `slot`, running the detector at most once per
    /// slot and image.
    ///
    /// Returns [`LandmarkState::Pending`] when the detector is not ready or
    /// when this request was superseded before it finished.
    pub async fn ensure(&self, slot: usize, image: &ImageRef) -> LandmarkState {
        if !self.detector.is_ready() {
            tracing::debug!(slot, "detector not ready; skipping detection");
            return LandmarkState::Pending;
        }

        let claim = {
            let mut state = self.lock();
            let generation = state.bump();
            let entry = state.slots.entry(slot).or_default();

            match &mut entry.state {
                EntryState::Done(cached) if entry.image.as_ref() == Some(image) => {
                    Claim::Hit(cached.clone())
                }
                EntryState::InFlight(waiters) if entry.image.as_ref() == Some(image) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Claim::Wait(rx)
                }
                previous => {
                    if matches!(previous, EntryState::InFlight(_)) {
                        tracing::debug!(slot, handle = image.handle(), "superseding in-flight detection");
                    }
                    // Replacing the state drops any previous waiters, which
                    // then resolve to Pending.
                    entry.generation = generation;
                    entry.image = Some(image.clone());
                    entry.state = EntryState::InFlight(Vec::new());
                    Claim::Run(generation)
                }
            }
        };

        let token = match claim {
            Claim::Hit(cached) => {
                tracing::debug!(slot, handle = image.handle(), "landmark cache hit");
                return cached;
            }
            Claim::Wait(rx) => {
                tracing::debug!(slot, handle = image.handle(), "awaiting in-flight detection");
                return rx.await.unwrap_or_default();
            }
            Claim::Run(token) => token,
        };

        let mut guard = InFlightGuard {
            cache: self,
            slot,
            token,
            armed: true,
        };
        let result = self.run_detector(slot, image).await;
        guard.armed = false;

        let mut state = self.lock();
        let Some(entry) = state.slots.get_mut(&slot) else {
            tracing::debug!(slot, "slot forgotten during detection; discarding result");
            return LandmarkState::Pending;
        };
        if entry.generation != token || entry.image.as_ref() != Some(image) {
            tracing::debug!(slot, handle = image.handle(), "discarding superseded detection result");
            return LandmarkState::Pending;
        }

        if let EntryState::InFlight(waiters) =
            std::mem::replace(&mut entry.state, EntryState::Done(result.clone()))
        {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
        result
    }

    async fn run_detector(&self, slot: usize, image: &ImageRef) -> LandmarkState {
        let (width, height) = image.dimensions();
        match self.detector.detect(image).await {
            Ok(Some(points)) => match LandmarkData::from_face_points(&points, width, height) {
                Some(data) => {
                    tracing::info!(slot, handle = image.handle(), "face detected");
                    LandmarkState::Resolved(data)
                }
                None => {
                    tracing::warn!(slot, handle = image.handle(), "detector returned incomplete landmarks");
                    LandmarkState::Fallback
                }
            },
            Ok(None) => {
                tracing::info!(slot, handle = image.handle(), "no face detected");
                LandmarkState::Fallback
            }
            Err(e) => {
                tracing::warn!(slot, handle = image.handle(), error = %e, "face detection failed");
                LandmarkState::Fallback
            }
        }
    }

    /// Cached state for `slot`, whatever image it belongs to.
    pub fn state(&self, slot: usize) -> LandmarkState {
        match self.lock().slots.get(&slot).map(|e| &e.state) {
            Some(EntryState::Done(s)) => s.clone(),
            _ => LandmarkState::Pending,
        }
    }

    /// Cached state for `slot` only if it was produced for `image`.
    pub fn get(&self, slot: usize, image: &ImageRef) -> Option<LandmarkState> {
        let state = self.lock();
        let entry = state.slots.get(&slot)?;
        match &entry.state {
            EntryState::Done(s) if entry.image.as_ref() == Some(image) => Some(s.clone()),
            _ => None,
        }
    }

    /// Delete the cached record for `slot`. Any in-flight result is dropped
    /// when it arrives. Scan tags are kept.
    pub fn invalidate(&self, slot: usize) {
        let mut state = self.lock();
        let generation = state.bump();
        if let Some(entry) = state.slots.get_mut(&slot) {
            entry.generation = generation;
            entry.image = None;
            entry.state = EntryState::Empty;
            tracing::debug!(slot, "landmark cache invalidated");
        }
    }

    /// Drop everything known about `slot`, including its scan tag.
    pub fn forget(&self, slot: usize) {
        self.lock().slots.remove(&slot);
    }

    /// Bind `slot` to a new image without running detection.
    ///
    /// `data` replaces the record; `None` carries the existing record over
    /// (used when an edit does not move facial features). The image is also
    /// tagged as scanned so the background pass leaves it alone.
    pub fn rebind(&self, slot: usize, image: &ImageRef, data: Option<LandmarkData>) {
        let mut state = self.lock();
        let generation = state.bump();
        let entry = state.slots.entry(slot).or_default();

        let carried = match (data, &entry.state) {
            (Some(data), _) => LandmarkState::Resolved(data),
            (None, EntryState::Done(previous)) => previous.clone(),
            (None, _) => LandmarkState::Pending,
        };

        entry.generation = generation;
        entry.image = Some(image.clone());
        entry.scanned = Some(image.clone());
        entry.state = if carried.is_pending() {
            EntryState::Empty
        } else {
            EntryState::Done(carried)
        };
    }

    /// Compare-and-set the background scan tag. Returns `true` if `image`
    /// had not been submitted for `slot` yet (and records it).
    pub fn claim_scan(&self, slot: usize, image: &ImageRef) -> bool {
        let mut state = self.lock();
        let entry = state.slots.entry(slot).or_default();
        if entry.scanned.as_ref() == Some(image) {
            return false;
        }
        entry.scanned = Some(image.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelRect, Point};
    use image::{DynamicImage, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn image(handle: &str) -> ImageRef {
        ImageRef::new(handle, DynamicImage::ImageRgba8(RgbaImage::new(800, 600)))
    }

    fn face_points() -> FacePoints {
        let cluster = |x: f32, y: f32| vec![Point::new(x - 10.0, y), Point::new(x + 10.0, y + 4.0)];
        FacePoints {
            face: PixelRect { x: 300.0, y: 150.0, width: 200.0, height: 250.0 },
            left_eye: cluster(360.0, 220.0),
            right_eye: cluster(440.0, 220.0),
            nose: cluster(400.0, 270.0),
            mouth: cluster(400.0, 330.0),
        }
    }

    /// Counts calls; finds a face unless the handle contains "noface".
    struct CountingDetector {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl CountingDetector {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), gate: None }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self { calls: AtomicUsize::new(0), gate: Some(gate) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FaceDetector for CountingDetector {
        fn detect<'a>(
            &'a self,
            image: &'a ImageRef,
        ) -> BoxFuture<'a, Result<Option<FacePoints>, DetectorError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                if image.handle().contains("error") {
                    return Err(DetectorError::InferenceFailed("boom".into()));
                }
                if image.handle().contains("noface") {
                    return Ok(None);
                }
                Ok(Some(face_points()))
            })
        }
    }

    struct NotReady;

    impl FaceDetector for NotReady {
        fn is_ready(&self) -> bool {
            false
        }

        fn detect<'a>(
            &'a self,
            _image: &'a ImageRef,
        ) -> BoxFuture<'a, Result<Option<FacePoints>, DetectorError>> {
            Box::pin(async { Err(DetectorError::NotReady) })
        }
    }

    #[tokio::test]
    async fn test_ensure_twice_hits_cache() {
        let detector = Arc::new(CountingDetector::new());
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");

        let first = cache.ensure(0, &a).await;
        let second = cache.ensure(0, &a).await;

        assert!(first.data().is_some());
        assert_eq!(first, second);
        assert_eq!(detector.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_is_cached() {
        let detector = Arc::new(CountingDetector::new());
        let cache = DetectionCache::new(detector.clone());
        let bad = image("photo://noface");
        let broken = image("photo://error");

        assert!(cache.ensure(0, &bad).await.is_fallback());
        assert!(cache.ensure(0, &bad).await.is_fallback());
        assert!(cache.ensure(1, &broken).await.is_fallback());
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_new_image_is_detected_again() {
        let detector = Arc::new(CountingDetector::new());
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");
        let b = image("photo://noface-b");

        assert!(cache.ensure(0, &a).await.data().is_some());
        cache.invalidate(0);
        assert_eq!(cache.get(0, &a), None);
        assert!(cache.ensure(0, &b).await.is_fallback());
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_call() {
        let gate = Arc::new(Notify::new());
        let detector = Arc::new(CountingDetector::gated(gate.clone()));
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");

        let (first, second, ()) = tokio::join!(cache.ensure(0, &a), cache.ensure(0, &a), async {
            gate.notify_one();
        });

        assert!(first.data().is_some());
        assert_eq!(first, second);
        assert_eq!(detector.calls(), 1);
    }

    #[tokio::test]
    async fn test_superseded_result_is_discarded() {
        let gate = Arc::new(Notify::new());
        let detector = Arc::new(CountingDetector::gated(gate.clone()));
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");

        let (result, ()) = tokio::join!(cache.ensure(0, &a), async {
            cache.invalidate(0);
            gate.notify_one();
        });

        assert!(result.is_pending());
        assert!(cache.state(0).is_pending());
        assert_eq!(cache.get(0, &a), None);
    }

    #[tokio::test]
    async fn test_cancelled_detection_releases_slot() {
        let gate = Arc::new(Notify::new());
        let detector = Arc::new(CountingDetector::gated(gate.clone()));
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");

        let (timed_out, waiter) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(20), cache.ensure(0, &a)),
            cache.ensure(0, &a),
        );
        assert!(timed_out.is_err());
        assert!(waiter.is_pending(), "waiter should give up with the cancelled call");

        // Permit is stored for the next detector call.
        gate.notify_one();
        let retried = tokio::time::timeout(Duration::from_secs(1), cache.ensure(0, &a))
            .await
            .expect("slot stayed in flight after cancellation");
        assert!(retried.data().is_some());
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_different_slots_detect_independently() {
        let detector = Arc::new(CountingDetector::new());
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");

        let (s0, s1) = tokio::join!(cache.ensure(0, &a), cache.ensure(1, &a));
        assert!(s0.data().is_some() && s1.data().is_some());
        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn test_not_ready_records_nothing() {
        let cache = DetectionCache::new(Arc::new(NotReady));
        let a = image("photo://a");
        assert!(cache.ensure(0, &a).await.is_pending());
        assert_eq!(cache.get(0, &a), None);
    }

    #[tokio::test]
    async fn test_rebind_carries_record() {
        let detector = Arc::new(CountingDetector::new());
        let cache = DetectionCache::new(detector.clone());
        let a = image("photo://a");
        let edited = image("blob:edited");

        let original = cache.ensure(0, &a).await;
        cache.rebind(0, &edited, None);

        assert_eq!(cache.get(0, &edited), Some(original.clone()));
        assert_eq!(cache.ensure(0, &edited).await, original);
        assert!(!cache.claim_scan(0, &edited));
        assert_eq!(detector.calls(), 1);
    }

    #[test]
    fn test_claim_scan_compare_and_set() {
        let cache = DetectionCache::new(Arc::new(CountingDetector::new()));
        let a = image("photo://a");
        let b = image("photo://b");

        assert!(cache.claim_scan(0, &a));
        assert!(!cache.claim_scan(0, &a));
        assert!(cache.claim_scan(0, &b));
        assert!(cache.claim_scan(1, &a));

        cache.forget(0);
        assert!(cache.claim_scan(0, &b));
    }
}
