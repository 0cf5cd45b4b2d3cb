//! Landmark sidecar files.
//!
//! Stands in for a detection model: each image may have a JSON file next to
//! it (`photo.jpg.landmarks.json`) holding pixel-space landmarks produced by
//! an external tool.

use facefolio_core::landmarks::FacePoints;
use facefolio_core::types::{PixelRect, Point};
use facefolio_core::{DetectorError, FaceDetector, ImageRef};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sidecar {
    /// `null` when the tool found no face.
    pub face: Option<PixelRect>,
    #[serde(default)]
    pub left_eye: Vec<Point>,
    #[serde(default)]
    pub right_eye: Vec<Point>,
    #[serde(default)]
    pub nose: Vec<Point>,
    #[serde(default)]
    pub mouth: Vec<Point>,
    /// Full 68-point shape, when the tool provides one.
    #[serde(default)]
    pub points: Vec<Point>,
}

impl Sidecar {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn face_points(&self) -> Option<FacePoints> {
        Some(FacePoints {
            face: self.face?,
            left_eye: self.left_eye.clone(),
            right_eye: self.right_eye.clone(),
            nose: self.nose.clone(),
            mouth: self.mouth.clone(),
        })
    }
}

pub fn sidecar_path(image: &Path, suffix: &str) -> PathBuf {
    let mut name = image.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Face detector backed by sidecar files. Image handles are paths relative
/// to `base_dir`; edited (`blob:`) images never have a sidecar.
pub struct SidecarDetector {
    base_dir: PathBuf,
    suffix: String,
}

impl SidecarDetector {
    pub fn new(base_dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            suffix: suffix.into(),
        }
    }

    async fn load(&self, handle: &str) -> Result<Option<FacePoints>, DetectorError> {
        let path = sidecar_path(&self.base_dir.join(handle), &self.suffix);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no landmark sidecar");
                return Ok(None);
            }
        };
        let sidecar = Sidecar::parse(&json).map_err(|e| DetectorError::Image {
            handle: handle.to_string(),
            reason: format!("bad sidecar {}: {e}", path.display()),
        })?;
        Ok(sidecar.face_points())
    }
}

impl FaceDetector for SidecarDetector {
    fn detect<'a>(
        &'a self,
        image: &'a ImageRef,
    ) -> BoxFuture<'a, Result<Option<FacePoints>, DetectorError>> {
        Box::pin(async move {
            if image.handle().starts_with("blob:") {
                return Ok(None);
            }
            self.load(image.handle()).await
        })
    }
}
