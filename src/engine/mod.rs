//! Face-analysis engine seam
//!
//! The matcher and recorder only see [`FaceAnalyzer`]: any detector/embedder
//! that turns an image into boxes plus embeddings can be plugged in.
//! - `ScriptedAnalyzer` replays fixed detections (tests, dry runs)
//! - `InsightFaceAnalyzer` runs SCRFD + ArcFace on OpenVINO (`openvino` feature)

pub mod preprocess;
pub mod scripted;

#[cfg(feature = "openvino")]
pub mod insightface;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub use scripted::ScriptedAnalyzer;

#[cfg(feature = "openvino")]
pub use insightface::InsightFaceAnalyzer;

/// Face box in pixel coordinates, `x1 < x2` and `y1 < y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Build a box from float detector output, truncating toward zero
    pub fn from_f32(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        let bbox = Self {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
        };
        bbox.is_valid().then_some(bbox)
    }

    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        if self.is_valid() {
            self.width() as i64 * self.height() as i64
        } else {
            0
        }
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64;
        let union = self.area() + other.area() - intersection;

        if union > 0 {
            intersection as f32 / union as f32
        } else {
            0.0
        }
    }
}

/// One face returned by the engine: a box and its raw (not yet normalized) embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

impl DetectedFace {
    pub fn new(bbox: BoundingBox, embedding: Vec<f32>) -> Self {
        Self {
            bbox,
            embedding,
            confidence: 1.0,
        }
    }
}

/// Face-analysis engine capability
///
/// Returns zero or more faces; engine setup (model loading, device
/// selection) happens before the analyzer is handed to the core.
pub trait FaceAnalyzer: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedFace>>;
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedFace>> {
        (**self).detect(image)
    }
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for std::sync::Arc<A> {
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Vec<DetectedFace>> {
        (**self).detect(image)
    }
}
