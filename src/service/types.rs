//! Service layer types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Serialize, Serializer};

use crate::engine::BoundingBox;

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Classification label of one face
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Identity::Unknown)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &str {
        self.name().unwrap_or(UNKNOWN_LABEL)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Per-face outcome of one frame, never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub identity: Identity,
    /// Distance to the nearest enrolled embedding, `+inf` if nothing was compared
    pub distance: f32,
    pub bbox: BoundingBox,
}

impl ClassificationResult {
    pub fn is_unknown(&self) -> bool {
        self.identity.is_unknown()
    }
}

/// One decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Zero-based position in the stream
    pub index: u64,
    /// Time since the start of the stream
    pub timestamp: Duration,
    /// Wall-clock capture time, used to name evidence files
    pub captured_at: DateTime<Local>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, timestamp: Duration, captured_at: DateTime<Local>, image: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            captured_at,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Presentation time of frame `index` at `fps`, exact for integral rates
pub fn frame_timestamp(index: u64, fps: f64) -> Duration {
    if fps.fract() == 0.0 && fps >= 1.0 {
        Duration::from_nanos(index.saturating_mul(1_000_000_000) / fps as u64)
    } else {
        Duration::from_secs_f64(index as f64 / fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::Known("anna".to_string()).to_string(), "anna");
        assert_eq!(Identity::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_result_serializes_label() {
        let result = ClassificationResult {
            identity: Identity::Unknown,
            distance: 1.5,
            bbox: BoundingBox { x1: 1, y1: 2, x2: 3, y2: 4 },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["identity"], "Unknown");
        assert_eq!(json["bbox"]["x2"], 3);
    }

    #[test]
    fn test_frame_timestamp_integral_fps() {
        assert_eq!(frame_timestamp(90, 30.0), Duration::from_secs(3));
        assert_eq!(frame_timestamp(1, 25.0), Duration::from_millis(40));
    }

    #[test]
    fn test_frame_timestamp_fractional_fps() {
        let t = frame_timestamp(30, 29.97);
        assert!((t.as_secs_f64() - 30.0 / 29.97).abs() < 1e-9);
    }
}
