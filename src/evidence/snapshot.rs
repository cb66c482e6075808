//! Snapshot-per-detection capture
//!
//! Every Unknown face is cropped and saved unless a save for the same
//! region happened less than `cooldown` ago. A region is "the same" when the
//! boxes overlap with IoU >= `region_iou`; `region_iou = 0` turns this into
//! one global cooldown.

use std::time::Duration;

use tracing::{error, info};

use super::sink::{evidence_stem, SnapshotSink};
use super::EvidenceEvent;
use crate::engine::BoundingBox;
use crate::error::SinkError;
use crate::service::{ClassificationResult, Frame};
use crate::utils::image::crop;

#[derive(Debug, Clone, Copy)]
struct RecentSave {
    bbox: BoundingBox,
    at: Duration,
}

pub struct SnapshotRecorder {
    sink: Box<dyn SnapshotSink>,
    cooldown: Duration,
    region_iou: f32,
    recent: Vec<RecentSave>,
    saved: u64,
}

impl SnapshotRecorder {
    pub fn new(sink: Box<dyn SnapshotSink>, cooldown: Duration, region_iou: f32) -> Self {
        Self {
            sink,
            cooldown,
            region_iou,
            recent: Vec::new(),
            saved: 0,
        }
    }

    /// Number of snapshots attempted so far, also the filename counter
    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn observe(&mut self, frame: &Frame, results: &[ClassificationResult]) -> Vec<EvidenceEvent> {
        let now = frame.timestamp;
        let cooldown = self.cooldown;
        self.recent.retain(|r| now.saturating_sub(r.at) < cooldown);

        let mut events = Vec::new();
        for result in results.iter().filter(|r| r.is_unknown()) {
            if self.in_cooldown(&result.bbox) {
                continue;
            }

            self.saved += 1;
            let stem = format!("{}_{:04}", evidence_stem(&frame.captured_at), self.saved);
            match self.save(frame, &result.bbox, &stem) {
                Ok(path) => {
                    info!("Saved unknown face to {}", path.display());
                    self.recent.push(RecentSave {
                        bbox: result.bbox,
                        at: now,
                    });
                    events.push(EvidenceEvent::SnapshotSaved(path));
                }
                Err(e) => {
                    error!("Failed to save unknown face snapshot: {}", e);
                    events.push(EvidenceEvent::Failed(e.to_string()));
                }
            }
        }
        events
    }

    fn in_cooldown(&self, bbox: &BoundingBox) -> bool {
        self.recent
            .iter()
            .any(|r| self.region_iou <= 0.0 || r.bbox.iou(bbox) >= self.region_iou)
    }

    fn save(&mut self, frame: &Frame, bbox: &BoundingBox, stem: &str) -> Result<std::path::PathBuf, SinkError> {
        let face = crop(&frame.image, bbox, 0).ok_or(SinkError::EmptyCrop)?;
        self.sink.save(stem, &face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::testing::{frame_at, result, MemorySnapshotSink};

    fn recorder(cooldown_ms: u64, region_iou: f32) -> (SnapshotRecorder, MemorySnapshotSink) {
        let sink = MemorySnapshotSink::default();
        let recorder = SnapshotRecorder::new(
            Box::new(sink.clone()),
            Duration::from_millis(cooldown_ms),
            region_iou,
        );
        (recorder, sink)
    }

    #[test]
    fn test_same_box_within_cooldown_saves_once() {
        let (mut recorder, sink) = recorder(1000, 0.5);
        let unknown = [result(None, 10)];

        recorder.observe(&frame_at(0, 0), &unknown);
        recorder.observe(&frame_at(1, 500), &unknown);
        assert_eq!(sink.saved().len(), 1);
    }

    #[test]
    fn test_same_box_outside_cooldown_saves_twice() {
        let (mut recorder, sink) = recorder(1000, 0.5);
        let unknown = [result(None, 10)];

        recorder.observe(&frame_at(0, 0), &unknown);
        recorder.observe(&frame_at(1, 1000), &unknown);
        assert_eq!(sink.saved().len(), 2);
    }

    #[test]
    fn test_known_faces_never_saved() {
        let (mut recorder, sink) = recorder(0, 0.5);
        let events = recorder.observe(&frame_at(0, 0), &[result(Some("anna"), 10)]);
        assert!(events.is_empty());
        assert!(sink.saved().is_empty());
    }

    #[test]
    fn test_distinct_regions_tracked_separately() {
        let (mut recorder, sink) = recorder(1000, 0.5);
        recorder.observe(&frame_at(0, 0), &[result(None, 0), result(None, 40)]);
        recorder.observe(&frame_at(1, 100), &[result(None, 0), result(None, 40)]);
        assert_eq!(sink.saved().len(), 2);
    }

    #[test]
    fn test_zero_iou_is_global_cooldown() {
        let (mut recorder, sink) = recorder(1000, 0.0);
        recorder.observe(&frame_at(0, 0), &[result(None, 0), result(None, 40)]);
        assert_eq!(sink.saved().len(), 1);
    }

    #[test]
    fn test_names_are_count_suffixed_and_crop_matches_box() {
        let (mut recorder, sink) = recorder(0, 0.5);
        recorder.observe(&frame_at(0, 0), &[result(None, 0)]);
        recorder.observe(&frame_at(1, 0), &[result(None, 0)]);

        let saved = sink.saved();
        assert_eq!(saved.len(), 2);
        assert!(saved[0].0.ends_with("_0001"));
        assert!(saved[1].0.ends_with("_0002"));
        assert_ne!(saved[0].0, saved[1].0);
        assert_eq!(saved[0].1, (10, 10));
    }

    #[test]
    fn test_sink_failure_is_reported_not_fatal() {
        let sink = MemorySnapshotSink::failing();
        let mut recorder = SnapshotRecorder::new(Box::new(sink), Duration::from_secs(1), 0.5);
        let events = recorder.observe(&frame_at(0, 0), &[result(None, 0)]);
        assert!(matches!(events[0], EvidenceEvent::Failed(_)));

        // Cooldown is not consumed by a failed save
        let events = recorder.observe(&frame_at(1, 10), &[result(None, 0)]);
        assert_eq!(events.len(), 1);
    }
}
