//! Per-frame pipeline: detect, classify, record evidence, annotate

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::matcher::IdentityMatcher;
use super::source::FrameSource;
use super::types::{ClassificationResult, Frame};
use crate::engine::FaceAnalyzer;
use crate::evidence::{EvidenceEvent, SharedRecorder};
use crate::utils::image::{draw_box, KNOWN_COLOR, UNKNOWN_COLOR};

const BOX_THICKNESS: u32 = 2;

/// Outcome of one processed frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub results: Vec<ClassificationResult>,
    pub events: Vec<EvidenceEvent>,
}

impl FrameReport {
    pub fn unknown_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_unknown()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub failed_frames: u64,
    pub faces: u64,
    pub unknown_faces: u64,
    pub snapshots: u64,
    pub clips: u64,
    pub evidence_failures: u64,
    pub cancelled: bool,
}

impl RunSummary {
    fn record_events(&mut self, events: &[EvidenceEvent]) {
        for event in events {
            match event {
                EvidenceEvent::SnapshotSaved(_) => self.snapshots += 1,
                EvidenceEvent::ClipFinished { .. } => self.clips += 1,
                EvidenceEvent::Failed(_) => self.evidence_failures += 1,
                EvidenceEvent::ClipStarted(_) | EvidenceEvent::ClipFrameWritten => {}
            }
        }
    }
}

/// Text label for one box, written next to the annotated frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayLabel {
    pub text: String,
    #[serde(flatten)]
    pub result: ClassificationResult,
}

impl OverlayLabel {
    pub fn new(result: &ClassificationResult) -> Self {
        Self {
            text: format!("{} ({:.2})", result.identity, result.distance),
            result: result.clone(),
        }
    }
}

/// Writes annotated copies of frames: green boxes for known faces, red for
/// unknown. Box labels go to a `frame_NNNNNN.json` sidecar since no font
/// rasterizer is linked.
#[derive(Debug, Clone)]
pub struct OverlayWriter {
    dir: PathBuf,
}

impl OverlayWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create overlay directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, frame: &Frame, results: &[ClassificationResult]) -> Result<PathBuf> {
        let annotated = annotate(frame, results);
        let path = self.dir.join(format!("frame_{:06}.jpg", frame.index));
        annotated
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let labels: Vec<OverlayLabel> = results.iter().map(OverlayLabel::new).collect();
        let sidecar = path.with_extension("json");
        let json = serde_json::to_vec_pretty(&labels)?;
        std::fs::write(&sidecar, json)
            .with_context(|| format!("Failed to write {}", sidecar.display()))?;
        Ok(path)
    }
}

/// Copy of the frame with one box per result
pub fn annotate(frame: &Frame, results: &[ClassificationResult]) -> RgbImage {
    let mut annotated = frame.image.clone();
    for result in results {
        let color = if result.is_unknown() { UNKNOWN_COLOR } else { KNOWN_COLOR };
        draw_box(&mut annotated, &result.bbox, color, BOX_THICKNESS);
    }
    annotated
}

pub struct FrameProcessor<A: FaceAnalyzer> {
    analyzer: A,
    matcher: IdentityMatcher,
    recorder: SharedRecorder,
    overlay: Option<OverlayWriter>,
}

impl<A: FaceAnalyzer> FrameProcessor<A> {
    pub fn new(
        analyzer: A,
        matcher: IdentityMatcher,
        recorder: SharedRecorder,
        overlay: Option<OverlayWriter>,
    ) -> Self {
        Self {
            analyzer,
            matcher,
            recorder,
            overlay,
        }
    }

    pub fn matcher_mut(&mut self) -> &mut IdentityMatcher {
        &mut self.matcher
    }

    pub fn recorder(&self) -> &SharedRecorder {
        &self.recorder
    }

    /// Run the pipeline on one frame. Only a detection failure is an error;
    /// evidence and overlay failures are logged and the frame still counts.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameReport> {
        let image = DynamicImage::ImageRgb8(frame.image.clone());
        let faces = self
            .analyzer
            .detect(&image)
            .with_context(|| format!("Detection failed on frame {}", frame.index))?;

        let results = self.matcher.classify(&faces);
        let events = self.recorder.lock().observe(frame, &results);

        if let Some(overlay) = &self.overlay {
            if let Err(e) = overlay.write(frame, &results) {
                warn!("Overlay for frame {} not written: {:#}", frame.index, e);
            }
        }

        debug!(
            "Frame {} ({:?}): {} faces, {} evidence events",
            frame.index,
            frame.timestamp,
            results.len(),
            events.len()
        );

        Ok(FrameReport { results, events })
    }

    /// Pull frames until the source ends or `cancel` is set, then finalize
    /// the recorder
    pub fn run<S: FrameSource + ?Sized>(&mut self, source: &mut S, cancel: &AtomicBool) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        loop {
            if cancel.load(Ordering::Relaxed) {
                info!("Frame loop cancelled");
                summary.cancelled = true;
                break;
            }

            let Some(next) = source.next_frame() else {
                break;
            };
            summary.frames += 1;

            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping unreadable frame: {:#}", e);
                    summary.failed_frames += 1;
                    continue;
                }
            };

            match self.process(&frame) {
                Ok(report) => {
                    summary.faces += report.results.len() as u64;
                    summary.unknown_faces += report.unknown_count() as u64;
                    summary.record_events(&report.events);
                }
                Err(e) => {
                    error!("{:#}", e);
                    summary.failed_frames += 1;
                }
            }
        }

        if let Some(event) = self.recorder.lock().finish() {
            summary.record_events(std::slice::from_ref(&event));
        }

        info!(
            "Processed {} frames in {:.1}s: {} faces, {} unknown, {} snapshots, {} clips, {} failed frames",
            summary.frames,
            start.elapsed().as_secs_f64(),
            summary.faces,
            summary.unknown_faces,
            summary.snapshots,
            summary.clips,
            summary.failed_frames
        );
        summary
    }
}
