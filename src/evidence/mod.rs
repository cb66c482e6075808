//! Evidence capture for unknown faces
//!
//! One recorder per deployment, chosen by `evidence.mode`:
//! - snapshot: crop and save each unknown face, debounced per region
//! - clip: record a fixed-length clip, one active clip at a time
//! - disabled: classify only
//!
//! Sink failures are logged and reported as [`EvidenceEvent::Failed`]; they
//! never stop the frame loop.

pub mod clip;
pub mod sink;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, EvidenceMode};
use crate::service::{ClassificationResult, Frame};

pub use clip::{ClipRecorder, RecordingSession};
pub use sink::{
    ClipFormat, ClipSink, ClipSinkFactory, DirectoryClipFactory, DirectorySnapshotSink,
    SnapshotSink,
};
pub use snapshot::SnapshotRecorder;

/// What a recorder did with one frame
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceEvent {
    SnapshotSaved(PathBuf),
    ClipStarted(PathBuf),
    ClipFrameWritten,
    ClipFinished { path: PathBuf, frames: u64 },
    Failed(String),
}

pub enum EvidenceRecorder {
    Disabled,
    Snapshot(SnapshotRecorder),
    Clip(ClipRecorder),
}

/// Recorder guarded for use from more than one frame-producing thread
pub type SharedRecorder = Arc<Mutex<EvidenceRecorder>>;

impl EvidenceRecorder {
    /// Recorder with filesystem sinks as configured
    pub fn from_config(config: &Config) -> Self {
        let evidence = &config.evidence;
        match evidence.mode {
            EvidenceMode::Disabled => EvidenceRecorder::Disabled,
            EvidenceMode::Snapshot => EvidenceRecorder::Snapshot(SnapshotRecorder::new(
                Box::new(DirectorySnapshotSink::new(&evidence.snapshot_dir)),
                config.cooldown(),
                evidence.region_iou,
            )),
            EvidenceMode::Clip => EvidenceRecorder::Clip(ClipRecorder::new(
                Box::new(DirectoryClipFactory::new(&evidence.clip_dir, evidence.clip_container)),
                config.clip_duration(),
                config.source.fps,
            )),
        }
    }

    pub fn observe(&mut self, frame: &Frame, results: &[ClassificationResult]) -> Vec<EvidenceEvent> {
        match self {
            EvidenceRecorder::Disabled => Vec::new(),
            EvidenceRecorder::Snapshot(recorder) => recorder.observe(frame, results),
            EvidenceRecorder::Clip(recorder) => recorder.observe(frame, results),
        }
    }

    /// Finalize any open clip; call on shutdown
    pub fn finish(&mut self) -> Option<EvidenceEvent> {
        match self {
            EvidenceRecorder::Clip(recorder) => recorder.finish(),
            _ => None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, EvidenceRecorder::Clip(recorder) if recorder.is_recording())
    }

    pub fn mode(&self) -> EvidenceMode {
        match self {
            EvidenceRecorder::Disabled => EvidenceMode::Disabled,
            EvidenceRecorder::Snapshot(_) => EvidenceMode::Snapshot,
            EvidenceRecorder::Clip(_) => EvidenceMode::Clip,
        }
    }

    pub fn shared(self) -> SharedRecorder {
        Arc::new(Mutex::new(self))
    }
}
