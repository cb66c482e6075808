//! Timed clip capture
//!
//! `Idle -> Recording` on the first frame containing an Unknown face.
//! While recording every frame is appended; the session closes once
//! `duration` has elapsed since it started. Unknowns seen during a session
//! neither open a second clip nor extend the running one.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::sink::{evidence_stem, ClipFormat, ClipSink, ClipSinkFactory};
use super::EvidenceEvent;
use crate::service::{ClassificationResult, Frame};

/// The single active recording
pub struct RecordingSession {
    pub started_at: Duration,
    pub last_trigger: Duration,
    pub path: PathBuf,
    pub frames_written: u64,
    sink: Box<dyn ClipSink>,
}

enum ClipState {
    Idle,
    Recording(RecordingSession),
}

pub struct ClipRecorder {
    factory: Box<dyn ClipSinkFactory>,
    duration: Duration,
    fps: f64,
    state: ClipState,
    sessions: u64,
}

impl ClipRecorder {
    pub fn new(factory: Box<dyn ClipSinkFactory>, duration: Duration, fps: f64) -> Self {
        Self {
            factory,
            duration,
            fps,
            state: ClipState::Idle,
            sessions: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, ClipState::Recording(_))
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        match &self.state {
            ClipState::Recording(session) => Some(session),
            ClipState::Idle => None,
        }
    }

    /// Sessions opened so far
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub fn observe(&mut self, frame: &Frame, results: &[ClassificationResult]) -> Vec<EvidenceEvent> {
        let mut events = Vec::new();
        let triggered = results.iter().any(|r| r.is_unknown());

        if let ClipState::Recording(mut session) = std::mem::replace(&mut self.state, ClipState::Idle) {
            if frame.timestamp.saturating_sub(session.started_at) >= self.duration {
                events.push(close_session(session));
            } else {
                if triggered {
                    session.last_trigger = frame.timestamp;
                }
                match session.sink.write_frame(&frame.image) {
                    Ok(()) => {
                        session.frames_written += 1;
                        events.push(EvidenceEvent::ClipFrameWritten);
                        self.state = ClipState::Recording(session);
                    }
                    Err(e) => {
                        error!("Clip {} write failed, stopping: {}", session.path.display(), e);
                        events.push(EvidenceEvent::Failed(e.to_string()));
                        events.push(close_session(session));
                    }
                }
                return events;
            }
        }

        if triggered {
            events.extend(self.start(frame));
        }
        events
    }

    fn start(&mut self, frame: &Frame) -> Vec<EvidenceEvent> {
        let format = ClipFormat {
            width: frame.width(),
            height: frame.height(),
            fps: self.fps,
        };
        let stem = evidence_stem(&frame.captured_at);

        let mut sink = match self.factory.open(&stem, format) {
            Ok(sink) => sink,
            Err(e) => {
                error!("Failed to open clip {}: {}", stem, e);
                return vec![EvidenceEvent::Failed(e.to_string())];
            }
        };

        let path = sink.path().to_path_buf();
        if let Err(e) = sink.write_frame(&frame.image) {
            error!("Clip {} write failed on first frame: {}", path.display(), e);
            let _ = sink.close();
            return vec![EvidenceEvent::Failed(e.to_string())];
        }

        self.sessions += 1;
        info!(
            "Recording unknown face to {} ({}x{} @ {} fps, {:?})",
            path.display(),
            format.width,
            format.height,
            format.fps,
            self.duration
        );
        self.state = ClipState::Recording(RecordingSession {
            started_at: frame.timestamp,
            last_trigger: frame.timestamp,
            path: path.clone(),
            frames_written: 1,
            sink,
        });
        vec![EvidenceEvent::ClipStarted(path)]
    }

    /// Close an active session; safe to call when idle
    pub fn finish(&mut self) -> Option<EvidenceEvent> {
        match std::mem::replace(&mut self.state, ClipState::Idle) {
            ClipState::Recording(session) => Some(close_session(session)),
            ClipState::Idle => None,
        }
    }
}

impl Drop for ClipRecorder {
    fn drop(&mut self) {
        if self.finish().is_some() {
            debug!("Active clip finalized on drop");
        }
    }
}

fn close_session(mut session: RecordingSession) -> EvidenceEvent {
    match session.sink.close() {
        Ok(()) => {
            info!(
                "Recording saved: {} ({} frames)",
                session.path.display(),
                session.frames_written
            );
            EvidenceEvent::ClipFinished {
                path: session.path,
                frames: session.frames_written,
            }
        }
        Err(e) => {
            warn!("Failed to finalize clip {}: {}", session.path.display(), e);
            EvidenceEvent::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::testing::{frame_at, frame_sized, result, MemoryClipFactory};

    const FPS: u64 = 30;

    fn recorder(duration_secs: u64) -> (ClipRecorder, MemoryClipFactory) {
        let factory = MemoryClipFactory::default();
        let recorder = ClipRecorder::new(
            Box::new(factory.clone()),
            Duration::from_secs(duration_secs),
            FPS as f64,
        );
        (recorder, factory)
    }

    /// Frame `n` (1-based) of a 30 fps stream
    fn nth(n: u64) -> Frame {
        frame_at(n - 1, (n - 1) * 1000 / FPS)
    }

    fn nth_exact(n: u64) -> Frame {
        let mut frame = frame_at(n - 1, 0);
        frame.timestamp = crate::service::frame_timestamp(n - 1, FPS as f64);
        frame
    }

    #[test]
    fn test_three_second_clip_at_30fps() {
        let (mut recorder, factory) = recorder(3);
        let unknown = [result(None, 0)];

        let events = recorder.observe(&nth_exact(1), &unknown);
        assert!(matches!(events[0], EvidenceEvent::ClipStarted(_)));

        for n in 2..=90 {
            recorder.observe(&nth_exact(n), &[]);
            assert!(recorder.is_recording(), "closed early at frame {}", n);
        }

        let events = recorder.observe(&nth_exact(91), &[]);
        assert!(!recorder.is_recording());
        assert_eq!(
            events,
            vec![EvidenceEvent::ClipFinished { path: factory.clips()[0].path.clone(), frames: 90 }]
        );

        let clips = factory.clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].frames, 90);
        assert_eq!(clips[0].closes, 1);
    }

    #[test]
    fn test_unknowns_during_recording_do_not_open_second_clip() {
        let (mut recorder, factory) = recorder(3);
        let unknown = [result(None, 0)];

        for n in 1..=90 {
            recorder.observe(&nth(n), &unknown);
        }
        assert_eq!(factory.clips().len(), 1);
        assert_eq!(recorder.sessions(), 1);
        assert_eq!(factory.open_count(), 1);

        let session = recorder.session().unwrap();
        assert_eq!(session.started_at, Duration::ZERO);
        assert_eq!(session.last_trigger, nth(90).timestamp);
    }

    #[test]
    fn test_continuous_unknown_restarts_after_close() {
        let (mut recorder, factory) = recorder(3);
        let unknown = [result(None, 0)];

        for n in 1..=91 {
            recorder.observe(&nth_exact(n), &unknown);
        }
        let clips = factory.clips();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].closes, 1);
        assert_eq!(clips[1].closes, 0);
        assert_eq!(recorder.session().unwrap().started_at, Duration::from_secs(3));
    }

    #[test]
    fn test_known_faces_do_not_trigger() {
        let (mut recorder, factory) = recorder(3);
        recorder.observe(&nth(1), &[result(Some("anna"), 0)]);
        assert!(!recorder.is_recording());
        assert!(factory.clips().is_empty());
    }

    #[test]
    fn test_finish_closes_exactly_once() {
        let (mut recorder, factory) = recorder(3);
        recorder.observe(&nth(1), &[result(None, 0)]);
        recorder.observe(&nth(2), &[]);

        assert!(matches!(recorder.finish(), Some(EvidenceEvent::ClipFinished { frames: 2, .. })));
        assert!(recorder.finish().is_none());
        assert_eq!(factory.clips()[0].closes, 1);
    }

    #[test]
    fn test_drop_finalizes_active_clip() {
        let (mut recorder, factory) = recorder(3);
        recorder.observe(&nth(1), &[result(None, 0)]);
        drop(recorder);
        assert_eq!(factory.clips()[0].closes, 1);
    }

    #[test]
    fn test_dimension_change_aborts_to_idle() {
        let (mut recorder, factory) = recorder(3);
        recorder.observe(&nth(1), &[result(None, 0)]);

        let resized = frame_sized(1, 33, 32, 32);
        let events = recorder.observe(&resized, &[]);

        assert!(matches!(events[0], EvidenceEvent::Failed(_)));
        assert!(!recorder.is_recording());
        assert_eq!(factory.clips()[0].closes, 1);
    }

    #[test]
    fn test_open_failure_stays_idle() {
        let factory = MemoryClipFactory::failing();
        let mut recorder = ClipRecorder::new(Box::new(factory.clone()), Duration::from_secs(3), 30.0);
        let events = recorder.observe(&nth(1), &[result(None, 0)]);
        assert!(matches!(events[0], EvidenceEvent::Failed(_)));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_format_taken_from_trigger_frame() {
        let (mut recorder, factory) = recorder(3);
        recorder.observe(&nth(1), &[result(None, 0)]);
        let format = factory.clips()[0].format;
        assert_eq!((format.width, format.height), (64, 48));
        assert_eq!(format.fps, 30.0);
    }
}
