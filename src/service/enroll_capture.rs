//! Enrollment capture
//!
//! Turns a frame source into an enrollment folder for one person. Padded
//! face crops are saved as `<root>/<name>/<name>_<NNN>.jpg`, at most once
//! per interval, which is the layout `DirectorySource` reads back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use tracing::{info, warn};

use super::source::FrameSource;
use super::types::Frame;
use crate::config::EnrollmentConfig;
use crate::engine::{DetectedFace, FaceAnalyzer};
use crate::utils::image::crop;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSummary {
    pub dir: PathBuf,
    pub frames: u64,
    pub saved: u32,
}

#[derive(Debug, Clone)]
pub struct EnrollmentCapture {
    root: PathBuf,
    interval: Duration,
    padding: u32,
}

impl EnrollmentCapture {
    pub fn new(root: impl Into<PathBuf>, interval: Duration, padding: u32) -> Self {
        Self {
            root: root.into(),
            interval,
            padding,
        }
    }

    pub fn from_config(config: &EnrollmentConfig) -> Self {
        Self::new(
            &config.db_path,
            Duration::from_secs_f64(config.capture_interval_secs),
            config.capture_padding,
        )
    }

    /// Capture faces for `name` until the source ends or `cancel` is set
    pub fn capture<A, S>(
        &self,
        name: &str,
        analyzer: &A,
        source: &mut S,
        cancel: &AtomicBool,
    ) -> Result<CaptureSummary>
    where
        A: FaceAnalyzer + ?Sized,
        S: FrameSource + ?Sized,
    {
        let name = name.trim();
        anyhow::ensure!(!name.is_empty(), "Name cannot be empty");
        anyhow::ensure!(
            !name.contains(['/', '\\']) && name != "." && name != "..",
            "Name {:?} is not a valid folder name",
            name
        );

        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        info!("Capturing faces for {} into {}", name, dir.display());

        let mut summary = CaptureSummary {
            dir: dir.clone(),
            frames: 0,
            saved: 0,
        };
        let mut count = 0u32;
        let mut last_save: Option<Duration> = None;

        while !cancel.load(Ordering::Relaxed) {
            let Some(next) = source.next_frame() else {
                break;
            };
            summary.frames += 1;

            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping unreadable frame: {:#}", e);
                    continue;
                }
            };

            if let Some(at) = last_save {
                if frame.timestamp.saturating_sub(at) < self.interval {
                    continue;
                }
            }

            let faces = match analyzer.detect(&DynamicImage::ImageRgb8(frame.image.clone())) {
                Ok(faces) => faces,
                Err(e) => {
                    warn!("Detection failed on frame {}: {:#}", frame.index, e);
                    continue;
                }
            };
            if faces.is_empty() {
                continue;
            }

            for face in &faces {
                match self.save_crop(&dir, name, &frame, face, &mut count) {
                    Ok(Some(path)) => {
                        summary.saved += 1;
                        info!("[{}] Saved face image: {}", summary.saved, path.display());
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping face on frame {}: {:#}", frame.index, e),
                }
            }
            last_save = Some(frame.timestamp);
        }

        info!("Capture finished. Total faces saved: {}", summary.saved);
        Ok(summary)
    }

    fn save_crop(
        &self,
        dir: &Path,
        name: &str,
        frame: &Frame,
        face: &DetectedFace,
        count: &mut u32,
    ) -> Result<Option<PathBuf>> {
        let Some(face_img) = crop(&frame.image, &face.bbox, self.padding) else {
            warn!("Face box {:?} lies outside frame {}", face.bbox, frame.index);
            return Ok(None);
        };

        // Earlier sessions may have left files; never overwrite them
        let path = loop {
            *count += 1;
            let candidate = dir.join(format!("{}_{:03}.jpg", name, count));
            if !candidate.exists() {
                break candidate;
            }
        };

        face_img
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BoundingBox, ScriptedAnalyzer};
    use parking_lot::Mutex;
    use crate::evidence::testing::frame_at;
    use crate::service::source::VecSource;
    use crate::storage::{DirectorySource, EnrollmentSource};
    use tempfile::tempdir;

    fn face() -> DetectedFace {
        DetectedFace::new(BoundingBox { x1: 20, y1: 10, x2: 30, y2: 20 }, vec![1.0, 0.0])
    }

    /// 30 fps frames, one face in each
    fn setup(frames: u64) -> (ScriptedAnalyzer, VecSource) {
        let mut analyzer = ScriptedAnalyzer::new();
        for _ in 0..frames {
            analyzer = analyzer.then(vec![face()]);
        }
        let source = VecSource::new((0..frames).map(|i| frame_at(i, i * 1000 / 30)));
        (analyzer, source)
    }

    #[test]
    fn test_saves_at_most_once_per_interval() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::from_millis(200), 100);
        let (analyzer, mut source) = setup(30);

        let summary = capture.capture("anna", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();

        // 1 s of video at 0.2 s spacing: t = 0, 200, 400, 600, 800 ms
        assert_eq!(summary.frames, 30);
        assert_eq!(summary.saved, 5);
        assert!(dir.path().join("anna/anna_001.jpg").exists());
        assert!(dir.path().join("anna/anna_005.jpg").exists());
        assert!(!dir.path().join("anna/anna_006.jpg").exists());
    }

    #[test]
    fn test_crop_padded_and_clamped() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::ZERO, 100);
        let (analyzer, mut source) = setup(1);
        capture.capture("anna", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();

        let saved = image::open(dir.path().join("anna/anna_001.jpg")).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 48));
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::ZERO, 0);
        let (analyzer, mut source) = setup(1);
        assert!(capture.capture("  ", &analyzer, &mut source, &AtomicBool::new(false)).is_err());
        assert!(capture.capture("../x", &analyzer, &mut source, &AtomicBool::new(false)).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_second_session_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::ZERO, 0);

        let (analyzer, mut source) = setup(2);
        capture.capture("john", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();
        let (analyzer, mut source) = setup(1);
        capture.capture("john", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();

        assert!(dir.path().join("john/john_003.jpg").exists());
    }

    #[test]
    fn test_captured_folder_is_loadable() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::ZERO, 0);
        let (analyzer, mut source) = setup(3);
        capture.capture("anna", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();

        let identities = DirectorySource::new(dir.path()).identities().unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].name, "anna");
        assert_eq!(identities[0].images.len(), 3);
    }

    #[test]
    fn test_frames_without_faces_are_skipped() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::ZERO, 0);
        let analyzer = ScriptedAnalyzer::new().then(vec![]).then_fail("busy");
        let mut source = VecSource::new((0..2).map(|i| frame_at(i, i * 33)));

        let summary = capture.capture("anna", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.saved, 0);
    }

    /// Removes the person folder before the first detection returns, then
    /// puts it back for the second
    struct VanishingFolder {
        dir: PathBuf,
        calls: Mutex<u32>,
    }

    impl FaceAnalyzer for VanishingFolder {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<DetectedFace>> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls == 1 {
                std::fs::remove_dir_all(&self.dir)?;
            } else {
                std::fs::create_dir_all(&self.dir)?;
            }
            Ok(vec![face()])
        }
    }

    #[test]
    fn test_write_failure_skips_face_and_continues() {
        let dir = tempdir().unwrap();
        let capture = EnrollmentCapture::new(dir.path(), Duration::ZERO, 0);
        let analyzer = VanishingFolder {
            dir: dir.path().join("anna"),
            calls: Mutex::new(0),
        };
        let mut source = VecSource::new((0..2).map(|i| frame_at(i, i * 33)));

        let summary = capture.capture("anna", &analyzer, &mut source, &AtomicBool::new(false)).unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.saved, 1);
        assert!(dir.path().join("anna/anna_002.jpg").exists());
    }
}
