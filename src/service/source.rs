//! Frame sources

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};

use super::types::{frame_timestamp, Frame};
use crate::engine::preprocess::decode_file;
use crate::storage::enrollment::{has_image_extension, sorted_entries};

/// Produces frames in presentation order.
///
/// `None` ends the stream; `Some(Err(_))` is a bad frame the caller may skip.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Result<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<Result<Frame>> {
        (**self).next_frame()
    }
}

/// Directory of still images played back in lexical order at a fixed rate
pub struct ImageSequenceSource {
    files: VecDeque<PathBuf>,
    fps: f64,
    next_index: u64,
}

impl ImageSequenceSource {
    pub fn new(dir: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let dir = dir.as_ref();
        anyhow::ensure!(fps.is_finite() && fps > 0.0, "frame rate must be positive, got {}", fps);

        let files: VecDeque<PathBuf> = sorted_entries(dir)
            .with_context(|| format!("Failed to open frame directory {}", dir.display()))?
            .into_iter()
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();

        if files.is_empty() {
            warn!("No frames found in {}", dir.display());
        } else {
            info!("Playing {} frames from {} at {} fps", files.len(), dir.display(), fps);
        }

        Ok(Self {
            files,
            fps,
            next_index: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Result<Frame>> {
        let path = self.files.pop_front()?;
        let index = self.next_index;
        self.next_index += 1;

        let frame = decode_file(&path).map(|image| {
            Frame::new(index, frame_timestamp(index, self.fps), Local::now(), image.to_rgb8())
        });
        Some(frame.with_context(|| format!("Failed to decode frame {}", path.display())))
    }
}

/// In-memory frames, mainly for tests and replay
#[derive(Default)]
pub struct VecSource {
    frames: VecDeque<Result<Frame>>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a frame that fails to decode
    pub fn push_error(&mut self, message: &str) {
        self.frames.push_back(Err(anyhow::anyhow!(message.to_string())));
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(Ok(frame));
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.frames.pop_front()
    }
}
