//! Evidence sinks
//!
//! The recorders only need "create a file with this image" (snapshots) and
//! "open a clip with this format, append frames, close" (clips). The
//! filesystem implementations never overwrite an existing file: a name
//! that is taken gets a `_<n>` suffix.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, ImageFormat, RgbImage};
use serde::Serialize;
use tracing::debug;

use crate::config::ClipContainer;
use crate::error::SinkError;

/// Stem shared by all evidence files: `unknown_<YYYY-MM-DD_HH-MM-SS>`
pub fn evidence_stem(at: &DateTime<Local>) -> String {
    format!("unknown_{}", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// First of `<stem><ext>`, `<stem>_1<ext>`, ... that does not exist yet
pub fn unique_path(dir: &Path, stem: &str, extension: Option<&str>) -> PathBuf {
    let name = |suffix: Option<u32>| {
        let base = match suffix {
            Some(n) => format!("{}_{}", stem, n),
            None => stem.to_string(),
        };
        match extension {
            Some(ext) => format!("{}.{}", base, ext),
            None => base,
        }
    };

    let mut candidate = dir.join(name(None));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(name(Some(n)));
        n += 1;
    }
    candidate
}

fn ensure_dir(dir: &Path) -> Result<(), SinkError> {
    std::fs::create_dir_all(dir).map_err(|e| SinkError::io(dir, e))
}

/// Persists single still images
pub trait SnapshotSink: Send {
    fn save(&mut self, stem: &str, image: &RgbImage) -> Result<PathBuf, SinkError>;
}

/// Writes JPEG snapshots into a directory, created on first use
#[derive(Debug, Clone)]
pub struct DirectorySnapshotSink {
    dir: PathBuf,
}

impl DirectorySnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SnapshotSink for DirectorySnapshotSink {
    fn save(&mut self, stem: &str, image: &RgbImage) -> Result<PathBuf, SinkError> {
        ensure_dir(&self.dir)?;
        let path = unique_path(&self.dir, stem, Some("jpg"));
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| SinkError::image(&path, e))?;
        Ok(path)
    }
}

/// Fixed format of a clip, taken from the frame that opened it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl ClipFormat {
    pub fn check(&self, image: &RgbImage) -> Result<(), SinkError> {
        if image.dimensions() == (self.width, self.height) {
            Ok(())
        } else {
            Err(SinkError::FormatMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: image.width(),
                actual_height: image.height(),
            })
        }
    }
}

/// An open, append-only clip
pub trait ClipSink: Send {
    fn path(&self) -> &Path;

    /// Append one frame; frames must match the clip format
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), SinkError>;

    /// Flush and finalize. A second call returns `SinkError::Closed`.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Opens new clips
pub trait ClipSinkFactory: Send {
    fn open(&mut self, stem: &str, format: ClipFormat) -> Result<Box<dyn ClipSink>, SinkError>;
}

/// Opens clips under a directory in the configured container
#[derive(Debug, Clone)]
pub struct DirectoryClipFactory {
    dir: PathBuf,
    container: ClipContainer,
}

impl DirectoryClipFactory {
    pub fn new(dir: impl Into<PathBuf>, container: ClipContainer) -> Self {
        Self {
            dir: dir.into(),
            container,
        }
    }
}

impl ClipSinkFactory for DirectoryClipFactory {
    fn open(&mut self, stem: &str, format: ClipFormat) -> Result<Box<dyn ClipSink>, SinkError> {
        ensure_dir(&self.dir)?;
        match self.container {
            ClipContainer::Frames => Ok(Box::new(FrameDirClip::create(&self.dir, stem, format)?)),
            ClipContainer::Gif => Ok(Box::new(GifClip::create(&self.dir, stem, format)?)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClipManifest {
    width: u32,
    height: u32,
    fps: f64,
    frames: u64,
    frame_pattern: &'static str,
}

/// Directory of numbered JPEG frames; `clip.json` is written on close and
/// marks the clip as complete
pub struct FrameDirClip {
    dir: PathBuf,
    format: ClipFormat,
    frames: u64,
    closed: bool,
}

impl FrameDirClip {
    pub fn create(parent: &Path, stem: &str, format: ClipFormat) -> Result<Self, SinkError> {
        let dir = unique_path(parent, stem, None);
        std::fs::create_dir(&dir).map_err(|e| SinkError::io(&dir, e))?;
        debug!("Opened frame clip {}", dir.display());
        Ok(Self {
            dir,
            format,
            frames: 0,
            closed: false,
        })
    }
}

impl ClipSink for FrameDirClip {
    fn path(&self) -> &Path {
        &self.dir
    }

    fn write_frame(&mut self, image: &RgbImage) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.format.check(image)?;
        let path = self.dir.join(format!("frame_{:06}.jpg", self.frames + 1));
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| SinkError::image(&path, e))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.closed = true;

        let manifest = ClipManifest {
            width: self.format.width,
            height: self.format.height,
            fps: self.format.fps,
            frames: self.frames,
            frame_pattern: "frame_%06d.jpg",
        };
        let path = self.dir.join("clip.json");
        let json = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&path, json).map_err(|e| SinkError::io(&path, e))?;
        Ok(())
    }
}

/// Single animated GIF, looping, frame delay derived from the clip fps
pub struct GifClip {
    path: PathBuf,
    format: ClipFormat,
    delay: Delay,
    encoder: Option<GifEncoder<BufWriter<File>>>,
}

impl GifClip {
    pub fn create(dir: &Path, stem: &str, format: ClipFormat) -> Result<Self, SinkError> {
        let path = unique_path(dir, stem, Some("gif"));
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| SinkError::io(&path, e))?;

        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| SinkError::image(&path, e))?;

        let fps = format.fps.round().max(1.0) as u32;
        debug!("Opened GIF clip {}", path.display());
        Ok(Self {
            path,
            format,
            delay: Delay::from_numer_denom_ms(1000, fps),
            encoder: Some(encoder),
        })
    }
}

impl ClipSink for GifClip {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, image: &RgbImage) -> Result<(), SinkError> {
        let encoder = self.encoder.as_mut().ok_or(SinkError::Closed)?;
        self.format.check(image)?;
        let rgba = DynamicImage::ImageRgb8(image.clone()).to_rgba8();
        encoder
            .encode_frame(image::Frame::from_parts(rgba, 0, 0, self.delay))
            .map_err(|e| SinkError::image(&self.path, e))
    }

    fn close(&mut self) -> Result<(), SinkError> {
        // Dropping the encoder writes the GIF trailer
        let encoder = self.encoder.take().ok_or(SinkError::Closed)?;
        drop(encoder);
        Ok(())
    }
}

impl Drop for GifClip {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
