//! Error taxonomy
//!
//! Configuration errors are fatal at startup. Embedding and sink errors are
//! recoverable: callers log them and keep processing frames.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid configuration, rejected before any frame is processed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid distance threshold {0}: must be finite and non-negative")]
    InvalidThreshold(f32),

    #[error("invalid {name} {value}s: must be finite and non-negative")]
    InvalidDuration { name: &'static str, value: f64 },

    #[error("invalid frame rate {0}: must be finite and positive")]
    InvalidFps(f64),

    #[error("invalid region overlap {0}: must be within [0, 1]")]
    InvalidRegionIou(f32),

    #[error("invalid embedding dimension {0}")]
    InvalidDimension(usize),

    #[error("missing path for {0}")]
    MissingPath(&'static str),
}

/// An embedding that cannot be normalized
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding is empty")]
    Empty,

    #[error("embedding contains non-finite values")]
    NonFinite,

    #[error("embedding has zero norm")]
    ZeroNorm,
}

/// Evidence write failure
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image encoding failed for {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("frame is {actual_width}x{actual_height}, sink expects {expected_width}x{expected_height}")]
    FormatMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("sink already closed")]
    Closed,

    #[error("empty crop region")]
    EmptyCrop,

    #[error("manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io { path: path.into(), source }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        SinkError::Image { path: path.into(), source }
    }
}
