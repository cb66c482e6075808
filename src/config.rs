//! Face watch configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::error::ConfigError;
use crate::service::Threshold;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// The distance threshold has no default: the operating point depends on the
/// embedding model and the number of enrollment samples.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    pub threshold: f32,
    pub embedding_dim: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub db_path: PathBuf,
    /// Interval between enrollment captures
    pub capture_interval_secs: f64,
    /// Padding around the face box in enrollment captures, in pixels
    pub capture_padding: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceMode {
    Snapshot,
    Clip,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipContainer {
    /// Numbered JPEG frames plus a JSON manifest
    Frames,
    /// Single animated GIF
    Gif,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub mode: EvidenceMode,
    pub snapshot_dir: PathBuf,
    pub cooldown_secs: f64,
    pub region_iou: f32,
    pub clip_dir: PathBuf,
    pub clip_duration_secs: f64,
    pub clip_container: ClipContainer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub frames_dir: PathBuf,
    pub fps: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    pub annotated_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub device: String,
    pub detector: PathBuf,
    pub embedder: PathBuf,
    pub detection_confidence: f32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/known_faces"),
            capture_interval_secs: 0.2,
            capture_padding: 100,
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            mode: EvidenceMode::Snapshot,
            snapshot_dir: PathBuf::from("data/unknown_faces"),
            cooldown_secs: 2.0,
            region_iou: 0.5,
            clip_dir: PathBuf::from("data/unknown_clips"),
            clip_duration_secs: 3.0,
            clip_container: ClipContainer::Frames,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            frames_dir: PathBuf::from("data/frames"),
            fps: 30.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            detector: PathBuf::from("models/det_10g.onnx"),
            embedder: PathBuf::from("models/w600k_r50.onnx"),
            detection_confidence: 0.5,
        }
    }
}

impl Config {
    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Reject invariant violations before anything runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.threshold()?;

        if let Some(dim) = self.recognition.embedding_dim {
            if dim == 0 {
                return Err(ConfigError::InvalidDimension(dim));
            }
        }

        check_secs("cooldown", self.evidence.cooldown_secs)?;
        check_secs("clip duration", self.evidence.clip_duration_secs)?;
        check_secs("capture interval", self.enrollment.capture_interval_secs)?;
        if self.evidence.clip_duration_secs == 0.0 {
            return Err(ConfigError::InvalidDuration {
                name: "clip duration",
                value: self.evidence.clip_duration_secs,
            });
        }

        let iou = self.evidence.region_iou;
        if !iou.is_finite() || !(0.0..=1.0).contains(&iou) {
            return Err(ConfigError::InvalidRegionIou(iou));
        }

        if !self.source.fps.is_finite() || self.source.fps <= 0.0 {
            return Err(ConfigError::InvalidFps(self.source.fps));
        }

        match self.evidence.mode {
            EvidenceMode::Snapshot if self.evidence.snapshot_dir.as_os_str().is_empty() => {
                return Err(ConfigError::MissingPath("evidence.snapshot_dir"));
            }
            EvidenceMode::Clip if self.evidence.clip_dir.as_os_str().is_empty() => {
                return Err(ConfigError::MissingPath("evidence.clip_dir"));
            }
            _ => {}
        }

        if self.enrollment.db_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("enrollment.db_path"));
        }

        Ok(())
    }

    pub fn threshold(&self) -> Result<Threshold, ConfigError> {
        Threshold::new(self.recognition.threshold)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.evidence.cooldown_secs)
    }

    pub fn clip_duration(&self) -> Duration {
        Duration::from_secs_f64(self.evidence.clip_duration_secs)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs_f64(self.enrollment.capture_interval_secs)
    }
}

/// Durations must be convertible by the `Duration` getters
fn check_secs(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(ConfigError::InvalidDuration { name, value })
    }
}
