//! facewatch
//!
//! Identifies faces in a frame stream against an enrolled database and
//! records evidence for unknown faces.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use facewatch::config::Config;
use facewatch::engine::FaceAnalyzer;
use facewatch::evidence::EvidenceRecorder;
use facewatch::service::{
    EnrollmentCapture, FrameProcessor, IdentityMatcher, ImageSequenceSource, OverlayWriter,
};
use facewatch::storage::{DirectorySource, EmbeddingStore, LoadOptions, LoadReport};

#[derive(Parser, Debug)]
#[command(name = "facewatch")]
#[command(about = "Face identification with unknown-face evidence capture", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = Config::default_path())]
    config: PathBuf,

    /// Log filter, e.g. `info` or `facewatch=debug`. `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify faces in a frame sequence until it ends or Ctrl-C
    Watch {
        /// Directory of frames, overrides `source.frames_dir`
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Capture enrollment images for one person
    Enroll {
        name: String,

        /// Directory of frames, overrides `source.frames_dir`
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Load the enrollment database and print the load report as JSON
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => log_filter(&cli.log_level)?,
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting facewatch v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!("Configuration loaded from {}", cli.config.display());
    info!("  Threshold: {}", config.recognition.threshold);
    info!("  Enrollment database: {}", config.enrollment.db_path.display());
    info!("  Evidence mode: {:?}", config.evidence.mode);

    match cli.command {
        Command::Watch { frames } => watch(config, frames).await,
        Command::Enroll { name, frames } => enroll(config, name, frames).await,
        Command::Inspect => inspect(config),
    }
}

async fn watch(config: Config, frames: Option<PathBuf>) -> Result<()> {
    let analyzer = build_analyzer(&config)?;
    let (store, _) = load_store(&config, &analyzer)?;
    if store.is_empty() {
        warn!("Enrollment database is empty, every face will be Unknown");
    }

    let matcher = IdentityMatcher::new(Arc::new(store), config.threshold()?);
    let recorder = EvidenceRecorder::from_config(&config).shared();
    let overlay = config
        .output
        .annotated_dir
        .as_ref()
        .map(OverlayWriter::new)
        .transpose()?;

    let frames_dir = frames.unwrap_or_else(|| config.source.frames_dir.clone());
    let mut source = ImageSequenceSource::new(&frames_dir, config.source.fps)?;
    let mut processor = FrameProcessor::new(analyzer, matcher, recorder, overlay);

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c(cancel.clone());

    let summary = tokio::task::spawn_blocking(move || processor.run(&mut source, &cancel))
        .await
        .context("Frame loop panicked")?;

    info!("Run summary: {}", serde_json::to_string(&summary)?);
    info!("Goodbye!");
    Ok(())
}

async fn enroll(config: Config, name: String, frames: Option<PathBuf>) -> Result<()> {
    let analyzer = build_analyzer(&config)?;
    let frames_dir = frames.unwrap_or_else(|| config.source.frames_dir.clone());
    let mut source = ImageSequenceSource::new(&frames_dir, config.source.fps)?;
    let capture = EnrollmentCapture::from_config(&config.enrollment);

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c(cancel.clone());

    let summary = tokio::task::spawn_blocking(move || {
        capture.capture(&name, &analyzer, &mut source, &cancel)
    })
    .await
    .context("Enrollment capture panicked")??;

    info!("{} images saved to {}", summary.saved, summary.dir.display());
    Ok(())
}

fn inspect(config: Config) -> Result<()> {
    let analyzer = build_analyzer(&config)?;
    let (_, report) = load_store(&config, &analyzer)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_store<A: FaceAnalyzer + ?Sized>(
    config: &Config,
    analyzer: &A,
) -> Result<(EmbeddingStore, LoadReport)> {
    let source = DirectorySource::new(&config.enrollment.db_path);
    let options = LoadOptions {
        embedding_dim: config.recognition.embedding_dim,
    };
    EmbeddingStore::load(&source, analyzer, &options)
}

fn log_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level {:?}", level))
}

/// The frame loop checks the flag between frames
fn spawn_ctrl_c(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing current frame...");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

#[cfg(feature = "openvino")]
fn build_analyzer(config: &Config) -> Result<Box<dyn FaceAnalyzer>> {
    use facewatch::engine::InsightFaceAnalyzer;

    info!("  Device: {}", config.engine.device);
    let analyzer = InsightFaceAnalyzer::new(&config.engine)
        .context("Failed to initialize the face analyzer")?;
    Ok(Box::new(analyzer))
}

#[cfg(not(feature = "openvino"))]
fn build_analyzer(_config: &Config) -> Result<Box<dyn FaceAnalyzer>> {
    anyhow::bail!(
        "no face analyzer available: rebuild with `--features openvino` to enable the InsightFace engine"
    )
}
