//! Enrollment: building the store from labeled sample images
//!
//! Images that cannot be read, contain no face or yield an unusable embedding
//! are skipped with a warning; identities left with no embeddings are
//! omitted. Both are recorded in the [`LoadReport`].

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::Serialize;
use tracing::{info, warn};

use super::embedding::Embedding;
use super::store::{EmbeddingStore, StoreBuilder};
use crate::engine::preprocess::{decode_file, decode_image};
use crate::engine::FaceAnalyzer;

/// File extensions accepted by [`DirectorySource`]
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

/// One enrollment sample, decoded lazily so unreadable files are skipped
/// during load rather than while listing the source
#[derive(Debug, Clone)]
pub enum EnrollmentImage {
    File(PathBuf),
    Encoded { label: String, data: Vec<u8> },
    Decoded { label: String, image: DynamicImage },
}

impl EnrollmentImage {
    pub fn label(&self) -> String {
        match self {
            EnrollmentImage::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            EnrollmentImage::Encoded { label, .. } | EnrollmentImage::Decoded { label, .. } => {
                label.clone()
            }
        }
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        match self {
            EnrollmentImage::File(path) => decode_file(path),
            EnrollmentImage::Encoded { data, .. } => decode_image(data),
            EnrollmentImage::Decoded { image, .. } => Ok(image.clone()),
        }
    }
}

/// Samples for one identity, in enrollment order
#[derive(Debug, Clone)]
pub struct EnrollmentIdentity {
    pub name: String,
    pub images: Vec<EnrollmentImage>,
}

/// Mapping from identity name to an ordered collection of sample images
pub trait EnrollmentSource {
    fn identities(&self) -> Result<Vec<EnrollmentIdentity>>;
}

impl EnrollmentSource for Vec<EnrollmentIdentity> {
    fn identities(&self) -> Result<Vec<EnrollmentIdentity>> {
        Ok(self.clone())
    }
}

/// `<root>/<name>/<image>` layout
///
/// Identity folders and image files are listed in lexical order so that two
/// loads of the same directory produce the same store.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EnrollmentSource for DirectorySource {
    fn identities(&self) -> Result<Vec<EnrollmentIdentity>> {
        if !self.root.exists() {
            warn!("Enrollment directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut people = sorted_entries(&self.root)?;
        people.retain(|p| p.is_dir());
        info!("Found {} identity folders in {}", people.len(), self.root.display());

        let mut identities = Vec::with_capacity(people.len());
        for person in people {
            let Some(name) = person.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let images = identity_images(&person);
            identities.push(EnrollmentIdentity { name, images });
        }

        Ok(identities)
    }
}

/// Image files of one identity folder
///
/// A folder that cannot be listed yields no images, so the identity ends up
/// omitted instead of failing the whole load.
fn identity_images(person: &Path) -> Vec<EnrollmentImage> {
    match sorted_entries(person) {
        Ok(entries) => entries
            .into_iter()
            .filter(|p| p.is_file() && has_image_extension(p))
            .map(EnrollmentImage::File)
            .collect(),
        Err(e) => {
            warn!("Skipping identity folder: {:#}", e);
            Vec::new()
        }
    }
}

pub(crate) fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Why an enrollment image contributed no embedding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable(String),
    EngineFailed(String),
    NoFace,
    InvalidEmbedding(String),
    DimensionMismatch { expected: usize, actual: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable(e) => write!(f, "unreadable image: {}", e),
            SkipReason::EngineFailed(e) => write!(f, "face analysis failed: {}", e),
            SkipReason::NoFace => write!(f, "no face detected"),
            SkipReason::InvalidEmbedding(e) => write!(f, "invalid embedding: {}", e),
            SkipReason::DimensionMismatch { expected, actual } => {
                write!(f, "embedding dimension {} does not match {}", actual, expected)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub identity: String,
    pub image: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedIdentity {
    pub name: String,
    pub embeddings: usize,
    pub images: usize,
}

/// What happened during [`EmbeddingStore::load`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<LoadedIdentity>,
    pub skipped: Vec<SkippedImage>,
    /// Identities whose every image was skipped
    pub omitted: Vec<String>,
}

impl LoadReport {
    pub fn embedding_count(&self) -> usize {
        self.loaded.iter().map(|l| l.embeddings).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Expected embedding dimension; the first accepted embedding sets it otherwise
    pub embedding_dim: Option<usize>,
}

impl EmbeddingStore {
    /// Build the store from an enrollment source
    ///
    /// Runs the analyzer once per image and keeps the first face's normalized
    /// embedding. Only a failure to list the source is an error.
    pub fn load<S, A>(source: &S, analyzer: &A, options: &LoadOptions) -> Result<(Self, LoadReport)>
    where
        S: EnrollmentSource + ?Sized,
        A: FaceAnalyzer + ?Sized,
    {
        let mut builder = StoreBuilder::new(options.embedding_dim);
        let mut report = LoadReport::default();

        for identity in source.identities()? {
            info!("Loading embeddings for {} ({} images)", identity.name, identity.images.len());
            let mut accepted = 0;

            for image in &identity.images {
                let label = image.label();
                let outcome = embed_first_face(image, analyzer).and_then(|embedding| {
                    builder.push(&identity.name, embedding).map_err(|m| {
                        SkipReason::DimensionMismatch {
                            expected: m.expected,
                            actual: m.actual,
                        }
                    })
                });

                match outcome {
                    Ok(()) => accepted += 1,
                    Err(reason) => {
                        warn!("Skipping {}/{}: {}", identity.name, label, reason);
                        report.skipped.push(SkippedImage {
                            identity: identity.name.clone(),
                            image: label,
                            reason,
                        });
                    }
                }
            }

            if accepted > 0 {
                info!("{}: {} embeddings added", identity.name, accepted);
                report.loaded.push(LoadedIdentity {
                    name: identity.name.clone(),
                    embeddings: accepted,
                    images: identity.images.len(),
                });
            } else {
                warn!("{}: no usable enrollment images, identity omitted", identity.name);
                report.omitted.push(identity.name.clone());
            }
        }

        let store = builder.build();
        info!(
            "Database loaded: {} identities, {} embeddings, {} images skipped, {} identities omitted",
            store.len(),
            store.embedding_count(),
            report.skipped.len(),
            report.omitted.len()
        );

        Ok((store, report))
    }
}

fn embed_first_face<A: FaceAnalyzer + ?Sized>(
    image: &EnrollmentImage,
    analyzer: &A,
) -> Result<Embedding, SkipReason> {
    let decoded = image
        .decode()
        .map_err(|e| SkipReason::Unreadable(format!("{:#}", e)))?;
    let faces = analyzer
        .detect(&decoded)
        .map_err(|e| SkipReason::EngineFailed(format!("{:#}", e)))?;
    let first = faces.into_iter().next().ok_or(SkipReason::NoFace)?;
    Embedding::new(first.embedding).map_err(|e| SkipReason::InvalidEmbedding(e.to_string()))
}
