//! Enrolled identity storage

pub mod embedding;
pub mod enrollment;
pub mod store;

pub use embedding::Embedding;
pub use enrollment::{
    DirectorySource, EnrollmentIdentity, EnrollmentImage, EnrollmentSource, LoadOptions,
    LoadReport, LoadedIdentity, SkipReason, SkippedImage,
};
pub use store::{EmbeddingStore, IdentityEntry, Nearest};
