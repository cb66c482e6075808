//! Unit-norm face embeddings

use crate::error::EmbeddingError;
use crate::utils::math::{euclidean_distance, l2_normalize};

/// An L2-normalized embedding. The only way to build one is through
/// [`Embedding::new`], so every value of this type is unit-norm.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Normalize a raw engine embedding
    pub fn new(mut vector: Vec<f32>) -> Result<Self, EmbeddingError> {
        if vector.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        let norm = l2_normalize(&mut vector);
        if norm == 0.0 || !norm.is_finite() {
            return Err(EmbeddingError::ZeroNorm);
        }
        Ok(Self(vector))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Euclidean distance between two unit vectors, in `[0, 2]`
    pub fn distance(&self, other: &Embedding) -> f32 {
        euclidean_distance(&self.0, &other.0)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
