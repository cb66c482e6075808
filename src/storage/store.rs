//! In-memory embedding database
//!
//! Built once by [`EmbeddingStore::load`] (or `from_entries`) and never
//! mutated afterwards, so an `Arc<EmbeddingStore>` can be shared by any
//! number of classifying threads without locking. Queries are a linear scan:
//! enrollment databases hold tens to low hundreds of embeddings.

use tracing::warn;

use super::embedding::Embedding;

/// Enrolled identity with its reference embeddings, in enrollment order
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityEntry {
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

/// Result of a nearest-neighbour query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest<'a> {
    /// Owning identity of the closest embedding, `None` for an empty store
    pub identity: Option<&'a str>,
    /// Distance to the closest embedding, `+inf` when nothing was compared
    pub distance: f32,
}

impl Nearest<'_> {
    pub const NONE: Nearest<'static> = Nearest {
        identity: None,
        distance: f32::INFINITY,
    };
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingStore {
    identities: Vec<IdentityEntry>,
    dimension: Option<usize>,
}

impl EmbeddingStore {
    /// An empty store: every query is Unknown
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from already normalized embeddings
    ///
    /// Identities without embeddings are dropped, duplicate names are merged
    /// into the first occurrence, and embeddings whose dimension differs from
    /// the first accepted one are discarded.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<Embedding>)>,
    {
        let mut builder = StoreBuilder::new(None);
        for (name, embeddings) in entries {
            for embedding in embeddings {
                if let Err(mismatch) = builder.push(&name, embedding) {
                    warn!(
                        "Dropping embedding for {}: dimension {} does not match {}",
                        name, mismatch.actual, mismatch.expected
                    );
                }
            }
        }
        builder.build()
    }

    /// Closest stored embedding to `query`
    ///
    /// Scans identities and their embeddings in insertion order with a strict
    /// `<`, so the first minimum encountered wins ties.
    pub fn nearest(&self, query: &Embedding) -> Nearest<'_> {
        if self.dimension.is_some_and(|dim| dim != query.dim()) {
            return Nearest::NONE;
        }

        let mut best = Nearest::NONE;
        for entry in &self.identities {
            for stored in &entry.embeddings {
                let distance = query.distance(stored);
                if distance < best.distance {
                    best = Nearest {
                        identity: Some(&entry.name),
                        distance,
                    };
                }
            }
        }
        best
    }

    /// Number of enrolled identities
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Total number of stored embeddings
    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|e| e.embeddings.len()).sum()
    }

    /// Identity names in insertion order
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|e| e.name.as_str())
    }

    pub fn entries(&self) -> &[IdentityEntry] {
        &self.identities
    }

    pub fn embeddings(&self, name: &str) -> Option<&[Embedding]> {
        self.identities
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.embeddings.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.embeddings(name).is_some()
    }

    /// Embedding dimension shared by every stored vector
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Accumulates identities while enforcing one dimension per store
pub(crate) struct StoreBuilder {
    identities: Vec<IdentityEntry>,
    dimension: Option<usize>,
}

/// Returned when an embedding does not match the store dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl StoreBuilder {
    pub(crate) fn new(dimension: Option<usize>) -> Self {
        Self {
            identities: Vec::new(),
            dimension,
        }
    }

    pub(crate) fn push(&mut self, name: &str, embedding: Embedding) -> Result<(), DimensionMismatch> {
        match self.dimension {
            Some(expected) if expected != embedding.dim() => {
                return Err(DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(embedding.dim()),
        }

        match self.identities.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.embeddings.push(embedding),
            None => self.identities.push(IdentityEntry {
                name: name.to_string(),
                embeddings: vec![embedding],
            }),
        }
        Ok(())
    }

    pub(crate) fn build(self) -> EmbeddingStore {
        let dimension = if self.identities.is_empty() { None } else { self.dimension };
        EmbeddingStore {
            identities: self.identities,
            dimension,
        }
    }
}
