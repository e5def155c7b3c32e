//! Vector index abstraction for Magetools.
//!
//! The [`VectorStore`] trait is the only persistence the engine needs: named
//! collections of `(id, document, metadata)` entries that can answer
//! "nearest neighbors of this text". Spell documentation is embedded by the
//! [`EmbeddingProvider`] handed to the store when a collection is opened.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Backend | Crate | Notes |
//! |---------|-------|-------|
//! | [`memory::InMemoryVectorStore`] | `magetools-core` | brute-force cosine, tests |
//! | `SqliteVectorStore` | `magetools` | sqlx + SQLite, persisted |

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;

/// Per-entry metadata. The engine writes the keys `name`, `hash` and `model`.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the entry's display name.
pub const META_NAME: &str = "name";
/// Metadata key holding the entry's content hash.
pub const META_HASH: &str = "hash";
/// Metadata key holding the embedding model the entry was indexed with.
pub const META_MODEL: &str = "model";

/// An entry to insert or replace in a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    /// Text that is embedded and matched against queries.
    pub document: String,
    pub metadata: Metadata,
}

impl IndexEntry {
    /// Build an entry carrying the standard `name`/`hash` metadata.
    pub fn new(id: impl Into<String>, document: impl Into<String>, hash: impl Into<String>) -> Self {
        let id = id.into();
        let mut metadata = Metadata::new();
        metadata.insert(META_NAME.to_string(), id.clone());
        metadata.insert(META_HASH.to_string(), hash.into());
        Self {
            id,
            document: document.into(),
            metadata,
        }
    }

    /// Record the embedding model that indexes this entry.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.metadata.insert(META_MODEL.to_string(), model.into());
        self
    }
}

/// One nearest-neighbor result. Lower distance is more relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub distance: f32,
    pub document: String,
}

/// A stored entry as returned by [`VectorCollection::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub metadata: Metadata,
}

impl StoredEntry {
    /// The stored content hash, if any.
    pub fn hash(&self) -> Option<&str> {
        self.metadata.get(META_HASH).map(String::as_str)
    }

    /// The embedding model the entry was indexed with, if recorded.
    pub fn model(&self) -> Option<&str> {
        self.metadata.get(META_MODEL).map(String::as_str)
    }

    /// Whether the entry was indexed from content `hash` by `model`.
    pub fn is_current(&self, hash: &str, model: &str) -> bool {
        self.hash() == Some(hash) && self.model() == Some(model)
    }
}

/// A named collection inside a [`VectorStore`].
///
/// A handle is bound to the embedding provider it was opened with; upserts
/// embed `document` text and queries embed the query text with it.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace entries by id.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Up to `n_results` nearest entries to `text`, ascending by distance.
    async fn query(&self, text: &str, n_results: usize) -> Result<Vec<QueryHit>>;

    /// Fetch entries by id, or every entry when `ids` is `None`.
    /// Unknown ids are silently skipped.
    async fn get(&self, ids: Option<&[String]>) -> Result<Vec<StoredEntry>>;

    /// Delete entries by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

/// Abstract vector index backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Open `name`, creating it if absent.
    async fn get_or_create_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>>;

    /// Open an existing collection. Errors if `name` does not exist.
    async fn get_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>>;

    /// Names of all collections, in creation order.
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_currency_needs_hash_and_model() {
        let entry = IndexEntry::new("weather.forecast", "Forecast", "h1").with_model("small");
        let stored = StoredEntry {
            id: entry.id.clone(),
            metadata: entry.metadata.clone(),
        };
        assert!(stored.is_current("h1", "small"));
        assert!(!stored.is_current("h2", "small"));
        assert!(!stored.is_current("h1", "large"));

        let legacy = StoredEntry {
            id: "weather.forecast".into(),
            metadata: IndexEntry::new("weather.forecast", "Forecast", "h1").metadata,
        };
        assert_eq!(legacy.model(), None);
        assert!(!legacy.is_current("h1", "small"));
    }
}
