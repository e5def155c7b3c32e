//! In-memory [`VectorStore`] implementation for tests and embedding use.
//!
//! Collections live in a `BTreeMap` behind `std::sync::RwLock`; entries keep
//! insertion order. Queries are brute-force cosine distance over every
//! stored vector.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_distance, embed_one, EmbeddingProvider};

use super::{IndexEntry, Metadata, QueryHit, StoredEntry, VectorCollection, VectorStore};

struct StoredRow {
    id: String,
    document: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

type Rows = Arc<RwLock<Vec<StoredRow>>>;

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<BTreeMap<String, (u64, Rows)>>,
    next_seq: RwLock<u64>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            next_seq: RwLock::new(0),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>> {
        let rows = {
            let mut collections = write(&self.collections)?;
            match collections.get(name) {
                Some((_, rows)) => rows.clone(),
                None => {
                    let mut seq = write(&self.next_seq)?;
                    let rows: Rows = Arc::new(RwLock::new(Vec::new()));
                    collections.insert(name.to_string(), (*seq, rows.clone()));
                    *seq += 1;
                    rows
                }
            }
        };
        Ok(Arc::new(InMemoryCollection {
            name: name.to_string(),
            rows,
            embedder,
        }))
    }

    async fn get_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>> {
        let rows = match read(&self.collections)?.get(name) {
            Some((_, rows)) => rows.clone(),
            None => bail!("collection '{}' does not exist", name),
        };
        Ok(Arc::new(InMemoryCollection {
            name: name.to_string(),
            rows,
            embedder,
        }))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = read(&self.collections)?;
        let mut named: Vec<(u64, &String)> =
            collections.iter().map(|(name, (seq, _))| (*seq, name)).collect();
        named.sort_by_key(|(seq, _)| *seq);
        Ok(named.into_iter().map(|(_, name)| name.clone()).collect())
    }
}

struct InMemoryCollection {
    name: String,
    rows: Rows,
    embedder: Arc<dyn EmbeddingProvider>,
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = entries.iter().map(|e| e.document.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != entries.len() {
            bail!(
                "embedding provider returned {} vectors for {} documents",
                vectors.len(),
                entries.len()
            );
        }

        let mut rows = write(&self.rows)?;
        for (entry, vector) in entries.iter().zip(vectors) {
            let row = StoredRow {
                id: entry.id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                vector,
            };
            match rows.iter_mut().find(|r| r.id == entry.id) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
        }
        Ok(())
    }

    async fn query(&self, text: &str, n_results: usize) -> Result<Vec<QueryHit>> {
        let query_vec = embed_one(self.embedder.as_ref(), text).await?;
        let rows = read(&self.rows)?;
        let mut hits: Vec<QueryHit> = rows
            .iter()
            .map(|r| QueryHit {
                id: r.id.clone(),
                distance: cosine_distance(&query_vec, &r.vector),
                document: r.document.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn get(&self, ids: Option<&[String]>) -> Result<Vec<StoredEntry>> {
        let rows = read(&self.rows)?;
        let entries = rows
            .iter()
            .filter(|r| ids.map_or(true, |ids| ids.contains(&r.id)))
            .map(|r| StoredEntry {
                id: r.id.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(entries)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        write(&self.rows)?.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(read(&self.rows)?.len())
    }
}
