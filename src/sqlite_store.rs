//! SQLite-backed [`VectorStore`] implementation.
//!
//! Collections are rows of `index_collections`; entries live in
//! `index_entries` keyed by `(collection, id)`, with the embedding stored as
//! a little-endian `f32` BLOB. Queries load a collection's vectors and rank
//! them by cosine distance in process.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use magetools_core::embedding::{blob_to_vec, cosine_distance, embed_one, vec_to_blob, EmbeddingProvider};
use magetools_core::store::memory::InMemoryVectorStore;
use magetools_core::store::{IndexEntry, Metadata, QueryHit, StoredEntry, VectorCollection, VectorStore};

use crate::config::StoreConfig;
use crate::db;
use crate::error::MagetoolsError;

/// Build the store named by `config.backend`.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "sqlite" => Ok(Arc::new(SqliteVectorStore::open(&config.path).await?)),
        other => bail!("Unknown store backend: {}", other),
    }
}

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        db::run_migrations(&pool).await?;
        tracing::debug!(path = %path.display(), "sqlite vector store open");
        Ok(Self { pool })
    }

    /// Wrap an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM index_collections WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    fn collection(&self, name: &str, embedder: Arc<dyn EmbeddingProvider>) -> Arc<dyn VectorCollection> {
        Arc::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
            embedder,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn get_or_create_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>> {
        sqlx::query("INSERT OR IGNORE INTO index_collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(self.collection(name, embedder))
    }

    async fn get_collection(
        &self,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<dyn VectorCollection>> {
        if !self.exists(name).await? {
            bail!("Collection '{}' does not exist", name);
        }
        Ok(self.collection(name, embedder))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM index_collections ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

#[async_trait]
impl VectorCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let documents: Vec<String> = entries.iter().map(|e| e.document.clone()).collect();
        let vectors = self
            .embedder
            .embed(&documents)
            .await
            .map_err(|e| MagetoolsError::Embedding(format!("{:#}", e)))?;
        if vectors.len() != entries.len() {
            bail!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                entries.len()
            );
        }

        let now = chrono::Utc::now().timestamp();
        let model = self.embedder.model_name();
        let mut tx = self.pool.begin().await?;
        for (entry, vector) in entries.iter().zip(&vectors) {
            let metadata_json = serde_json::to_string(&entry.metadata).map_err(MagetoolsError::Json)?;
            sqlx::query(
                r#"
                INSERT INTO index_entries (collection, id, document, metadata_json, embedding, model, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.name)
            .bind(&entry.id)
            .bind(&entry.document)
            .bind(&metadata_json)
            .bind(vec_to_blob(vector))
            .bind(model)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, text: &str, n_results: usize) -> Result<Vec<QueryHit>> {
        let query_vec = embed_one(self.embedder.as_ref(), text)
            .await
            .map_err(|e| MagetoolsError::Embedding(format!("{:#}", e)))?;

        let rows = sqlx::query(
            "SELECT id, document, embedding FROM index_entries WHERE collection = ? ORDER BY rowid",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<QueryHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                QueryHit {
                    id: row.get("id"),
                    distance: cosine_distance(&query_vec, &blob_to_vec(&blob)),
                    document: row.get("document"),
                }
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
        let rows = sqlx::query(
            "SELECT id, metadata_json FROM index_entries WHERE collection = ? ORDER BY rowid",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let wanted: Option<BTreeSet<&str>> = ids.map(|ids| ids.iter().map(String::as_str).collect());
        let mut entries = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            if wanted.as_ref().is_some_and(|w| !w.contains(id.as_str())) {
                continue;
            }
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(MagetoolsError::Json)
                .with_context(|| format!("corrupt metadata for entry '{}'", id))?;
            entries.push(StoredEntry { id, metadata });
        }
        Ok(entries)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM index_entries WHERE collection = ? AND id = ?")
                .bind(&self.name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Letters;

    #[async_trait]
    impl EmbeddingProvider for Letters {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.matches('a').count() as f32, t.matches('b').count() as f32])
                .collect())
        }
    }

    async fn store(tmp: &TempDir) -> SqliteVectorStore {
        SqliteVectorStore::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_persists() {
        let tmp = TempDir::new().unwrap();
        {
            let s = store(&tmp).await;
            let col = s.get_or_create_collection("weather", Arc::new(Letters)).await.unwrap();
            col.upsert(&[
                IndexEntry::new("weather.a", "aaa", "h1"),
                IndexEntry::new("weather.b", "bbb", "h2"),
            ])
            .await
            .unwrap();
            s.close().await.unwrap();
        }

        let s = store(&tmp).await;
        assert_eq!(s.list_collections().await.unwrap(), vec!["weather"]);
        let col = s.get_collection("weather", Arc::new(Letters)).await.unwrap();
        assert_eq!(col.count().await.unwrap(), 2);

        let hits = col.query("a", 1).await.unwrap();
        assert_eq!(hits[0].id, "weather.a");
        assert!(hits[0].distance < 1e-6);
        assert_eq!(hits[0].document, "aaa");

        let got = col.get(Some(&["weather.b".to_string()][..])).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].hash(), Some("h2"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_removes() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let col = s.get_or_create_collection("c", Arc::new(Letters)).await.unwrap();
        col.upsert(&[IndexEntry::new("c.x", "aaa", "h1")]).await.unwrap();
        col.upsert(&[IndexEntry::new("c.x", "bbb", "h2")]).await.unwrap();
        assert_eq!(col.count().await.unwrap(), 1);
        assert_eq!(col.query("b", 1).await.unwrap()[0].document, "bbb");

        col.delete(&["c.x".to_string(), "c.unknown".to_string()]).await.unwrap();
        assert_eq!(col.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_a_json_error() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let s = SqliteVectorStore::new(pool.clone());
        let col = s.get_or_create_collection("weather", Arc::new(Letters)).await.unwrap();
        col.upsert(&[IndexEntry::new("weather.a", "aaa", "h1")]).await.unwrap();

        sqlx::query("UPDATE index_entries SET metadata_json = 'not json'")
            .execute(&pool)
            .await
            .unwrap();

        let err = col.get(None).await.unwrap_err();
        assert!(err.to_string().contains("corrupt metadata for entry 'weather.a'"));
        assert!(matches!(
            err.downcast_ref::<MagetoolsError>(),
            Some(MagetoolsError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_collection_errors() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        assert!(s.get_collection("absent", Arc::new(Letters)).await.is_err());
    }

    #[tokio::test]
    async fn test_collections_listed_in_creation_order() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        for name in ["zeta", "alpha", "mid"] {
            s.get_or_create_collection(name, Arc::new(Letters)).await.unwrap();
        }
        s.get_or_create_collection("alpha", Arc::new(Letters)).await.unwrap();
        assert_eq!(s.list_collections().await.unwrap(), vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_create_store_backends() {
        let tmp = TempDir::new().unwrap();
        let memory = create_store(&StoreConfig {
            backend: "memory".into(),
            path: tmp.path().join("unused"),
        })
        .await
        .unwrap();
        assert!(memory.list_collections().await.unwrap().is_empty());

        let bad = create_store(&StoreConfig {
            backend: "chroma".into(),
            path: tmp.path().join("x"),
        })
        .await;
        assert!(bad.is_err());
    }
}
