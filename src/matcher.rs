//! Semantic spell matching across every indexed collection.
//!
//! Each eligible vector collection is asked for its nearest neighbors of the
//! query; the answers are merged and ranked by
//! [`rank_matches`](magetools_core::ranking::rank_matches). A collection that
//! fails to answer contributes nothing and the search carries on.

use std::sync::Arc;

use magetools_core::embedding::EmbeddingProvider;
use magetools_core::models::SpellMatch;
use magetools_core::ranking::{rank_matches, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_TOP_K};
use magetools_core::store::VectorStore;

use crate::config::MatchingConfig;
use crate::retry::{with_retry, RetryPolicy};
use crate::sync::COLLECTION_INDEX;

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub top_k: usize,
    pub distance_threshold: f32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

impl From<&MatchingConfig> for MatchOptions {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            top_k: config.top_k,
            distance_threshold: config.distance_threshold,
        }
    }
}

pub struct SpellMatcher {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl SpellMatcher {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            retry,
        }
    }

    /// Ranked qualified names of the spells matching `query`.
    pub async fn find(
        &self,
        query: &str,
        allowed: Option<&[String]>,
        options: MatchOptions,
    ) -> Vec<String> {
        self.find_scored(query, allowed, options)
            .await
            .into_iter()
            .map(|m| m.name)
            .collect()
    }

    /// Like [`find`](Self::find), keeping the distances.
    ///
    /// `allowed` restricts which collections are queried at all; `None`
    /// means every collection. A blank query yields no matches.
    pub async fn find_scored(
        &self,
        query: &str,
        allowed: Option<&[String]>,
        options: MatchOptions,
    ) -> Vec<SpellMatch> {
        if query.trim().is_empty() {
            tracing::warn!("ignoring blank spell query");
            return Vec::new();
        }
        let preview: String = query.chars().take(50).collect();
        tracing::info!(query = %preview, "searching for spells");

        let names = match with_retry(&self.retry, "list_collections", || {
            self.store.list_collections()
        })
        .await
        {
            Ok(names) => names,
            Err(e) => {
                tracing::error!(error = format!("{:#}", e), "failed to list collections");
                return Vec::new();
            }
        };

        let eligible = names.into_iter().filter(|name| {
            name != COLLECTION_INDEX && allowed.map_or(true, |a| a.iter().any(|c| c == name))
        });

        let mut candidates = Vec::new();
        for name in eligible {
            candidates.extend(self.query_collection(&name, query, options.top_k).await);
        }

        let ranked = rank_matches(candidates, options.distance_threshold, options.top_k);
        tracing::debug!(matches = ?ranked, "ranked spell matches");
        ranked
    }

    /// Rank collection names by their summaries.
    pub async fn find_collections(
        &self,
        query: &str,
        allowed: Option<&[String]>,
        options: MatchOptions,
    ) -> Vec<SpellMatch> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let candidates = self
            .query_collection(COLLECTION_INDEX, query, options.top_k)
            .await
            .into_iter()
            .filter(|(id, _)| allowed.map_or(true, |a| a.contains(id)));
        rank_matches(candidates, options.distance_threshold, options.top_k)
    }

    /// `(id, distance)` pairs from one collection; empty on failure.
    async fn query_collection(&self, name: &str, query: &str, n: usize) -> Vec<(String, f32)> {
        let result = async {
            let collection = with_retry(&self.retry, "get_collection", || {
                self.store.get_collection(name, self.embedder.clone())
            })
            .await?;
            with_retry(&self.retry, "query", || collection.query(query, n)).await
        }
        .await;

        match result {
            Ok(hits) => hits.into_iter().map(|h| (h.id, h.distance)).collect(),
            Err(e) => {
                tracing::warn!(collection = name, error = format!("{:#}", e), "failed to search collection");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use magetools_core::store::memory::InMemoryVectorStore;
    use magetools_core::store::{IndexEntry, VectorCollection};
    use std::time::Duration;

    /// Two axes: "sun" words and "rain" words.
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let sun = t.matches("sun").count() as f32;
                    let rain = t.matches("rain").count() as f32;
                    vec![sun, rain]
                })
                .collect())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            call_timeout: Duration::from_secs(5),
            base_delay: Duration::from_millis(1),
        }
    }

    async fn seed(store: &InMemoryVectorStore, collection: &str, entries: &[(&str, &str)]) {
        let col = store
            .get_or_create_collection(collection, Arc::new(AxisEmbedder))
            .await
            .unwrap();
        let entries: Vec<IndexEntry> = entries
            .iter()
            .map(|(id, doc)| IndexEntry::new(*id, *doc, "h"))
            .collect();
        col.upsert(&entries).await.unwrap();
    }

    async fn matcher() -> SpellMatcher {
        let store = Arc::new(InMemoryVectorStore::new());
        seed(&store, "weather", &[("weather.sunny", "sun sun"), ("weather.wet", "rain")]).await;
        seed(&store, "garden", &[("garden.water", "rain rain sun")]).await;
        SpellMatcher::new(store, Arc::new(AxisEmbedder), policy())
    }

    #[tokio::test]
    async fn test_blank_query_is_empty() {
        let m = matcher().await;
        assert!(m.find("", None, MatchOptions::default()).await.is_empty());
        assert!(m.find("   ", None, MatchOptions::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_filters_unrelated() {
        let m = matcher().await;
        let names = m.find("sun", None, MatchOptions::default()).await;
        assert_eq!(names, vec!["weather.sunny"]);
    }

    #[tokio::test]
    async fn test_ranked_across_collections() {
        let m = matcher().await;
        let opts = MatchOptions {
            top_k: 5,
            distance_threshold: 2.0,
        };
        let scored = m.find_scored("rain", None, opts).await;
        let names: Vec<&str> = scored.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["weather.wet", "garden.water", "weather.sunny"]);
        assert!(scored.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_allowed_restricts_collections() {
        let m = matcher().await;
        let allowed = vec!["garden".to_string()];
        let opts = MatchOptions {
            top_k: 5,
            distance_threshold: 2.0,
        };
        let names = m.find("rain", Some(&allowed), opts).await;
        assert_eq!(names, vec!["garden.water"]);

        let none: Vec<String> = Vec::new();
        assert!(m.find("rain", Some(&none), opts).await.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let m = matcher().await;
        let opts = MatchOptions {
            top_k: 1,
            distance_threshold: 2.0,
        };
        assert_eq!(m.find("rain", None, opts).await, vec!["weather.wet"]);
    }

    #[tokio::test]
    async fn test_summary_index_not_searched_for_spells() {
        let store = Arc::new(InMemoryVectorStore::new());
        seed(&store, COLLECTION_INDEX, &[("weather", "sun")]).await;
        let m = SpellMatcher::new(store, Arc::new(AxisEmbedder), policy());
        assert!(m.find("sun", None, MatchOptions::default()).await.is_empty());
        let cols = m.find_collections("sun", None, MatchOptions::default()).await;
        assert_eq!(cols[0].name, "weather");
    }

    /// A store whose second collection cannot be opened.
    struct HalfBroken(InMemoryVectorStore);

    #[async_trait]
    impl VectorStore for HalfBroken {
        async fn get_or_create_collection(
            &self,
            name: &str,
            embedder: Arc<dyn EmbeddingProvider>,
        ) -> Result<Arc<dyn VectorCollection>> {
            self.0.get_or_create_collection(name, embedder).await
        }
        async fn get_collection(
            &self,
            name: &str,
            embedder: Arc<dyn EmbeddingProvider>,
        ) -> Result<Arc<dyn VectorCollection>> {
            if name == "garden" {
                bail!("connection reset");
            }
            self.0.get_collection(name, embedder).await
        }
        async fn list_collections(&self) -> Result<Vec<String>> {
            self.0.list_collections().await
        }
    }

    #[tokio::test]
    async fn test_failing_collection_contributes_nothing() {
        let inner = InMemoryVectorStore::new();
        seed(&inner, "weather", &[("weather.wet", "rain")]).await;
        seed(&inner, "garden", &[("garden.water", "rain")]).await;
        let m = SpellMatcher::new(Arc::new(HalfBroken(inner)), Arc::new(AxisEmbedder), policy());
        assert_eq!(
            m.find("rain", None, MatchOptions::default()).await,
            vec!["weather.wet"]
        );
    }
}
