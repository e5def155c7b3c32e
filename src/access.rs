//! Collection allow-lists.
//!
//! A toolset may be limited to a set of collections. The same list gates
//! both search (only allowed collections are queried) and casting (the spell
//! must be indexed in one of them).

use std::sync::Arc;

use magetools_core::embedding::EmbeddingProvider;
use magetools_core::models::SpellMatch;
use magetools_core::store::VectorStore;

use crate::matcher::{MatchOptions, SpellMatcher};
use crate::retry::{with_retry, RetryPolicy};
use crate::sync::COLLECTION_INDEX;

/// Whether `name` is indexed in one of the `allowed` collections.
///
/// `None` means unrestricted. Collections that cannot be opened or read are
/// skipped, so a store failure denies rather than grants access.
pub async fn validate_access(
    store: &dyn VectorStore,
    embedder: &Arc<dyn EmbeddingProvider>,
    name: &str,
    allowed: Option<&[String]>,
    retry: &RetryPolicy,
) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };

    let ids = [name.to_string()];
    for collection_name in allowed {
        if collection_name == COLLECTION_INDEX {
            continue;
        }
        let found = async {
            let collection = with_retry(retry, "get_collection", || {
                store.get_collection(collection_name, embedder.clone())
            })
            .await?;
            with_retry(retry, "get", || collection.get(Some(&ids[..]))).await
        }
        .await;

        match found {
            Ok(entries) if entries.iter().any(|e| e.id == name) => return true,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(collection = %collection_name, error = format!("{:#}", e), "skipping collection in access check");
            }
        }
    }

    tracing::warn!(spell = name, allowed = ?allowed, "access denied: spell not found in allowed collections");
    false
}

/// A matcher bound to one allow-list.
pub struct AccessEnforcer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    allowed: Option<Vec<String>>,
    retry: RetryPolicy,
    matcher: SpellMatcher,
}

impl AccessEnforcer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        allowed: Option<Vec<String>>,
        retry: RetryPolicy,
    ) -> Self {
        let matcher = SpellMatcher::new(store.clone(), embedder.clone(), retry.clone());
        Self {
            store,
            embedder,
            allowed,
            retry,
            matcher,
        }
    }

    pub fn allowed(&self) -> Option<&[String]> {
        self.allowed.as_deref()
    }

    pub async fn validate_access(&self, name: &str) -> bool {
        validate_access(
            self.store.as_ref(),
            &self.embedder,
            name,
            self.allowed(),
            &self.retry,
        )
        .await
    }

    /// Search restricted to the allowed collections.
    pub async fn find(&self, query: &str, options: MatchOptions) -> Vec<SpellMatch> {
        self.matcher
            .find_scored(query, self.allowed(), options)
            .await
    }

    pub async fn find_collections(&self, query: &str, options: MatchOptions) -> Vec<SpellMatch> {
        self.matcher
            .find_collections(query, self.allowed(), options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use magetools_core::store::memory::InMemoryVectorStore;
    use magetools_core::store::IndexEntry;
    use std::time::Duration;

    struct Flat;

    #[async_trait]
    impl EmbeddingProvider for Flat {
        fn model_name(&self) -> &str {
            "flat"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            call_timeout: Duration::from_secs(5),
            base_delay: Duration::from_millis(1),
        }
    }

    async fn enforcer(allowed: Option<Vec<String>>) -> AccessEnforcer {
        let store = Arc::new(InMemoryVectorStore::new());
        for (col, id) in [("weather", "weather.get_forecast"), ("other", "other.secret_spell")] {
            store
                .get_or_create_collection(col, Arc::new(Flat))
                .await
                .unwrap()
                .upsert(&[IndexEntry::new(id, "doc", "h")])
                .await
                .unwrap();
        }
        AccessEnforcer::new(store, Arc::new(Flat), allowed, policy())
    }

    #[tokio::test]
    async fn test_allow_list() {
        let e = enforcer(Some(vec!["weather".into()])).await;
        assert!(e.validate_access("weather.get_forecast").await);
        assert!(!e.validate_access("other.secret_spell").await);
        assert!(!e.validate_access("weather.missing").await);
    }

    #[tokio::test]
    async fn test_unrestricted() {
        let e = enforcer(None).await;
        assert!(e.validate_access("other.secret_spell").await);
        assert!(e.validate_access("anything.at_all").await);
    }

    #[tokio::test]
    async fn test_unknown_allowed_collection_is_skipped() {
        let e = enforcer(Some(vec!["nope".into(), "weather".into()])).await;
        assert!(e.validate_access("weather.get_forecast").await);
    }

    #[tokio::test]
    async fn test_search_hides_disallowed() {
        let e = enforcer(Some(vec!["weather".into()])).await;
        let found = e.find("doc", MatchOptions::default()).await;
        let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["weather.get_forecast"]);
    }
}
