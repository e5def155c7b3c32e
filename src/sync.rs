//! Incremental synchronization of the spell registry into the vector index.
//!
//! Spells are grouped into "books": one vector collection per book, named
//! after the spell's collection directory unless the spell overrides it.
//! For each book the stored `hash` and `model` metadata are compared with
//! [`hash_text`](crate::hasher::hash_text) of the current documentation and
//! the provider's model name; only changed spells, or spells indexed by a
//! different model, are upserted, in one batch. Running a sync twice with
//! no changes writes nothing the second time.
//!
//! With `evict_stale` enabled, entries whose spell disappeared from the
//! registry are deleted, and collections that no longer correspond to any
//! book are emptied.
//!
//! A failure in one book is logged and reported; the other books still sync.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};

use magetools_core::embedding::EmbeddingProvider;
use magetools_core::store::{IndexEntry, StoredEntry, VectorCollection, VectorStore};

use crate::loader::CollectionInfo;
use crate::registry::SpellRegistry;
use crate::retry::{with_retry, RetryPolicy};
use crate::spell::Spell;

/// Reserved vector collection holding one summary entry per collection.
pub const COLLECTION_INDEX: &str = "grimoriums_index";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    pub evict_stale: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            evict_stale: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub upserted: usize,
    pub unchanged: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookOutcome {
    Synced(SyncStats),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSync {
    pub book: String,
    pub outcome: BookOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// One entry per book in the registry, in book order.
    pub books: Vec<BookSync>,
    /// Collections emptied because no book uses them any more.
    pub orphans: Vec<BookSync>,
    /// The collection summary index, when it was synced.
    pub index: Option<BookSync>,
}

impl SyncReport {
    fn all(&self) -> impl Iterator<Item = &BookSync> {
        self.books.iter().chain(&self.orphans).chain(&self.index)
    }

    /// Sum of the stats of every successful book, orphan and the index.
    pub fn totals(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for b in self.all() {
            if let BookOutcome::Synced(s) = &b.outcome {
                total.upserted += s.upserted;
                total.unchanged += s.unchanged;
                total.removed += s.removed;
            }
        }
        total
    }

    pub fn failures(&self) -> Vec<&BookSync> {
        self.all()
            .filter(|b| matches!(b.outcome, BookOutcome::Failed(_)))
            .collect()
    }

    pub fn book(&self, name: &str) -> Option<&BookSync> {
        self.books.iter().find(|b| b.book == name)
    }
}

/// Synchronizes registries into one vector store.
pub struct SpellSync {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    options: SyncOptions,
}

impl SpellSync {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    /// Sync every book of `registry`, then evict orphaned collections.
    pub async fn sync(&self, registry: &SpellRegistry) -> SyncReport {
        let books = registry.by_book();
        tracing::info!(books = books.len(), spells = registry.len(), "starting spell sync");

        let mut report = SyncReport::default();
        for (book, spells) in &books {
            let outcome = match self.sync_book(book, spells).await {
                Ok(stats) => {
                    tracing::info!(
                        book = %book,
                        upserted = stats.upserted,
                        unchanged = stats.unchanged,
                        removed = stats.removed,
                        "book synced"
                    );
                    BookOutcome::Synced(stats)
                }
                Err(e) => {
                    tracing::error!(book = %book, error = format!("{:#}", e), "book sync failed");
                    BookOutcome::Failed(format!("{:#}", e))
                }
            };
            report.books.push(BookSync {
                book: book.clone(),
                outcome,
            });
        }

        if self.options.evict_stale {
            report.orphans = self.evict_orphans(&books).await;
        }

        let totals = report.totals();
        tracing::info!(
            upserted = totals.upserted,
            unchanged = totals.unchanged,
            removed = totals.removed,
            failed = report.failures().len(),
            "spell sync complete"
        );
        report
    }

    /// [`sync`](Self::sync) followed by the collection summary index.
    pub async fn sync_with_index(
        &self,
        registry: &SpellRegistry,
        collections: &[CollectionInfo],
    ) -> SyncReport {
        let mut report = self.sync(registry).await;
        let outcome = match self.sync_collection_index(registry, collections).await {
            Ok(stats) => BookOutcome::Synced(stats),
            Err(e) => {
                tracing::error!(error = format!("{:#}", e), "collection index sync failed");
                BookOutcome::Failed(format!("{:#}", e))
            }
        };
        report.index = Some(BookSync {
            book: COLLECTION_INDEX.to_string(),
            outcome,
        });
        report
    }

    /// Whether `id` is stored with content `hash` under the current model.
    fn is_current(&self, stored: Option<&HashMap<String, StoredEntry>>, id: &str, hash: &str) -> bool {
        stored
            .and_then(|s| s.get(id))
            .is_some_and(|e| e.is_current(hash, self.embedder.model_name()))
    }

    fn entry(&self, id: &str, document: &str, hash: String) -> IndexEntry {
        IndexEntry::new(id, document, hash).with_model(self.embedder.model_name())
    }

    async fn open(&self, name: &str) -> Result<Arc<dyn VectorCollection>> {
        with_retry(&self.options.retry, "get_or_create_collection", || {
            self.store.get_or_create_collection(name, self.embedder.clone())
        })
        .await
    }

    /// Stored entries by id. A failed fetch is logged and yields `None`,
    /// which callers treat as "nothing stored yet".
    async fn stored_entries(&self, collection: &dyn VectorCollection) -> Option<HashMap<String, StoredEntry>> {
        match with_retry(&self.options.retry, "get", || collection.get(None)).await {
            Ok(entries) => Some(entries.into_iter().map(|e| (e.id.clone(), e)).collect()),
            Err(e) => {
                tracing::warn!(
                    collection = collection.name(),
                    error = format!("{:#}", e),
                    "cannot read stored hashes; re-indexing everything"
                );
                None
            }
        }
    }

    /// Upsert `staged`, then delete stored ids not in `keep`.
    async fn apply(
        &self,
        collection: &dyn VectorCollection,
        staged: Vec<IndexEntry>,
        unchanged: usize,
        stored: Option<HashMap<String, StoredEntry>>,
        keep: &BTreeSet<&str>,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats {
            unchanged,
            ..SyncStats::default()
        };

        if !staged.is_empty() {
            with_retry(&self.options.retry, "upsert", || collection.upsert(&staged)).await?;
            stats.upserted = staged.len();
        }

        if self.options.evict_stale {
            if let Some(stored) = stored {
                let mut stale: Vec<String> = stored
                    .into_keys()
                    .filter(|id| !keep.contains(id.as_str()))
                    .collect();
                if !stale.is_empty() {
                    stale.sort();
                    with_retry(&self.options.retry, "delete", || collection.delete(&stale)).await?;
                    tracing::info!(collection = collection.name(), ids = ?stale, "evicted stale entries");
                    stats.removed = stale.len();
                }
            }
        }

        Ok(stats)
    }

    async fn sync_book(&self, book: &str, spells: &[Arc<Spell>]) -> Result<SyncStats> {
        if book == COLLECTION_INDEX {
            bail!("'{}' is reserved for collection summaries", COLLECTION_INDEX);
        }

        let collection = self.open(book).await?;
        let stored = self.stored_entries(collection.as_ref()).await;

        let mut staged = Vec::new();
        let mut unchanged = 0;
        for spell in spells {
            let hash = spell.content_hash();
            if self.is_current(stored.as_ref(), &spell.qualified_name, &hash) {
                unchanged += 1;
                continue;
            }
            tracing::debug!(book, spell = %spell.qualified_name, "staging spell");
            staged.push(self.entry(&spell.qualified_name, &spell.description, hash));
        }

        let keep: BTreeSet<&str> = spells.iter().map(|s| s.qualified_name.as_str()).collect();
        self.apply(collection.as_ref(), staged, unchanged, stored, &keep)
            .await
    }

    /// Empty every stored collection that is neither a current book nor
    /// the summary index.
    async fn evict_orphans(&self, books: &BTreeMap<String, Vec<Arc<Spell>>>) -> Vec<BookSync> {
        let names = match with_retry(&self.options.retry, "list_collections", || {
            self.store.list_collections()
        })
        .await
        {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = format!("{:#}", e), "cannot list collections; skipping eviction");
                return Vec::new();
            }
        };

        let mut orphans = Vec::new();
        for name in names {
            if name == COLLECTION_INDEX || books.contains_key(&name) {
                continue;
            }
            let outcome = match self.empty_collection(&name).await {
                Ok(0) => continue,
                Ok(removed) => {
                    tracing::info!(collection = %name, removed, "emptied orphaned collection");
                    BookOutcome::Synced(SyncStats {
                        removed,
                        ..SyncStats::default()
                    })
                }
                Err(e) => {
                    tracing::warn!(collection = %name, error = format!("{:#}", e), "orphan eviction failed");
                    BookOutcome::Failed(format!("{:#}", e))
                }
            };
            orphans.push(BookSync { book: name, outcome });
        }
        orphans
    }

    async fn empty_collection(&self, name: &str) -> Result<usize> {
        let collection = with_retry(&self.options.retry, "get_collection", || {
            self.store.get_collection(name, self.embedder.clone())
        })
        .await?;
        let ids: Vec<String> = with_retry(&self.options.retry, "get", || collection.get(None))
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        if !ids.is_empty() {
            with_retry(&self.options.retry, "delete", || collection.delete(&ids)).await?;
        }
        Ok(ids.len())
    }

    /// Keep one summary entry per enabled collection in [`COLLECTION_INDEX`],
    /// keyed on the collection's content hash.
    pub async fn sync_collection_index(
        &self,
        registry: &SpellRegistry,
        collections: &[CollectionInfo],
    ) -> Result<SyncStats> {
        let index = self.open(COLLECTION_INDEX).await?;
        let stored = self.stored_entries(index.as_ref()).await;

        let spells = registry.snapshot();
        let active: Vec<&CollectionInfo> = collections.iter().filter(|c| !c.disabled).collect();

        let mut staged = Vec::new();
        let mut unchanged = 0;
        for info in &active {
            if self.is_current(stored.as_ref(), &info.name, &info.content_hash) {
                unchanged += 1;
                continue;
            }
            let docs: Vec<&Spell> = spells
                .iter()
                .filter(|s| s.collection == info.name)
                .map(|s| s.as_ref())
                .collect();
            let summary = self.summarize(info, &docs).await;
            staged.push(self.entry(&info.name, &summary, info.content_hash.clone()));
        }

        let keep: BTreeSet<&str> = active.iter().map(|c| c.name.as_str()).collect();
        let stats = self
            .apply(index.as_ref(), staged, unchanged, stored, &keep)
            .await?;
        tracing::info!(
            upserted = stats.upserted,
            unchanged = stats.unchanged,
            removed = stats.removed,
            "collection index synced"
        );
        Ok(stats)
    }

    /// Ask the provider for a summary; fall back to the raw documentation.
    async fn summarize(&self, info: &CollectionInfo, spells: &[&Spell]) -> String {
        let description = info
            .manifest
            .as_ref()
            .and_then(|m| m.description.clone())
            .unwrap_or_else(|| format!("Collection: {}", info.name));

        let mut fallback = vec![description.clone()];
        fallback.extend(
            spells
                .iter()
                .filter(|s| !s.description.is_empty())
                .map(|s| format!("{}: {}", s.name, s.description)),
        );
        let fallback = fallback.join("\n");

        let prompt = format!(
            "Summarize in two or three sentences what the tool collection '{}' can do, \
             so that it can be found by a semantic search.\n\n{}",
            info.name, fallback
        );

        let attempt = tokio::time::timeout(
            self.options.retry.call_timeout,
            self.embedder.generate_content(&prompt),
        )
        .await;
        match attempt {
            Ok(Ok(summary)) if !summary.trim().is_empty() => summary,
            Ok(Ok(_)) => fallback,
            Ok(Err(e)) => {
                tracing::debug!(collection = %info.name, error = %e, "summary generation unavailable; using documentation");
                fallback
            }
            Err(_) => {
                tracing::debug!(collection = %info.name, "summary generation timed out; using documentation");
                fallback
            }
        }
    }
}
