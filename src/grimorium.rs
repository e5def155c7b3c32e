//! The spell toolset an agent runtime talks to.
//!
//! A [`Grimorium`] owns one registry, one allow-list and one view of the
//! vector index. It exposes two agent tools, search and execute, both
//! answering with JSON objects carrying a `status` of `success`,
//! `not_found` or `error`. Failures never surface as Rust errors there:
//! the agent gets a message it can act on.
//!
//! ```text
//! open() ─▶ discover (blocking thread) ─▶ registry.replace_all
//!        ─▶ sync books ─▶ sync collection index
//! search_spells(q) ─▶ enforcer.find ─▶ registry details
//! execute_spell(n) ─▶ enforcer.validate_access ─▶ registry.get ─▶ cast
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use magetools_core::embedding::EmbeddingProvider;
use magetools_core::models::SpellMatch;
use magetools_core::store::VectorStore;

use crate::access::AccessEnforcer;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::MagetoolsError;
use crate::loader::{discover_into, DiscoveryOptions, DiscoveryReport};
use crate::matcher::MatchOptions;
use crate::prompts::{execute_hint, USAGE_GUIDE};
use crate::registry::SpellRegistry;
use crate::sqlite_store::create_store;
use crate::sync::{SpellSync, SyncOptions, SyncReport};

#[derive(Debug, Clone)]
pub struct GrimoriumOptions {
    pub discovery: DiscoveryOptions,
    /// `None` exposes every collection.
    pub allowed_collections: Option<Vec<String>>,
    pub matching: MatchOptions,
    pub sync: SyncOptions,
}

impl GrimoriumOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            discovery: DiscoveryOptions::new(root),
            allowed_collections: None,
            matching: MatchOptions::default(),
            sync: SyncOptions::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            discovery: DiscoveryOptions::from_config(&config.grimorium),
            allowed_collections: None,
            matching: MatchOptions::from(&config.matching),
            sync: SyncOptions {
                retry: config.sync.retry_policy(),
                evict_stale: config.sync.evict_stale,
            },
        }
    }

    pub fn with_allowed_collections(mut self, allowed: Option<Vec<String>>) -> Self {
        self.allowed_collections = allowed;
        self
    }
}

/// What the last discovery and sync pass did.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub discovery: DiscoveryReport,
    pub sync: SyncReport,
}

pub struct Grimorium {
    options: GrimoriumOptions,
    registry: Arc<SpellRegistry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    sync: SpellSync,
    enforcer: AccessEnforcer,
    last: Mutex<RefreshReport>,
}

impl Grimorium {
    /// Discover the spells under the root and sync them into `store`.
    pub async fn open(
        options: GrimoriumOptions,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let sync = SpellSync::new(store.clone(), embedder.clone(), options.sync.clone());
        let enforcer = AccessEnforcer::new(
            store.clone(),
            embedder.clone(),
            options.allowed_collections.clone(),
            options.sync.retry.clone(),
        );
        let grimorium = Self {
            options,
            registry: Arc::new(SpellRegistry::new()),
            store,
            embedder,
            sync,
            enforcer,
            last: Mutex::new(RefreshReport::default()),
        };
        grimorium.refresh().await?;
        tracing::debug!(root = %grimorium.options.discovery.root.display(), "grimorium ready");
        Ok(grimorium)
    }

    /// Build the provider and store described by `config`, then [`open`](Self::open).
    pub async fn from_config(config: &Config, allowed: Option<Vec<String>>) -> Result<Self> {
        let embedder = create_provider(&config.embedding)
            .map_err(|e| MagetoolsError::Configuration(format!("{:#}", e)))?;
        let store = create_store(&config.store)
            .await
            .map_err(|e| MagetoolsError::Store(format!("{:#}", e)))?;
        let options = GrimoriumOptions::from_config(config).with_allowed_collections(allowed);
        Self::open(options, embedder, store).await
    }

    /// Re-run discovery, then sync the registry and the collection index.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let registry = self.registry.clone();
        let discovery_options = self.options.discovery.clone();
        let discovery = tokio::task::spawn_blocking(move || {
            discover_into(&registry, &discovery_options)
        })
        .await
        .map_err(|e| MagetoolsError::Discovery(e.to_string()))??;

        let sync = self
            .sync
            .sync_with_index(&self.registry, &discovery.collections)
            .await;

        let report = RefreshReport { discovery, sync };
        *self
            .last
            .lock()
            .map_err(|_| anyhow!("refresh report lock poisoned"))? = report.clone();
        Ok(report)
    }

    pub fn last_report(&self) -> RefreshReport {
        self.last.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn registry(&self) -> &SpellRegistry {
        &self.registry
    }

    pub fn allowed_collections(&self) -> Option<&[String]> {
        self.enforcer.allowed()
    }

    pub fn usage_guide(&self) -> &'static str {
        USAGE_GUIDE
    }

    /// Ranked matches visible to this toolset.
    pub async fn find(&self, query: &str) -> Vec<SpellMatch> {
        self.enforcer.find(query, self.options.matching).await
    }

    /// Ranked collection names, by their summaries.
    pub async fn find_collections(&self, query: &str) -> Vec<SpellMatch> {
        self.enforcer
            .find_collections(query, self.options.matching)
            .await
    }

    /// Search tool: spells matching `query` with their descriptions and
    /// parameter schemas.
    pub async fn search_spells(&self, query: &str) -> Value {
        tracing::debug!(query, "grimorium search");
        let matches = self.find(query).await;
        if matches.is_empty() {
            return json!({
                "status": "not_found",
                "message": "No spells found matching that description. Try a different query.",
            });
        }

        let mut spells = serde_json::Map::new();
        for m in &matches {
            let details = match self.registry.get(&m.name) {
                Some(spell) => {
                    let description = if spell.description.is_empty() {
                        "No description available."
                    } else {
                        spell.description.as_str()
                    };
                    json!({
                        "description": description,
                        "parameters": spell.parameters,
                    })
                }
                None => {
                    tracing::warn!(spell = %m.name, "indexed spell is not registered");
                    json!({"error": "Details unavailable"})
                }
            };
            spells.insert(m.name.clone(), details);
        }

        json!({
            "status": "success",
            "message": format!("Found {} potential spells.", matches.len()),
            "spells": spells,
            "ranking": matches.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "hint": execute_hint(),
        })
    }

    /// Execute tool: cast `spell_name` with `arguments` after the access
    /// check.
    pub async fn execute_spell(&self, spell_name: &str, arguments: Value) -> Value {
        tracing::info!(spell = spell_name, "grimorium casting spell");

        if !self.enforcer.validate_access(spell_name).await {
            return error_json(&MagetoolsError::AccessDenied(spell_name.to_string()), "");
        }

        let Some(spell) = self.registry.get(spell_name) else {
            return error_json(
                &MagetoolsError::SpellNotFound(spell_name.to_string()),
                ". Did you search for it first?",
            );
        };

        match spell.cast(arguments).await {
            Ok(result) => json!({"status": "success", "result": result}),
            Err(e) => {
                tracing::error!(spell = spell_name, error = format!("{:#}", e), "spell failed");
                error_json(&MagetoolsError::Execution(format!("{:#}", e)), "")
            }
        }
    }

    /// Release the store and the provider.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        self.embedder.close().await
    }
}

fn error_json(err: &MagetoolsError, suffix: &str) -> Value {
    json!({"status": "error", "message": format!("{}{}", err, suffix)})
}
