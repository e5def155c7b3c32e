//! TOML configuration (`magetools.toml`).
//!
//! Every section and key is optional. A missing file yields
//! [`Config::default`]; a malformed or out-of-range file is an error.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub grimorium: GrimoriumConfig,
    pub matching: MatchingConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GrimoriumConfig {
    /// Root directory whose subdirectories are collections.
    pub root: PathBuf,
    /// File extensions treated as spell scripts.
    pub extensions: Vec<String>,
    pub load_timeout_secs: u64,
    pub cast_timeout_secs: u64,
}

impl Default for GrimoriumConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".magetools"),
            extensions: vec!["lua".to_string()],
            load_timeout_secs: 5,
            cast_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MatchingConfig {
    pub top_k: usize,
    pub distance_threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: magetools_core::ranking::DEFAULT_TOP_K,
            distance_threshold: magetools_core::ranking::DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub call_timeout_secs: u64,
    pub base_delay_ms: u64,
    /// Delete index entries whose spell no longer exists.
    pub evict_stale: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            call_timeout_secs: 30,
            base_delay_ms: 200,
            evict_stale: true,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// `"sqlite"` or `"memory"`.
    pub backend: String,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from(".magetools/.index.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"disabled"`, `"openai"` or `"ollama"`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Model used by `generate_content` (collection summaries).
    pub generation_model: Option<String>,
    /// Base URL for the Ollama provider.
    pub url: Option<String>,
    /// HTTP-level retries inside the provider. Engine calls are already
    /// retried by `[sync]`, so this stays 0 unless `sync.max_retries` is 0.
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            generation_model: None,
            url: None,
            max_retries: 0,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Load and validate the config at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.grimorium.extensions.is_empty() {
            bail!("grimorium.extensions must not be empty");
        }
        if self.grimorium.load_timeout_secs == 0 {
            bail!("grimorium.load_timeout_secs must be > 0");
        }
        if self.grimorium.cast_timeout_secs == 0 {
            bail!("grimorium.cast_timeout_secs must be > 0");
        }

        if self.matching.top_k < 1 {
            bail!("matching.top_k must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.matching.distance_threshold) {
            bail!("matching.distance_threshold must be in [0.0, 2.0]");
        }

        if self.sync.call_timeout_secs == 0 {
            bail!("sync.call_timeout_secs must be > 0");
        }
        if self.embedding.max_retries > 0 && self.sync.max_retries > 0 {
            bail!("embedding.max_retries and sync.max_retries retry the same calls; set one of them to 0");
        }

        match self.store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => bail!(
                "Unknown store backend: '{}'. Must be sqlite or memory.",
                other
            ),
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        Ok(())
    }
}
