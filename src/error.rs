/// Errors surfaced by the Magetools engine.
///
/// Most internal plumbing uses `anyhow`; these variants name the failure
/// classes that callers (the CLI and the toolset facade) report on.
#[derive(Debug, thiserror::Error)]
pub enum MagetoolsError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("quarantined {path}: {reason}")]
    Quarantine { path: String, reason: String },

    #[error("vector store error: {0}")]
    Store(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("Permission denied: spell '{0}' is not in an allowed collection")]
    AccessDenied(String),

    #[error("Spell '{0}' not found")]
    SpellNotFound(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
