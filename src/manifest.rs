//! Reading and scaffolding collection manifests on disk.
//!
//! The policy itself lives in [`magetools_core::manifest`]; this module adds
//! the filesystem side: lenient loading and `magetools init`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::error::MagetoolsError;

pub use magetools_core::manifest::{is_allowed, parse_manifest, Manifest, MANIFEST_FILE_NAME};

/// Load `<dir>/manifest.json`.
///
/// A missing file is normal and yields `None`. Unreadable or malformed
/// files also yield `None` (no restriction) but are logged.
pub fn load_manifest(dir: &Path) -> Option<Manifest> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.is_file() {
        return None;
    }

    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read manifest; treating as absent");
            return None;
        }
    };

    let manifest = parse_manifest(&text);
    if manifest.is_none() {
        tracing::warn!(path = %path.display(), "malformed manifest; treating as absent");
    }
    manifest
}

/// Write a default manifest into an existing collection directory.
///
/// Refuses to overwrite an existing manifest unless `force` is set.
/// Returns the manifest path.
pub fn init_collection(dir: &Path, force: bool) -> Result<PathBuf> {
    if !dir.is_dir() {
        bail!("Collection directory does not exist: {}", dir.display());
    }

    let path = dir.join(MANIFEST_FILE_NAME);
    if path.exists() && !force {
        bail!(
            "Manifest already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    let name = collection_name(dir)?;
    let manifest = Manifest::scaffold(&name);
    let text = serde_json::to_string_pretty(&manifest).map_err(MagetoolsError::Json)?;
    std::fs::write(&path, text + "\n")
        .map_err(MagetoolsError::Io)
        .with_context(|| format!("Failed to write manifest: {}", path.display()))?;

    tracing::info!(collection = %name, path = %path.display(), "manifest written");
    Ok(path)
}

/// The collection name of a directory: its final path component.
fn collection_name(dir: &Path) -> Result<String> {
    let resolved = dir
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", dir.display()))?;
    resolved
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Cannot derive a collection name from {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_manifest(tmp.path()).is_none());
    }

    #[test]
    fn test_load_malformed_is_none() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE_NAME), "{ invalid json }").unwrap();
        assert!(load_manifest(tmp.path()).is_none());

        std::fs::write(tmp.path().join(MANIFEST_FILE_NAME), r#"["not", "object"]"#).unwrap();
        assert!(load_manifest(tmp.path()).is_none());
    }

    #[test]
    fn test_load_valid() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(MANIFEST_FILE_NAME),
            r#"{"enabled": true, "blacklist": ["secret"]}"#,
        )
        .unwrap();
        let m = load_manifest(tmp.path()).unwrap();
        assert!(!is_allowed("secret", Some(&m)));
        assert!(is_allowed("open", Some(&m)));
    }

    #[test]
    fn test_init_writes_scaffold() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("weather");
        std::fs::create_dir(&dir).unwrap();

        let path = init_collection(&dir, false).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["enabled"], true);
        assert_eq!(value["description"], "Collection: weather");
    }

    #[test]
    fn test_init_write_failure_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        // A directory where the manifest should go cannot be overwritten.
        std::fs::create_dir(tmp.path().join(MANIFEST_FILE_NAME)).unwrap();

        let err = init_collection(tmp.path(), true).unwrap_err();
        assert!(err.to_string().starts_with("Failed to write manifest"));
        assert!(matches!(
            err.downcast_ref::<MagetoolsError>(),
            Some(MagetoolsError::Io(_))
        ));
    }

    #[test]
    fn test_init_refuses_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE_NAME), r#"{"enabled": false}"#).unwrap();

        let err = init_collection(tmp.path(), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        init_collection(tmp.path(), true).unwrap();
        assert!(load_manifest(tmp.path()).unwrap().enabled);
    }

    #[test]
    fn test_init_missing_dir_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(init_collection(&tmp.path().join("absent"), false).is_err());
    }
}
