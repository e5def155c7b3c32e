//! Content fingerprints for change detection.
//!
//! [`hash_collection`] digests the spell sources of one collection
//! directory; [`hash_text`] digests a single spell's documentation. Both are
//! SHA-256 hex strings. Files and directories whose name starts with `.` or
//! `_` are private and never contribute.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use magetools_core::manifest::MANIFEST_FILE_NAME;

/// Digest of zero bytes; what an empty or all-private directory hashes to.
pub const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Names starting with `.` or `_` are hidden from discovery and hashing.
pub fn is_private(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

fn is_private_entry(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().map_or(true, is_private)
}

/// Glob set matching `**/*.<ext>` for each extension.
pub(crate) fn extension_globset(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim_start_matches('.');
        builder.add(Glob::new(&format!("**/*.{}", ext))?);
    }
    Ok(builder.build()?)
}

/// Non-private files under `dir` matching `sources`, sorted by path.
///
/// Private directories are pruned entirely. A missing directory yields an
/// empty list.
pub(crate) fn source_files(dir: &Path, sources: &GlobSet) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_private_entry(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            let rel = p.strip_prefix(dir).unwrap_or(p);
            sources.is_match(rel)
        })
        .collect();
    files.sort();
    files
}

/// Fingerprint a collection directory.
///
/// Covers every source file matching `extensions` plus the collection's
/// manifest. Each file contributes its path relative to `dir` and its bytes,
/// in sorted path order, so the digest does not depend on filesystem
/// iteration order. Unreadable files are skipped with a warning.
pub fn hash_collection(dir: &Path, extensions: &[String]) -> String {
    let sources = match extension_globset(extensions) {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(error = %e, "invalid spell extension list; hashing nothing");
            GlobSet::empty()
        }
    };

    let mut files = source_files(dir, &sources);
    let manifest = dir.join(MANIFEST_FILE_NAME);
    if manifest.is_file() {
        files.push(manifest);
        files.sort();
    }

    let mut hasher = Sha256::new();
    for path in &files {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable file in hash");
                continue;
            }
        };
        let rel = path.strip_prefix(dir).unwrap_or(path);
        hasher.update(rel.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint one spell's documentation text.
pub fn hash_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
