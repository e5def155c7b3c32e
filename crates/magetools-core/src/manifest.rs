//! Per-collection permission manifest.
//!
//! Every collection directory may carry a `manifest.json` that decides which
//! of its spells are exposed:
//!
//! ```json
//! {
//!     "version": "1.0",
//!     "enabled": true,
//!     "description": "Weather lookups",
//!     "whitelist": ["get_forecast", "get_alerts"],
//!     "blacklist": ["get_alerts"]
//! }
//! ```
//!
//! Evaluation order for a spell name:
//!
//! 1. no manifest → allowed
//! 2. `enabled == false` → denied
//! 3. `whitelist` present (even empty) → allowed only if listed
//! 4. `blacklist` → denied if listed, regardless of step 3

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// File name looked up at the root of every collection directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Parsed collection manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Manifest {
    /// When `false` the whole collection is ignored.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// If present, only these member names are permitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<BTreeSet<String>>,
    /// Always denied, applied after the whitelist.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blacklist: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelist: None,
            blacklist: BTreeSet::new(),
            version: None,
            description: None,
        }
    }
}

impl Manifest {
    /// The manifest written by `magetools init`.
    pub fn scaffold(collection_name: &str) -> Self {
        Self {
            version: Some("1.0".to_string()),
            description: Some(format!("Collection: {}", collection_name)),
            ..Self::default()
        }
    }
}

/// Parse manifest text.
///
/// Returns `None` for invalid JSON, for a JSON value that is not an object,
/// or for an object whose recognized keys have the wrong types. A missing
/// or unusable manifest means "no restriction", so callers never need to
/// handle an error here.
pub fn parse_manifest(text: &str) -> Option<Manifest> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Decide whether the member `name` is permitted by `manifest`.
pub fn is_allowed(name: &str, manifest: Option<&Manifest>) -> bool {
    let Some(manifest) = manifest else {
        return true;
    };

    if !manifest.enabled {
        return false;
    }

    let mut allowed = match &manifest.whitelist {
        Some(whitelist) => whitelist.contains(name),
        None => true,
    };

    if manifest.blacklist.contains(name) {
        allowed = false;
    }

    allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        parse_manifest(json).expect("valid manifest")
    }

    #[test]
    fn test_no_manifest_allows_all() {
        assert!(is_allowed("any_spell", None));
        assert!(is_allowed("", None));
    }

    #[test]
    fn test_disabled_blocks_everything() {
        let m = manifest(r#"{"enabled": false, "whitelist": ["a"], "blacklist": []}"#);
        assert!(!is_allowed("a", Some(&m)));
        assert!(!is_allowed("b", Some(&m)));
    }

    #[test]
    fn test_whitelist_allows_only_listed() {
        let m = manifest(r#"{"whitelist": ["allowed_spell"]}"#);
        assert!(is_allowed("allowed_spell", Some(&m)));
        assert!(!is_allowed("blocked_spell", Some(&m)));
    }

    #[test]
    fn test_empty_whitelist_blocks_all() {
        let m = manifest(r#"{"whitelist": []}"#);
        assert!(!is_allowed("anything", Some(&m)));
    }

    #[test]
    fn test_blacklist_blocks_listed() {
        let m = manifest(r#"{"blacklist": ["blocked_spell"]}"#);
        assert!(is_allowed("allowed_spell", Some(&m)));
        assert!(!is_allowed("blocked_spell", Some(&m)));
    }

    #[test]
    fn test_blacklist_overrides_whitelist() {
        let m = manifest(r#"{"whitelist": ["spell_a", "spell_b", "spell_c"], "blacklist": ["spell_b"]}"#);
        assert!(is_allowed("spell_a", Some(&m)));
        assert!(!is_allowed("spell_b", Some(&m)));
        assert!(is_allowed("spell_c", Some(&m)));
        assert!(!is_allowed("spell_d", Some(&m)));
    }

    #[test]
    fn test_enabled_defaults_to_true() {
        let m = manifest(r#"{"version": "1.0"}"#);
        assert!(m.enabled);
        assert!(is_allowed("x", Some(&m)));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_manifest(r#"["list", "not", "dict"]"#).is_none());
        assert!(parse_manifest("42").is_none());
        assert!(parse_manifest("{ invalid json }").is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(parse_manifest(r#"{"whitelist": "spell_a"}"#).is_none());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let m = manifest(r#"{"enabled": true, "author": "someone"}"#);
        assert_eq!(m, Manifest::default());
    }

    #[test]
    fn test_scaffold_shape() {
        let m = Manifest::scaffold("weather");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "enabled": true,
                "version": "1.0",
                "description": "Collection: weather",
            })
        );
    }
}
