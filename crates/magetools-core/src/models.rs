//! Core data types shared across discovery, sync, and matching.

use serde::Serialize;

/// Separator between the collection and member name in a qualified spell name.
pub const QUALIFIED_SEPARATOR: char = '.';

/// A ranked match returned by the query matcher.
///
/// `distance` is a cosine distance: `0.0` means identical, larger is less
/// related.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpellMatch {
    pub name: String,
    pub distance: f32,
}

/// Build the registry key for a spell: `{collection}.{member}`.
pub fn qualified_name(collection: &str, member: &str) -> String {
    format!("{}{}{}", collection, QUALIFIED_SEPARATOR, member)
}

/// Split a qualified name into `(collection, member)`.
///
/// Splits on the first separator, so member names may themselves contain
/// dots. Returns `None` when there is no separator or either side is empty.
pub fn split_qualified_name(name: &str) -> Option<(&str, &str)> {
    let (collection, member) = name.split_once(QUALIFIED_SEPARATOR)?;
    if collection.is_empty() || member.is_empty() {
        return None;
    }
    Some((collection, member))
}
