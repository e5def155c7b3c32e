//! Merge, deduplicate, threshold, and rank nearest-neighbor candidates.
//!
//! The vector store only answers "nearest neighbors of this text in one
//! collection". Turning the per-collection answers into a single ranked
//! list happens here:
//!
//! ```text
//! [(id, dist)]*  ──▶ dedup (min dist per id) ──▶ stable sort asc
//!                ──▶ drop dist > threshold    ──▶ truncate top_k
//! ```

use std::collections::HashMap;

use crate::models::SpellMatch;

/// Default cut-off between "semantically related" and "unrelated" on the
/// cosine distance scale.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.4;

/// Default number of results returned by a query.
pub const DEFAULT_TOP_K: usize = 5;

/// Rank raw `(id, distance)` candidates gathered from several collections.
///
/// - An id seen more than once keeps its minimum distance.
/// - Equal distances keep the order in which ids were first seen.
/// - Candidates with a distance above `distance_threshold` (or NaN) are
///   dropped.
/// - At most `top_k` matches are returned.
pub fn rank_matches<I>(candidates: I, distance_threshold: f32, top_k: usize) -> Vec<SpellMatch>
where
    I: IntoIterator<Item = (String, f32)>,
{
    let mut merged: Vec<SpellMatch> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (id, distance) in candidates {
        match index.get(&id) {
            Some(&i) => {
                if distance < merged[i].distance {
                    merged[i].distance = distance;
                }
            }
            None => {
                index.insert(id.clone(), merged.len());
                merged.push(SpellMatch { name: id, distance });
            }
        }
    }

    // Vec::sort_by is stable, so ties keep first-seen order.
    merged.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    merged.retain(|m| m.distance <= distance_threshold);
    merged.truncate(top_k);
    merged
}
