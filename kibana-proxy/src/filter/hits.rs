//! Removal of search hits the caller may not see

use crate::error::FilterError;
use serde_json::Value;

/// Keep only the hits in `hits.hits` whose `_id` satisfies `keep`.
///
/// Hits without a string `_id` cannot be attributed to an index and are
/// dropped. Surviving hits keep their relative order. Returns the number
/// of hits removed.
pub fn retain_hits<F>(doc: &mut Value, mut keep: F) -> Result<usize, FilterError>
where
    F: FnMut(&str) -> bool,
{
    let hits = doc
        .get_mut("hits")
        .and_then(|hits| hits.get_mut("hits"))
        .and_then(Value::as_array_mut)
        .ok_or(FilterError::MissingHits)?;

    let mut removed = 0;
    // Walk backwards so removals don't shift unvisited entries
    for i in (0..hits.len()).rev() {
        let visible = hits[i]
            .get("_id")
            .and_then(Value::as_str)
            .is_some_and(&mut keep);
        if !visible {
            hits.remove(i);
            removed += 1;
        }
    }

    Ok(removed)
}
