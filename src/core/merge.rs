// LogQuest - core/merge.rs
//
// Folding streamed partial results into a session's accumulated snapshot.
// Core layer: pure function, no I/O, no locking.
//
// Tuples are append-only per group in arrival order. Descriptors are
// last-write-wins per group. Tuples are never deduplicated by content: the
// engine delivers each tuple at most once, and a repeated tuple is data.

use crate::core::model::{PartialResults, ResultSnapshot};

/// Combine `previous` with `incoming`, returning a new snapshot.
///
/// Neither input is modified, so readers holding `previous` keep a
/// consistent view while the merge runs. Merging an empty batch yields a
/// snapshot equal to `previous`.
pub fn merge(previous: &ResultSnapshot, incoming: &PartialResults) -> ResultSnapshot {
    merge_into(previous.clone(), incoming.clone())
}

/// By-value form of `merge` that appends into `previous` in place.
///
/// Cost is proportional to `incoming` only. The session store uses this
/// while it owns the accumulated snapshot.
pub fn merge_into(mut previous: ResultSnapshot, incoming: PartialResults) -> ResultSnapshot {
    for (key, batch) in incoming.tuples {
        previous.tuples.entry(key).or_default().extend(batch);
    }
    previous.descriptor.extend(incoming.descriptor);
    previous
}
