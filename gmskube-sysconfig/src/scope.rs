//! Dot-notation key specificity.
//!
//! A key such as `station.ASAR.channel.sample-rate` names a leaf
//! (`sample-rate`) qualified by a chain of scopes. Lookups climb from the
//! most specific form of the key towards the bare leaf by dropping the
//! scope immediately above the leaf, one segment at a time:
//!
//! ```text
//! a.b.c  ->  a.c  ->  c
//! ```

/// Every form of `key` to try, most specific first.
///
/// The last segment is always kept; only intermediate scopes are removed.
#[must_use]
pub fn specificity_chain(key: &str) -> Vec<String> {
    let mut segments: Vec<&str> = key.split('.').collect();
    let mut chain = Vec::with_capacity(segments.len());
    chain.push(segments.join("."));

    while segments.len() > 1 {
        segments.remove(segments.len() - 2);
        chain.push(segments.join("."));
    }

    chain
}
