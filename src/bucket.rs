//! Ordered key/value storage for a single named namespace.

use std::collections::BTreeMap;

use crate::value::Value;

/// An ordered-by-key mapping from string keys to [`Value`]s.
///
/// Buckets are owned by the store's materialized state; callers only ever
/// touch them through transaction-scoped handles, which copy values in and
/// out so mutations inside one transaction never leak into another's view
/// before commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Bucket {
    entries: BTreeMap<String, Value>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Inserts or overwrites. Returns the previous value, if any.
    pub(crate) fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    /// Removes the mapping entirely; absent keys are a no-op.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
