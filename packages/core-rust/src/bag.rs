//! Per-invocation data bag.

use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// Mutable mapping threaded through one invocation's processing.
///
/// Values are held behind `Arc`, so `clone()` copies only the top-level keys
/// and shares nested values. Mutation through [`DataBag::get_mut`] is
/// copy-on-write: a shared value is detached before it is changed, so a clone
/// handed to another task never observes the change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBag {
    entries: HashMap<String, Arc<Value>>,
}

impl DataBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|v| &**v)
    }

    /// Returns the shared handle for `key` without detaching it.
    #[must_use]
    pub fn get_shared(&self, key: &str) -> Option<&Arc<Value>> {
        self.entries.get(key)
    }

    /// Returns a mutable reference, detaching the value from any clone first.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key).map(Arc::make_mut)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries
            .insert(key.into(), Arc::new(value.into()))
            .map(Arc::unwrap_or_clone)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(Arc::unwrap_or_clone)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), &**v))
    }

    /// Resolves a dotted path: the first segment selects a bag entry, the rest
    /// walk into nested maps and arrays.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = self.get(segments.next()?)?;
        head.pointer(segments)
    }

    /// Snapshot of the bag as a `Value::Map`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), (**v).clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = Self::new();
        bag.extend(iter);
        bag
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for DataBag {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for DataBag {
    type Item = (String, Value);
    type IntoIter = std::iter::Map<
        hash_map::IntoIter<String, Arc<Value>>,
        fn((String, Arc<Value>)) -> (String, Value),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .into_iter()
            .map(detach_entry as fn((String, Arc<Value>)) -> (String, Value))
    }
}

fn detach_entry((key, value): (String, Arc<Value>)) -> (String, Value) {
    (key, Arc::unwrap_or_clone(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
