//! Ordered key/value set with last-write-wins semantics
//!
//! Iteration yields entries in first-insertion order (this is what the log
//! backend sees). [`AttributeSet::snapshot_sorted`] yields the same entries
//! sorted by key, which is what gets attached to a span.

use serde_json::Value;

/// A single span attribute
pub type Attribute = (String, Value);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, overwriting an existing entry in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Apply [`set`](Self::set) for every pair, in iteration order
    pub fn merge<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in pairs {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries sorted by key. Stable, so equal keys cannot reorder (and
    /// `set` never produces duplicates anyway).
    pub fn snapshot_sorted(&self) -> Vec<Attribute> {
        let mut snapshot = self.entries.clone();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }
}
