//! Ordered key/value container for tags, labels, baggage, and attributes
//!
//! Keys are unique; insertion order is preserved. Replaces the dynamic
//! dict-style containers a caller might otherwise reach for, so that tag
//! and label sets stay small, ordered, and cheap to compare. Cardinality
//! of label values is a caller contract: do not feed raw user input as a
//! label value.

use serde::{Deserialize, Serialize};

/// An ordered mapping with unique string keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KvMap {
    entries: Vec<(String, String)>,
}

impl KvMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or update a key, preserving position on update
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Stable key for bucketing: entries joined as `k=v`, sorted by key
    ///
    /// Label sets are semantically unordered, so two maps with the same
    /// entries in different insertion orders produce the same key.
    pub fn canonical_key(&self) -> String {
        let mut pairs: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        pairs.join(",")
    }
}

impl FromIterator<(String, String)> for KvMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut map = KvMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Convenience constructor for literal label sets
#[macro_export]
macro_rules! kv {
    () => { $crate::kv::KvMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::kv::KvMap::new();
        $(map.insert($key, $value);)+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order() {
        let mut map = KvMap::new();
        map.insert("b", "1");
        map.insert("a", "2");
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_insert_updates_in_place() {
        let mut map = KvMap::new();
        map.insert("a", "1");
        map.insert("b", "2");
        map.insert("a", "3");
        assert_eq!(map.get("a"), Some("3"));
        assert_eq!(map.len(), 2);
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_canonical_key_is_order_independent() {
        let mut a = KvMap::new();
        a.insert("x", "1");
        a.insert("y", "2");
        let mut b = KvMap::new();
        b.insert("y", "2");
        b.insert("x", "1");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_kv_macro() {
        let map = crate::kv!("service" => "checkout", "region" => "eu");
        assert_eq!(map.get("service"), Some("checkout"));
        assert_eq!(map.len(), 2);
    }
}
