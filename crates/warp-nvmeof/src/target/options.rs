//! String-keyed backend options

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Options passed to a backend constructor
///
/// Values are kept as strings; typed accessors fall back to a default when
/// a key is missing or does not parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetOptions(BTreeMap<String, String>);

impl TargetOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of `key`
    pub fn string(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// `key` parsed as an unsigned integer, or `default`
    pub fn u64(&self, key: &str, default: u64) -> u64 {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// `key` parsed as a signed integer, or `default`
    pub fn i64(&self, key: &str, default: i64) -> i64 {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Set `key`, returning the updated options
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key` in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Iterate over all pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for TargetOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let options = TargetOptions::new()
            .with("size", 4096u64)
            .with("sleep", "10")
            .with("image", "/tmp/disk.img")
            .with("bogus", "ten");

        assert_eq!(options.u64("size", 0), 4096);
        assert_eq!(options.i64("sleep", 5), 10);
        assert_eq!(options.u64("missing", 7), 7);
        assert_eq!(options.u64("bogus", 3), 3);
        assert_eq!(options.string("image"), Some("/tmp/disk.img"));
        assert_eq!(options.string("missing"), None);
    }

    #[test]
    fn test_from_iterator() {
        let options: TargetOptions = [("a", 1), ("b", 2)].into_iter().collect();
        let pairs: Vec<_> = options.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2")]);
    }
}
