#![forbid(unsafe_code)]

//! Query identity.
//!
//! A [`QueryKey`] is an ordered list of JSON segments. Its [`hash`](QueryKey::hash)
//! is the canonical JSON text of the segments; `serde_json` keeps object keys
//! in sorted order, so two keys built from equal values always hash to the
//! same string regardless of field insertion order.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Ordered, serializable query identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    /// Build a key from already-converted segments.
    #[must_use]
    pub fn new(segments: Vec<Value>) -> Self {
        Self(segments)
    }

    /// Single string segment, the common `["todos"]` shape.
    #[must_use]
    pub fn single(name: &str) -> Self {
        Self(vec![Value::String(name.to_owned())])
    }

    /// Append a segment, consuming and returning the key.
    ///
    /// Fails only if `segment` cannot be represented as JSON (for example a
    /// map with non-string keys).
    pub fn with<S: Serialize>(mut self, segment: S) -> Result<Self> {
        self.0.push(serde_json::to_value(segment)?);
        Ok(self)
    }

    /// Append a segment that is already a JSON value.
    #[must_use]
    pub fn with_value(mut self, segment: Value) -> Self {
        self.0.push(segment);
        self
    }

    #[must_use]
    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical string form used as the query hash.
    #[must_use]
    pub fn hash(&self) -> String {
        Value::Array(self.0.clone()).to_string()
    }

    /// Whether `self` starts with every segment of `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash())
    }
}

impl From<&str> for QueryKey {
    fn from(name: &str) -> Self {
        Self::single(name)
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(segments: Vec<Value>) -> Self {
        Self(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_segment_hash() {
        let key = QueryKey::single("todos");
        assert_eq!(key.hash(), r#"["todos"]"#);
        assert_eq!(key.len(), 1);
    }

    #[test]
    fn object_segment_hash_ignores_insertion_order() {
        let a = QueryKey::single("todos").with_value(json!({"page": 1, "done": false}));
        let b = QueryKey::single("todos").with_value(json!({"done": false, "page": 1}));
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
    }

    #[test]
    fn with_serializes_segments() {
        #[derive(Serialize)]
        struct Filter {
            owner: &'static str,
        }
        let key = QueryKey::single("repos")
            .with(Filter { owner: "me" })
            .unwrap()
            .with(7u32)
            .unwrap();
        assert_eq!(key.hash(), r#"["repos",{"owner":"me"},7]"#);
    }

    #[test]
    fn prefix_matching() {
        let key = QueryKey::single("todos").with(3).unwrap();
        assert!(key.starts_with(&QueryKey::single("todos")));
        assert!(!key.starts_with(&QueryKey::single("users")));
        assert!(key.starts_with(&QueryKey::default()));
    }

    #[test]
    fn serde_is_transparent() {
        let key = QueryKey::single("a").with(1).unwrap();
        let text = serde_json::to_string(&key).unwrap();
        assert_eq!(text, r#"["a",1]"#);
        let back: QueryKey = serde_json::from_str(&text).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn display_matches_hash() {
        let key = QueryKey::from("todos");
        assert_eq!(key.to_string(), key.hash());
    }
}
