/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file document.rs
 * @brief Ordered document type: unique keys, insertion order, `_id`-first.
 */

use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DocumentError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("_id must not be an array or regex")]
    InvalidId,
}

/// Ordered mapping from string key to `Value`. Keys are unique and insertion
/// order is preserved, except that `_id` (if present) is always kept as the
/// first field -- every mutating method re-establishes that invariant.
#[derive(Debug, Clone, Default)]
pub struct Document {
    map: IndexMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self { map: IndexMap::new() }
    }

    pub fn validate_key(key: &str) -> Result<(), DocumentError> {
        if key.is_empty() {
            return Err(DocumentError::InvalidKey("empty key".to_string()));
        }
        Ok(())
    }

    /// Inserts a key, moving `_id` back to the front afterwards. Returns the
    /// previous value, if any (this is a replace, not a duplicate-key error --
    /// duplicate-key errors only apply at construction from a wire document,
    /// see `try_from_pairs`).
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let previous = self.map.insert(key, value.into());
        self.reorder_id_first();
        previous
    }

    fn reorder_id_first(&mut self) {
        if let Some(idx) = self.map.get_index_of("_id") {
            if idx != 0 {
                self.map.move_index(idx, 0);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.map.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.map.iter_mut()
    }

    pub fn id(&self) -> Option<&Value> {
        self.get("_id")
    }

    /// Builds a document from ordered pairs, rejecting duplicate keys and an
    /// invalid `_id` (array or regex), and moving `_id` to the front.
    pub fn try_from_pairs(pairs: Vec<(String, Value)>) -> Result<Self, DocumentError> {
        let mut doc = Document::new();
        for (k, v) in pairs {
            Self::validate_key(&k)?;
            if doc.map.contains_key(&k) {
                return Err(DocumentError::DuplicateKey(k));
            }
            if k == "_id" && matches!(v, Value::Array(_) | Value::Regex { .. }) {
                return Err(DocumentError::InvalidId);
            }
            doc.map.insert(k, v);
        }
        doc.reorder_id_first();
        Ok(doc)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}: {:?}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

/// Builds a `Document` from `key => value` pairs, for tests and internal
/// construction of synthesized command responses.
#[macro_export]
macro_rules! doc {
    ( $( $k:expr => $v:expr ),* $(,)? ) => {{
        #[allow(unused_mut)]
        let mut d = $crate::document::Document::new();
        $( d.insert($k, $v); )*
        d
    }};
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        if self.map.len() != other.map.len() {
            return false;
        }
        self.map
            .iter()
            .zip(other.map.iter())
            .all(|((k1, v1), (k2, v2))| k1 == k2 && v1 == v2)
    }
}
