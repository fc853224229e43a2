/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file query/sort.rs
 * @brief Multi-key stable sort with dot-notation and array min/max semantics.
 */

use crate::comparator::{compare_total, CompareResult};
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::path::Path;
use crate::value::Value;

pub const MAX_SORT_KEYS: usize = 32;

#[derive(Debug, Clone)]
pub struct SortKey {
    path: Path,
    ascending: bool,
}

impl SortKey {
    pub fn parse_spec(spec: &Document) -> CommandResult<Vec<SortKey>> {
        if spec.len() > MAX_SORT_KEYS {
            return Err(CommandError::new(ErrorCode::BadValue, format!("sort exceeds the {} key limit", MAX_SORT_KEYS)));
        }
        let mut keys = Vec::with_capacity(spec.len());
        for (field, dir) in spec.iter() {
            if field.starts_with('$') || field.ends_with('$') || field.contains("..") {
                return Err(CommandError::new(ErrorCode::BadValue, format!("invalid sort key: {}", field)));
            }
            let ascending = match dir.as_whole_i64() {
                Some(1) => true,
                Some(-1) => false,
                _ => return Err(CommandError::new(ErrorCode::BadValue, format!("sort direction must be 1 or -1, got {:?}", dir))),
            };
            let path = Path::parse(field).map_err(|e| CommandError::new(ErrorCode::BadValue, e.to_string()))?;
            keys.push(SortKey { path, ascending });
        }
        Ok(keys)
    }

    /// `Some((field, ascending))` if this key is a single, undotted
    /// top-level field -- the only shape the pushdown translator can mirror
    /// into an SQL `ORDER BY`.
    pub fn as_top_level(&self) -> Option<(&str, bool)> {
        if self.path.len() == 1 {
            Some((self.path.first(), self.ascending))
        } else {
            None
        }
    }
}

fn key_value(doc: &Document, key: &SortKey) -> Value {
    let resolved = crate::path::get_from_document(doc, &key.path).ok().cloned();
    match resolved {
        None => Value::Null,
        Some(Value::Array(arr)) if !arr.is_empty() => {
            let mut chosen = arr[0].clone();
            for elem in &arr[1..] {
                let better = if key.ascending {
                    compare_total(elem, &chosen) == CompareResult::Less
                } else {
                    compare_total(elem, &chosen) == CompareResult::Greater
                };
                if better {
                    chosen = elem.clone();
                }
            }
            chosen
        }
        Some(Value::Array(_)) => Value::Null,
        Some(v) => v,
    }
}

/// Stable multi-key sort: `sort_documents` twice on the same input yields
/// identical output, and equal-key elements preserve relative input order.
pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let (va, vb) = (key_value(a, key), key_value(b, key));
            let cmp = compare_total(&va, &vb);
            let ord = match cmp {
                CompareResult::Less => std::cmp::Ordering::Less,
                CompareResult::Greater => std::cmp::Ordering::Greater,
                _ => std::cmp::Ordering::Equal,
            };
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn sorts_ascending_and_descending() {
        let mut docs = vec![
            doc! { "v" => Value::Int32(3) },
            doc! { "v" => Value::Int32(1) },
            doc! { "v" => Value::Int32(2) },
        ];
        let keys = SortKey::parse_spec(&doc! { "v" => Value::Int32(1) }).unwrap();
        sort_documents(&mut docs, &keys);
        let values: Vec<i32> = docs.iter().map(|d| match d.get("v") { Some(Value::Int32(i)) => *i, _ => unreachable!() }).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn stable_for_equal_keys() {
        let mut docs = vec![
            doc! { "v" => Value::Int32(1), "tag" => Value::String("first".into()) },
            doc! { "v" => Value::Int32(1), "tag" => Value::String("second".into()) },
        ];
        let keys = SortKey::parse_spec(&doc! { "v" => Value::Int32(1) }).unwrap();
        sort_documents(&mut docs, &keys);
        assert_eq!(docs[0].get("tag"), Some(&Value::String("first".into())));
        assert_eq!(docs[1].get("tag"), Some(&Value::String("second".into())));
    }

    #[test]
    fn array_field_uses_min_ascending() {
        let mut docs = vec![
            doc! { "v" => vec![Value::Int32(5), Value::Int32(1)] },
            doc! { "v" => vec![Value::Int32(3), Value::Int32(4)] },
        ];
        let keys = SortKey::parse_spec(&doc! { "v" => Value::Int32(1) }).unwrap();
        sort_documents(&mut docs, &keys);
        // first doc's min is 1, second's min is 3 -> first doc sorts first
        assert_eq!(docs[0].get("v").unwrap().as_array().unwrap()[0], Value::Int32(5));
    }

    #[test]
    fn invalid_direction_is_error() {
        assert!(SortKey::parse_spec(&doc! { "v" => Value::Int32(0) }).is_err());
    }

    #[test]
    fn too_many_keys_is_error() {
        let mut spec = Document::new();
        for i in 0..40 {
            spec.insert(format!("k{}", i), Value::Int32(1));
        }
        assert!(SortKey::parse_spec(&spec).is_err());
    }
}
