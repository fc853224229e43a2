/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file path.rs
 * @brief Dot-notation path traversal, mutation, and removal.
 */

use crate::document::Document;
use crate::value::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathErrorKind {
    #[error("path not found")]
    NotFound,
    #[error("empty path segment")]
    EmptyKey,
    #[error("array index segment is not an integer")]
    ArrayIndexNotInteger,
    #[error("segment traverses a scalar value")]
    TypeMismatch,
    #[error("path is not viable for this operation")]
    PathNotViable,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}")]
pub struct PathError {
    pub kind: PathErrorKind,
}

impl PathError {
    pub fn new(kind: PathErrorKind) -> Self {
        Self { kind }
    }
}

/// An ordered, non-empty sequence of dot-separated segments. Each segment is
/// kept as the literal key string; array traversal re-parses it as an
/// integer index on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::new(PathErrorKind::EmptyKey));
        }
        let segments: Vec<String> = raw.split('.').map(|s| s.to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::new(PathErrorKind::EmptyKey));
        }
        Ok(Path { segments })
    }

    pub fn single(segment: impl Into<String>) -> Self {
        Path { segments: vec![segment.into()] }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> String {
        self.segments.join(".")
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    /// All segments after the first, as a sub-path; `None` if this is a leaf.
    pub fn rest(&self) -> Option<Path> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(Path { segments: self.segments[1..].to_vec() })
        }
    }
}

/// Looks up `path` inside `value` (which may itself be a document, array, or
/// a bare scalar for a single-segment path evaluated on a non-document root).
pub fn get<'a>(value: &'a Value, path: &Path) -> Result<&'a Value, PathError> {
    let mut current = value;
    for segment in path.segments() {
        current = match current {
            Value::Document(doc) => doc
                .get(segment)
                .ok_or_else(|| PathError::new(PathErrorKind::NotFound))?,
            Value::Array(arr) => {
                let idx: usize = segment
                    .parse()
                    .map_err(|_| PathError::new(PathErrorKind::ArrayIndexNotInteger))?;
                arr.get(idx).ok_or_else(|| PathError::new(PathErrorKind::NotFound))?
            }
            _ => return Err(PathError::new(PathErrorKind::TypeMismatch)),
        };
    }
    Ok(current)
}

pub fn get_from_document<'a>(doc: &'a Document, path: &Path) -> Result<&'a Value, PathError> {
    let first = doc
        .get(path.first())
        .ok_or_else(|| PathError::new(PathErrorKind::NotFound))?;
    match path.rest() {
        Some(rest) => get(first, &rest),
        None => Ok(first),
    }
}

/// Sets `value` at `path`, creating intermediate documents as needed. Never
/// creates arrays, and never coerces an existing scalar into a container --
/// either of those is `PathNotViable`.
pub fn set(doc: &mut Document, path: &Path, value: Value) -> Result<(), PathError> {
    set_in_document(doc, path.segments(), value)
}

fn set_in_document(doc: &mut Document, segments: &[String], value: Value) -> Result<(), PathError> {
    let (head, tail) = segments.split_first().expect("path is non-empty");
    if tail.is_empty() {
        doc.insert(head.clone(), value);
        return Ok(());
    }

    match doc.get_mut(head) {
        Some(Value::Document(inner)) => set_in_document(inner, tail, value),
        Some(Value::Array(arr)) => set_in_array(arr, tail, value),
        Some(_) => Err(PathError::new(PathErrorKind::PathNotViable)),
        None => {
            let mut inner = Document::new();
            set_in_document(&mut inner, tail, value)?;
            doc.insert(head.clone(), Value::Document(inner));
            Ok(())
        }
    }
}

fn set_in_array(arr: &mut Vec<Value>, segments: &[String], value: Value) -> Result<(), PathError> {
    let (head, tail) = segments.split_first().expect("path is non-empty");
    let idx: usize = head
        .parse()
        .map_err(|_| PathError::new(PathErrorKind::ArrayIndexNotInteger))?;
    if idx >= arr.len() {
        return Err(PathError::new(PathErrorKind::PathNotViable));
    }
    if tail.is_empty() {
        arr[idx] = value;
        return Ok(());
    }
    match &mut arr[idx] {
        Value::Document(inner) => set_in_document(inner, tail, value),
        Value::Array(inner) => set_in_array(inner, tail, value),
        _ => Err(PathError::new(PathErrorKind::PathNotViable)),
    }
}

/// Removes the value at `path`. A no-op if the terminal segment is absent.
/// Removing an array element shifts subsequent elements left.
pub fn remove(doc: &mut Document, path: &Path) -> Result<(), PathError> {
    remove_in_document(doc, path.segments())
}

fn remove_in_document(doc: &mut Document, segments: &[String]) -> Result<(), PathError> {
    let (head, tail) = segments.split_first().expect("path is non-empty");
    if tail.is_empty() {
        doc.remove(head);
        return Ok(());
    }
    match doc.get_mut(head) {
        Some(Value::Document(inner)) => remove_in_document(inner, tail),
        Some(Value::Array(arr)) => remove_in_array(arr, tail),
        Some(_) => Ok(()), // terminal segment under a scalar: no-op
        None => Ok(()),
    }
}

fn remove_in_array(arr: &mut Vec<Value>, segments: &[String]) -> Result<(), PathError> {
    let (head, tail) = segments.split_first().expect("path is non-empty");
    let idx: usize = match head.parse::<usize>() {
        Ok(i) => i,
        Err(_) => return Ok(()),
    };
    if idx >= arr.len() {
        return Ok(());
    }
    if tail.is_empty() {
        arr.remove(idx);
        return Ok(());
    }
    match &mut arr[idx] {
        Value::Document(inner) => remove_in_document(inner, tail),
        Value::Array(inner) => remove_in_array(inner, tail),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn get_descends_documents_and_arrays() {
        let d = doc! { "a" => doc! { "b" => vec![Value::Int32(1), Value::Int32(2)] } };
        let path = Path::parse("a.b.1").unwrap();
        assert_eq!(get_from_document(&d, &path).unwrap(), &Value::Int32(2));
    }

    #[test]
    fn empty_segment_is_error() {
        assert_eq!(Path::parse("a..b").unwrap_err().kind, PathErrorKind::EmptyKey);
    }

    #[test]
    fn set_creates_intermediate_documents_only() {
        let mut d = Document::new();
        let path = Path::parse("a.b.c").unwrap();
        set(&mut d, &path, Value::Int32(5)).unwrap();
        assert_eq!(get_from_document(&d, &path).unwrap(), &Value::Int32(5));
    }

    #[test]
    fn set_does_not_coerce_scalar_into_container() {
        let mut d = doc! { "a" => Value::Int32(1) };
        let path = Path::parse("a.b").unwrap();
        assert_eq!(set(&mut d, &path, Value::Int32(2)).unwrap_err().kind, PathErrorKind::PathNotViable);
    }

    #[test]
    fn remove_shifts_array_elements_left() {
        let mut d = doc! { "a" => vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)] };
        let path = Path::parse("a.1").unwrap();
        remove(&mut d, &path).unwrap();
        assert_eq!(d.get("a").unwrap().as_array().unwrap(), &vec![Value::Int32(1), Value::Int32(3)]);
    }

    #[test]
    fn remove_missing_terminal_is_noop() {
        let mut d = doc! { "a" => Value::Int32(1) };
        let path = Path::parse("b").unwrap();
        assert!(remove(&mut d, &path).is_ok());
    }
}
