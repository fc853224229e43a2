/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file query/projection.rs
 * @brief Inclusion/exclusion field projection, dot-notation and `$elemMatch`.
 */

use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::path::Path;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inclusion,
    Exclusion,
}

/// A validated projection spec: its inclusion/exclusion mode plus the raw
/// spec document (still needed at apply time for `$elemMatch` sub-specs).
#[derive(Debug, Clone)]
pub struct Projection {
    mode: Mode,
    spec: Document,
    id_explicit: Option<bool>,
}

impl Projection {
    pub fn parse(spec: &Document) -> CommandResult<Self> {
        let mut mode: Option<Mode> = None;
        let mut id_explicit = None;
        for (key, val) in spec.iter() {
            let truthy_mode = projection_truthiness(val);
            if key == "_id" {
                id_explicit = Some(truthy_mode == Mode::Inclusion);
                continue;
            }
            match mode {
                None => mode = Some(truthy_mode),
                Some(m) if m == truthy_mode => {}
                Some(Mode::Inclusion) => {
                    return Err(CommandError::new(ErrorCode::BadValue, "ProjectionExIn: cannot mix inclusion and exclusion"))
                }
                Some(Mode::Exclusion) => {
                    return Err(CommandError::new(ErrorCode::BadValue, "ProjectionInEx: cannot mix inclusion and exclusion"))
                }
            }
        }
        Ok(Projection { mode: mode.unwrap_or(Mode::Inclusion), spec: spec.clone(), id_explicit })
    }

    pub fn is_empty(&self) -> bool {
        self.spec.is_empty()
    }
}

fn projection_truthiness(v: &Value) -> Mode {
    let included = match v {
        Value::Bool(b) => *b,
        Value::Int32(i) => *i != 0,
        Value::Int64(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        Value::Document(_) => true, // $elemMatch and other sub-operators imply inclusion
        _ => true,
    };
    if included {
        Mode::Inclusion
    } else {
        Mode::Exclusion
    }
}

/// Projects `doc` according to `spec`. Idempotent: `project(project(d, p), p)
/// == project(d, p)`.
pub fn project(doc: &Document, spec: &Projection) -> CommandResult<Document> {
    let mut out = match spec.mode {
        Mode::Inclusion => Document::new(),
        Mode::Exclusion => doc.clone(),
    };

    for (key, val) in spec.spec.iter() {
        if key == "_id" {
            continue;
        }
        match spec.mode {
            Mode::Inclusion => include_field(doc, &mut out, key, val)?,
            Mode::Exclusion => {
                let path = Path::parse(key).map_err(|e| CommandError::new(ErrorCode::BadValue, e.to_string()))?;
                let _ = crate::path::remove(&mut out, &path);
            }
        }
    }

    let want_id = spec.id_explicit.unwrap_or(true);
    if want_id {
        if let Some(id) = doc.id() {
            out.insert("_id", id.clone());
        }
    } else {
        out.remove("_id");
    }

    Ok(out)
}

fn include_field(doc: &Document, out: &mut Document, key: &str, spec_val: &Value) -> CommandResult<()> {
    let path = Path::parse(key).map_err(|e| CommandError::new(ErrorCode::BadValue, e.to_string()))?;
    if let Value::Document(sub) = spec_val {
        if let Some(elem_spec) = sub.get("$elemMatch") {
            let filter_doc = elem_spec
                .as_document()
                .ok_or_else(|| CommandError::new(ErrorCode::BadValue, "$elemMatch projection requires a filter document"))?;
            if let Ok(Value::Array(arr)) = crate::path::get_from_document(doc, &path) {
                for elem in arr {
                    if let Some(elem_doc) = elem.as_document() {
                        if crate::query::filter::evaluate(filter_doc, elem_doc).unwrap_or(false) {
                            let _ = crate::path::set(out, &path, Value::Array(vec![elem.clone()]));
                            return Ok(());
                        }
                    }
                }
            }
            return Ok(());
        }
    }
    if let Ok(v) = crate::path::get_from_document(doc, &path).cloned() {
        let _ = crate::path::set(out, &path, v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn inclusion_keeps_only_mentioned_fields_plus_id() {
        let d = doc! { "_id" => Value::Int32(1), "a" => Value::Int32(1), "b" => Value::Int32(2) };
        let spec = Projection::parse(&doc! { "a" => Value::Int32(1) }).unwrap();
        let out = project(&d, &spec).unwrap();
        assert_eq!(out.get("a"), Some(&Value::Int32(1)));
        assert_eq!(out.get("b"), None);
        assert_eq!(out.get("_id"), Some(&Value::Int32(1)));
    }

    #[test]
    fn exclusion_drops_mentioned_fields() {
        let d = doc! { "_id" => Value::Int32(1), "a" => Value::Int32(1), "b" => Value::Int32(2) };
        let spec = Projection::parse(&doc! { "b" => Value::Int32(0) }).unwrap();
        let out = project(&d, &spec).unwrap();
        assert_eq!(out.get("a"), Some(&Value::Int32(1)));
        assert_eq!(out.get("b"), None);
    }

    #[test]
    fn mixing_inclusion_exclusion_is_error() {
        let spec_doc = doc! { "a" => Value::Int32(1), "b" => Value::Int32(0) };
        assert!(Projection::parse(&spec_doc).is_err());
    }

    #[test]
    fn id_can_be_excluded_in_inclusion_mode() {
        let d = doc! { "_id" => Value::Int32(1), "v" => Value::Int32(99) };
        let spec = Projection::parse(&doc! { "_id" => Value::Int32(0), "v" => Value::Int32(1) }).unwrap();
        let out = project(&d, &spec).unwrap();
        assert_eq!(out.get("_id"), None);
        assert_eq!(out.get("v"), Some(&Value::Int32(99)));
    }

    #[test]
    fn projection_is_idempotent() {
        let d = doc! { "_id" => Value::Int32(1), "a" => Value::Int32(1), "b" => Value::Int32(2) };
        let spec = Projection::parse(&doc! { "a" => Value::Int32(1) }).unwrap();
        let once = project(&d, &spec).unwrap();
        let twice = project(&once, &spec).unwrap();
        assert_eq!(once, twice);
    }
}
