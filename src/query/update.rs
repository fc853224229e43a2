/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file query/update.rs
 * @brief Replacement and operator update application, with conflict detection.
 */

use crate::comparator::{compare_total, CompareResult};
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::path::Path;
use crate::query::filter::value_matches;
use crate::value::Value;
use std::time::{SystemTime, UNIX_EPOCH};

fn bad(msg: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::BadValue, msg.into())
}

enum UpdateKind {
    Replacement(Document),
    Operators(Document),
}

fn classify(spec: &Document) -> CommandResult<UpdateKind> {
    let has_op = spec.keys().any(|k| k.starts_with('$'));
    let has_plain = spec.keys().any(|k| !k.starts_with('$'));
    if has_op && has_plain {
        return Err(bad("update document cannot mix operators and replacement fields"));
    }
    if has_op {
        Ok(UpdateKind::Operators(spec.clone()))
    } else {
        Ok(UpdateKind::Replacement(spec.clone()))
    }
}

/// Applies `update_spec` to `doc` in place: either a full replacement
/// (preserving `_id`) or a set of update operators. `is_insert` allows
/// `$setOnInsert` to take effect and suppresses the `_id`-immutability check
/// (the caller is responsible for seeding `_id` consistently from the query
/// on the upsert-insert path).
pub fn apply_update(doc: &mut Document, update_spec: &Document, is_insert: bool) -> CommandResult<()> {
    match classify(update_spec)? {
        UpdateKind::Replacement(repl) => apply_replacement(doc, repl),
        UpdateKind::Operators(ops) => apply_operators(doc, &ops, is_insert),
    }
}

fn apply_replacement(doc: &mut Document, replacement: Document) -> CommandResult<()> {
    let existing_id = doc.id().cloned();
    let mut new_doc = replacement;
    match (existing_id, new_doc.get("_id").cloned()) {
        (Some(existing), Some(replacement_id)) if existing != replacement_id => {
            return Err(CommandError::new(ErrorCode::ImmutableField, "_id cannot be changed by a replacement update"))
        }
        (Some(existing), None) => {
            new_doc.insert("_id", existing);
        }
        _ => {}
    }
    *doc = new_doc;
    Ok(())
}

fn paths_conflict(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let ap: Vec<&str> = a.split('.').collect();
    let bp: Vec<&str> = b.split('.').collect();
    let (shorter, longer) = if ap.len() <= bp.len() { (&ap, &bp) } else { (&bp, &ap) };
    shorter.iter().zip(longer.iter()).all(|(x, y)| x == y)
}

fn detect_conflicts(ops: &Document) -> CommandResult<()> {
    let mut all_paths: Vec<String> = Vec::new();
    for (op_name, op_spec) in ops.iter() {
        let Some(spec_doc) = op_spec.as_document() else { continue };
        for (path_str, val) in spec_doc.iter() {
            all_paths.push(path_str.clone());
            if op_name == "$rename" {
                if let Value::String(dest) = val {
                    all_paths.push(dest.clone());
                }
            }
        }
    }
    for i in 0..all_paths.len() {
        for j in (i + 1)..all_paths.len() {
            if paths_conflict(&all_paths[i], &all_paths[j]) {
                return Err(CommandError::new(
                    ErrorCode::ConflictingUpdateOperators,
                    format!("Updating the path '{}' would create a conflict at '{}'", all_paths[j], all_paths[i]),
                ));
            }
        }
    }
    Ok(())
}

fn get_path(doc: &Document, path_str: &str) -> CommandResult<Option<Value>> {
    let path = Path::parse(path_str).map_err(CommandError::from)?;
    Ok(crate::path::get_from_document(doc, &path).ok().cloned())
}

fn set_path(doc: &mut Document, path_str: &str, v: Value) -> CommandResult<()> {
    let path = Path::parse(path_str).map_err(CommandError::from)?;
    crate::path::set(doc, &path, v).map_err(CommandError::from)
}

fn remove_path(doc: &mut Document, path_str: &str) -> CommandResult<()> {
    let path = Path::parse(path_str).map_err(CommandError::from)?;
    crate::path::remove(doc, &path).map_err(CommandError::from)
}

fn apply_operators(doc: &mut Document, ops: &Document, is_insert: bool) -> CommandResult<()> {
    detect_conflicts(ops)?;
    let original_id = doc.id().cloned();

    for (op_name, op_spec) in ops.iter() {
        let spec_doc = op_spec
            .as_document()
            .ok_or_else(|| bad(format!("{} requires a document argument", op_name)))?;
        match op_name.as_str() {
            "$set" => {
                for (path_str, v) in spec_doc.iter() {
                    set_path(doc, path_str, v.clone())?;
                }
            }
            "$unset" => {
                for (path_str, _) in spec_doc.iter() {
                    remove_path(doc, path_str)?;
                }
            }
            "$inc" => apply_numeric(doc, spec_doc, NumericOp::Inc)?,
            "$mul" => apply_numeric(doc, spec_doc, NumericOp::Mul)?,
            "$min" => apply_min_max(doc, spec_doc, true)?,
            "$max" => apply_min_max(doc, spec_doc, false)?,
            "$rename" => apply_rename(doc, spec_doc)?,
            "$currentDate" => apply_current_date(doc, spec_doc)?,
            "$push" => apply_push(doc, spec_doc)?,
            "$addToSet" => apply_add_to_set(doc, spec_doc)?,
            "$pop" => apply_pop(doc, spec_doc)?,
            "$pull" => apply_pull(doc, spec_doc)?,
            "$pullAll" => apply_pull_all(doc, spec_doc)?,
            "$setOnInsert" => {
                if is_insert {
                    for (path_str, v) in spec_doc.iter() {
                        set_path(doc, path_str, v.clone())?;
                    }
                }
            }
            other => return Err(CommandError::new(ErrorCode::NotImplemented, format!("unsupported update operator: {}", other))),
        }
    }

    if !is_insert {
        let new_id = doc.id().cloned();
        if original_id.is_some() && new_id != original_id {
            return Err(CommandError::new(ErrorCode::ImmutableField, "_id cannot be modified by an update"));
        }
    }
    Ok(())
}

enum NumericOp {
    Inc,
    Mul,
}

fn numeric_combine(a: &Value, b: &Value, op: &NumericOp) -> CommandResult<Value> {
    if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        let (x, y) = (a.as_f64().unwrap(), b.as_f64().unwrap());
        return Ok(Value::Double(match op {
            NumericOp::Inc => x + y,
            NumericOp::Mul => x * y,
        }));
    }
    let (x, y) = (a.as_whole_i64().unwrap(), b.as_whole_i64().unwrap());
    let result = match op {
        NumericOp::Inc => x.checked_add(y),
        NumericOp::Mul => x.checked_mul(y),
    }
    .ok_or_else(|| bad("numeric update operator overflowed"))?;
    if matches!(a, Value::Int64(_)) || matches!(b, Value::Int64(_)) || !(i32::MIN as i64..=i32::MAX as i64).contains(&result) {
        Ok(Value::Int64(result))
    } else {
        Ok(Value::Int32(result as i32))
    }
}

fn apply_numeric(doc: &mut Document, spec_doc: &Document, op: NumericOp) -> CommandResult<()> {
    for (path_str, delta) in spec_doc.iter() {
        if !delta.is_number() {
            return Err(bad(format!("{} requires a numeric argument", path_str)));
        }
        let new_val = match get_path(doc, path_str)? {
            None => delta.clone(),
            Some(existing) => {
                if !existing.is_number() {
                    return Err(CommandError::new(ErrorCode::TypeMismatch, format!("cannot apply numeric operator to non-numeric field '{}'", path_str)));
                }
                numeric_combine(&existing, delta, &op)?
            }
        };
        set_path(doc, path_str, new_val)?;
    }
    Ok(())
}

fn apply_min_max(doc: &mut Document, spec_doc: &Document, want_min: bool) -> CommandResult<()> {
    for (path_str, candidate) in spec_doc.iter() {
        let replace = match get_path(doc, path_str)? {
            None => true,
            Some(existing) => {
                let cmp = compare_total(candidate, &existing);
                if want_min {
                    cmp == CompareResult::Less
                } else {
                    cmp == CompareResult::Greater
                }
            }
        };
        if replace {
            set_path(doc, path_str, candidate.clone())?;
        }
    }
    Ok(())
}

fn apply_rename(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (src, dest_val) in spec_doc.iter() {
        let dest = dest_val.as_str().ok_or_else(|| bad("$rename target must be a string"))?;
        if src == dest {
            return Err(bad("$rename source and target fields must differ"));
        }
        if let Some(v) = get_path(doc, src)? {
            remove_path(doc, src)?;
            set_path(doc, dest, v)?;
        }
    }
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn apply_current_date(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (path_str, spec) in spec_doc.iter() {
        let as_timestamp = match spec {
            Value::Document(d) => d.get("$type").and_then(Value::as_str) == Some("timestamp"),
            Value::Bool(_) => false,
            _ => return Err(bad("$currentDate requires true or {$type: \"date\"|\"timestamp\"}")),
        };
        let v = if as_timestamp { Value::Timestamp(now_millis() as u64 / 1000) } else { Value::DateTime(now_millis()) };
        set_path(doc, path_str, v)?;
    }
    Ok(())
}

fn each_items(spec: &Value) -> Vec<Value> {
    match spec {
        Value::Document(d) => match d.get("$each") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![spec.clone()],
        },
        other => vec![other.clone()],
    }
}

fn take_array_field(doc: &Document, path_str: &str, op_name: &str) -> CommandResult<Vec<Value>> {
    match get_path(doc, path_str).ok().flatten() {
        Some(Value::Array(a)) => Ok(a),
        None => Ok(Vec::new()),
        Some(_) => Err(bad(format!("{} requires an array field at '{}'", op_name, path_str))),
    }
}

fn apply_push(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (path_str, spec) in spec_doc.iter() {
        let mut arr = take_array_field(doc, path_str, "$push")?;
        arr.extend(each_items(spec));
        set_path(doc, path_str, Value::Array(arr))?;
    }
    Ok(())
}

fn apply_add_to_set(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (path_str, spec) in spec_doc.iter() {
        let mut arr = take_array_field(doc, path_str, "$addToSet")?;
        for item in each_items(spec) {
            if !arr.iter().any(|e| e == &item) {
                arr.push(item);
            }
        }
        set_path(doc, path_str, Value::Array(arr))?;
    }
    Ok(())
}

fn apply_pop(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (path_str, dir) in spec_doc.iter() {
        let mut arr = take_array_field(doc, path_str, "$pop")?;
        if arr.is_empty() {
            continue;
        }
        match dir.as_whole_i64() {
            Some(1) => {
                arr.pop();
            }
            Some(-1) => {
                arr.remove(0);
            }
            _ => return Err(bad("$pop requires 1 or -1")),
        }
        set_path(doc, path_str, Value::Array(arr))?;
    }
    Ok(())
}

fn apply_pull(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (path_str, predicate) in spec_doc.iter() {
        let arr = take_array_field(doc, path_str, "$pull")?;
        let mut kept = Vec::with_capacity(arr.len());
        for elem in arr {
            if !value_matches(predicate, &elem)? {
                kept.push(elem);
            }
        }
        set_path(doc, path_str, Value::Array(kept))?;
    }
    Ok(())
}

fn apply_pull_all(doc: &mut Document, spec_doc: &Document) -> CommandResult<()> {
    for (path_str, victims) in spec_doc.iter() {
        let victims = match victims {
            Value::Array(a) => a,
            _ => return Err(bad("$pullAll requires an array")),
        };
        let arr = take_array_field(doc, path_str, "$pullAll")?;
        let kept: Vec<Value> = arr.into_iter().filter(|e| !victims.iter().any(|v| v == e)).collect();
        set_path(doc, path_str, Value::Array(kept))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn replacement_preserves_id() {
        let mut d = doc! { "_id" => Value::Int32(1), "a" => Value::Int32(1) };
        apply_update(&mut d, &doc! { "b" => Value::Int32(2) }, false).unwrap();
        assert_eq!(d.get("_id"), Some(&Value::Int32(1)));
        assert_eq!(d.get("a"), None);
        assert_eq!(d.get("b"), Some(&Value::Int32(2)));
    }

    #[test]
    fn conflicting_set_and_inc_on_same_path() {
        let mut d = doc! { "_id" => Value::Int32(1) };
        let spec = doc! { "$set" => doc! { "a.b" => Value::Int32(1) }, "$inc" => doc! { "a.b" => Value::Int32(2) } };
        let err = apply_update(&mut d, &spec, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConflictingUpdateOperators.code());
    }

    #[test]
    fn inc_creates_missing_field() {
        let mut d = doc! { "_id" => Value::Int32(1) };
        apply_update(&mut d, &doc! { "$inc" => doc! { "a" => Value::Int32(5) } }, false).unwrap();
        assert_eq!(d.get("a"), Some(&Value::Int32(5)));
    }

    #[test]
    fn inc_on_non_numeric_is_type_mismatch() {
        let mut d = doc! { "_id" => Value::Int32(1), "a" => Value::String("x".into()) };
        let err = apply_update(&mut d, &doc! { "$inc" => doc! { "a" => Value::Int32(1) } }, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::TypeMismatch.code());
    }

    #[test]
    fn push_with_each() {
        let mut d = doc! { "a" => vec![Value::Int32(1)] };
        let spec = doc! { "$push" => doc! { "a" => doc! { "$each" => vec![Value::Int32(2), Value::Int32(3)] } } };
        apply_update(&mut d, &spec, false).unwrap();
        assert_eq!(d.get("a").unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn add_to_set_dedupes() {
        let mut d = doc! { "a" => vec![Value::Int32(1)] };
        apply_update(&mut d, &doc! { "$addToSet" => doc! { "a" => Value::Int32(1) } }, false).unwrap();
        assert_eq!(d.get("a").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn id_is_immutable_on_operator_update() {
        let mut d = doc! { "_id" => Value::Int32(1) };
        let err = apply_update(&mut d, &doc! { "$set" => doc! { "_id" => Value::Int32(2) } }, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::ImmutableField.code());
    }

    #[test]
    fn set_on_insert_only_applies_on_insert() {
        let mut d = doc! { "_id" => Value::Int32(1) };
        apply_update(&mut d, &doc! { "$setOnInsert" => doc! { "a" => Value::Int32(1) } }, false).unwrap();
        assert_eq!(d.get("a"), None);

        let mut d2 = doc! { "_id" => Value::Int32(1) };
        apply_update(&mut d2, &doc! { "$setOnInsert" => doc! { "a" => Value::Int32(1) } }, true).unwrap();
        assert_eq!(d2.get("a"), Some(&Value::Int32(1)));
    }
}
