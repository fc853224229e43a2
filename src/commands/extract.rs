/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file commands/extract.rs
 * @brief Declarative-ish command-parameter extraction from a BSON command
 * document: each helper implements one of the recognized tag behaviors.
 */

use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::value::Value;
use crate::fauxdb_warn;

fn bad(msg: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::BadValue, msg.into())
}

/// A command document's first key is the command name; that key's value is
/// the collection name (or `1`/`true` for a database-scoped, collection-
/// agnostic command). Returns `(command_name, collection_value)`.
pub fn command_name_and_target(cmd: &Document) -> CommandResult<(&str, &Value)> {
    cmd.iter().next().map(|(k, v)| (k.as_str(), v)).ok_or_else(|| bad("empty command document"))
}

/// The `collection` tag: binds to the command's own key, requiring it to
/// actually be a collection name rather than the `1`/`true` sentinel.
pub fn collection_name(cmd: &Document) -> CommandResult<String> {
    let (name, target) = command_name_and_target(cmd)?;
    target
        .as_str()
        .map(String::from)
        .ok_or_else(|| bad(format!("'{}' requires a collection name", name)))
}

/// The `opt` tag over a sub-document field: optional, defaulting to an empty
/// document.
pub fn opt_document<'a>(cmd: &'a Document, field: &str) -> CommandResult<Option<&'a Document>> {
    match cmd.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_document().map(Some).ok_or_else(|| bad(format!("'{}' must be a document", field))),
    }
}

pub fn opt_array<'a>(cmd: &'a Document, field: &str) -> CommandResult<Option<&'a Vec<Value>>> {
    match cmd.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_array().map(Some).ok_or_else(|| bad(format!("'{}' must be an array", field))),
    }
}

pub fn require_array<'a>(cmd: &'a Document, field: &str) -> CommandResult<&'a Vec<Value>> {
    opt_array(cmd, field)?.ok_or_else(|| bad(format!("'{}' is required", field)))
}

/// `numericBool`: `true`/`false`, or any number (truthy via the usual BSON
/// zero-is-false rule).
pub fn numeric_bool(cmd: &Document, field: &str, default: bool) -> CommandResult<bool> {
    match cmd.get(field) {
        None => Ok(default),
        Some(v) if matches!(v, Value::Bool(_)) || v.is_number() => Ok(v.as_bool_coerced()),
        Some(_) => Err(bad(format!("'{}' must be a boolean or number", field))),
    }
}

/// `numericAsBool`: strictly a number, and strictly `0` or `1`.
pub fn numeric_as_bool(cmd: &Document, field: &str, default: bool) -> CommandResult<bool> {
    match cmd.get(field) {
        None => Ok(default),
        Some(v) if v.is_number() => match v.as_whole_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(bad(format!("'{}' must be 0 or 1", field))),
        },
        Some(_) => Err(bad(format!("'{}' must be numeric", field))),
    }
}

/// `opt` + `strict` + `positive` over an integer field: optional, must be a
/// whole number, must not be negative.
pub fn opt_non_negative_i64(cmd: &Document, field: &str, default: i64) -> CommandResult<i64> {
    match cmd.get(field) {
        None => Ok(default),
        Some(v) => {
            let n = v.as_whole_i64().ok_or_else(|| bad(format!("'{}' must be a whole number", field)))?;
            if n < 0 {
                return Err(bad(format!("'{}' must not be negative", field)));
            }
            Ok(n)
        }
    }
}

pub fn opt_i64(cmd: &Document, field: &str, default: i64) -> CommandResult<i64> {
    match cmd.get(field) {
        None => Ok(default),
        Some(v) => v.as_whole_i64().ok_or_else(|| bad(format!("'{}' must be a whole number", field))),
    }
}

pub fn opt_str<'a>(cmd: &'a Document, field: &str) -> CommandResult<Option<&'a str>> {
    match cmd.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| bad(format!("'{}' must be a string", field))),
    }
}

/// `unimplemented`: any presence of this field is rejected, regardless of
/// its value.
pub fn reject_if_present(cmd: &Document, field: &str) -> CommandResult<()> {
    if cmd.contains_key(field) {
        return Err(CommandError::new(ErrorCode::NotImplemented, format!("'{}' is not supported", field)));
    }
    Ok(())
}

/// `non-default`: presence is fine as long as the value equals `default`;
/// anything else is rejected as not implemented.
pub fn reject_if_non_default_bool(cmd: &Document, field: &str, default: bool) -> CommandResult<()> {
    if let Some(v) = cmd.get(field) {
        if v.as_bool_coerced() != default {
            return Err(CommandError::new(ErrorCode::NotImplemented, format!("'{}' != {} is not supported", field, default)));
        }
    }
    Ok(())
}

/// `ignored`: presence is logged and the field dropped.
pub fn ignore_if_present(cmd: &Document, field: &str) {
    if cmd.contains_key(field) {
        fauxdb_warn!("ignoring unsupported command field '{}'", field);
    }
}

/// Rejects unknown top-level fields not named in `known`, matching the
/// extractor's "unknown fields -> error" rule.
pub fn reject_unknown_fields(cmd: &Document, known: &[&str]) -> CommandResult<()> {
    for key in cmd.keys() {
        if key == "$db" || key.starts_with('$') {
            continue;
        }
        if !known.contains(&key.as_str()) {
            return Err(bad(format!("unrecognized field '{}'", key)));
        }
    }
    Ok(())
}

pub fn database_name(cmd: &Document, default_database: &str) -> String {
    opt_str(cmd, "$db").ok().flatten().map(String::from).unwrap_or_else(|| default_database.to_string())
}
