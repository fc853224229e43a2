/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file pushdown.rs
 * @brief Safe-subset filter/sort compilation to parameterized SQL.
 *
 * Every value that reaches SQL text travels as a bind parameter -- including
 * field names -- so a filter document can never influence the query's
 * syntactic shape, only its parameter values.
 */

use crate::backend::PushdownWhere;
use crate::document::Document;
use crate::query::sort::SortKey;
use crate::value::Value;

/// A single bound parameter. The backend implementation maps each variant to
/// the driver's native type when binding (`tokio_postgres::types::ToSql`).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
}

fn push(args: &mut Vec<SqlParam>, p: SqlParam) -> usize {
    args.push(p);
    args.len()
}

/// Renders a type-strict equality clause for one top-level scalar field,
/// covering the safe subset named in the design: string, int32, int64,
/// float64, bool, datetime, objectId. Returns `None` for any value outside
/// that subset (the caller falls back to the residual filter entirely).
///
/// The clause is OR-ed with an admission for any document whose field is
/// itself an array: an array can match `$eq` by containing the literal as
/// an element (see `query/filter.rs`'s array-traversal rule), which this
/// per-field type-guarded comparison cannot evaluate. Excluding those rows
/// from the SQL predicate would be a false negative, so they are admitted
/// here and the residual filter (kept in full for every pushed key, see
/// `translate_filter`) decides them exactly. This makes the clause a pure
/// over-returning pre-filter: never narrower than the original predicate,
/// only ever a superset.
///
/// `$ne` has no such clause: its true negation would have to admit every
/// row whose stored type doesn't match or whose field is absent (since
/// those all satisfy Mongo's `$ne`), which degenerates to "almost every
/// row" and isn't worth pushing -- `$ne` always stays fully residual.
fn scalar_eq_clause(field: &str, val: &Value, args: &mut Vec<SqlParam>) -> Option<String> {
    let (type_name, expr) = match val {
        Value::String(s) => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::Text(s.clone()));
            ("string", format!("_jsonb ->> ${} = ${}", f, v))
        }
        Value::Bool(b) => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::Bool(*b));
            ("bool", format!("(_jsonb ->> ${})::boolean = ${}", f, v))
        }
        Value::Int32(i) => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::I32(*i));
            ("int", format!("(_jsonb ->> ${})::int = ${}", f, v))
        }
        // int64 is stored as a decimal-string sidecar value specifically so
        // this comparison stays exact text equality -- no IEEE-754 range
        // predicate fallback is needed the way it would be for a backend
        // that stores wide integers as native JSON numbers.
        Value::Int64(i) => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::Text(i.to_string()));
            ("long", format!("_jsonb ->> ${} = ${}", f, v))
        }
        Value::Double(d) if d.is_finite() => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::F64(*d));
            ("double", format!("(_jsonb ->> ${})::float8 = ${}", f, v))
        }
        Value::DateTime(ms) => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::I64(*ms));
            ("date", format!("(_jsonb ->> ${})::bigint = ${}", f, v))
        }
        Value::ObjectId(oid) => {
            let f = push(args, SqlParam::Text(field.to_string()));
            let v = push(args, SqlParam::Text(oid.to_hex()));
            ("objectId", format!("_jsonb ->> ${} = ${}", f, v))
        }
        _ => return None,
    };
    let type_field = push(args, SqlParam::Text(field.to_string()));
    let type_val = push(args, SqlParam::Text(type_name.to_string()));
    let array_field = push(args, SqlParam::Text(field.to_string()));
    Some(format!(
        "((_jsonb #>> ARRAY['$s','f', ${}, 't'] = ${} AND {}) OR _jsonb #>> ARRAY['$s','f', ${}, 't'] = 'array')",
        type_field, type_val, expr, array_field
    ))
}

fn translate_predicate(field: &str, predicate: &Value, args: &mut Vec<SqlParam>) -> Option<String> {
    match predicate {
        Value::Document(d) if d.len() == 1 => {
            let (op, v) = d.iter().next().unwrap();
            match op.as_str() {
                "$eq" => scalar_eq_clause(field, v, args),
                // Every other single-key operator (including `$ne`) has no
                // safe over-approximating SQL clause here; fall back to
                // residual-only rather than risk a false negative.
                _ => None,
            }
        }
        Value::Document(_) => None,
        scalar => scalar_eq_clause(field, scalar, args),
    }
}

/// Splits `filter` into a pushable WHERE clause plus a residual filter that
/// must still be evaluated in-process. No false negatives: every document
/// the pushed SQL predicate accepts is a superset of what the original
/// filter accepts.
///
/// Every top-level key's original predicate is kept in the residual
/// regardless of whether it was also pushed down -- the SQL clause (when
/// present) is purely an accelerant that shrinks what the backend returns,
/// never the sole check. This is what lets `scalar_eq_clause` over-admit
/// (array-typed fields, etc.) without compromising correctness: the
/// residual always re-applies the exact original filter.
fn translate_filter(filter: &Document, args: &mut Vec<SqlParam>) -> (Vec<String>, Document) {
    let mut clauses = Vec::new();
    let mut residual = Document::new();
    for (key, val) in filter.iter() {
        // Only bare top-level fields are pushed down; a dotted key like
        // "a.b" names a path, not a literal top-level JSON key, and cannot
        // be expressed as a single `_jsonb ->> $field` lookup.
        if key.starts_with('$') || key.contains('.') {
            residual.insert(key.clone(), val.clone());
            continue;
        }
        if let Some(clause) = translate_predicate(key, val, args) {
            clauses.push(clause);
        }
        residual.insert(key.clone(), val.clone());
    }
    (clauses, residual)
}

fn translate_sort(keys: &[SortKey], args: &mut Vec<SqlParam>) -> Option<String> {
    if keys.len() != 1 {
        return None;
    }
    let (field, ascending) = keys[0].as_top_level()?;
    let f = push(args, SqlParam::Text(field.to_string()));
    let dir = if ascending { "ASC" } else { "DESC" };
    Some(format!("(_jsonb -> ${}) {}", f, dir))
}

/// Builds the combined pushdown plan for a query: a single parameter list
/// shared by the WHERE and ORDER BY fragments, plus the residual filter the
/// caller must still apply to rows the SQL predicate returned. When
/// `enabled` is false (feature-flagged off), everything is residual and no
/// SQL fragment is produced.
pub fn build(filter: &Document, sort_keys: &[SortKey], enabled: bool) -> (PushdownWhere, Document) {
    if !enabled {
        return (PushdownWhere::default(), filter.clone());
    }
    let mut args = Vec::new();
    let (clauses, residual) = translate_filter(filter, &mut args);
    let sql = if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) };
    let order_by = translate_sort(sort_keys, &mut args);
    (PushdownWhere { sql, args, order_by }, residual)
}

/// The `explain` command's pushdown observability: whether pushdown
/// happened at all, and the generated fragment, for test assertions.
pub fn explain_document(pushdown: &PushdownWhere, residual: &Document) -> Document {
    use crate::doc;
    let pushed = pushdown.sql.is_some() || pushdown.order_by.is_some();
    doc! {
        "pushdown" => Value::Bool(pushed),
        "plan" => doc! {
            "where" => pushdown.sql.clone().map(Value::String).unwrap_or(Value::Null),
            "orderBy" => pushdown.order_by.clone().map(Value::String).unwrap_or(Value::Null),
            "paramCount" => Value::Int32(pushdown.args.len() as i32),
            "residualFilter" => Value::Document(residual.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::query::sort::SortKey;

    #[test]
    fn scalar_equality_is_pushed_down() {
        let filter = doc! { "name" => Value::String("alice".into()) };
        let (pw, residual) = build(&filter, &[], true);
        assert!(pw.sql.is_some());
        // The SQL clause is an accelerant only -- the original predicate
        // stays in the residual so the in-process check remains exact even
        // though the pushed clause over-admits array-typed fields.
        assert_eq!(residual, filter);
    }

    #[test]
    fn pushed_equality_clause_admits_array_typed_fields() {
        let filter = doc! { "tags" => Value::String("red".into()) };
        let mut args = Vec::new();
        let (clauses, residual) = translate_filter(&filter, &mut args);
        assert_eq!(clauses.len(), 1);
        assert!(clauses[0].contains("'array'"), "equality clause must not exclude array-typed fields: {}", clauses[0]);
        assert_eq!(residual, filter);
    }

    #[test]
    fn dollar_prefixed_keys_stay_residual() {
        let filter = doc! { "$or" => Value::Array(vec![]) };
        let (pw, residual) = build(&filter, &[], true);
        assert!(pw.sql.is_none());
        assert!(!residual.is_empty());
    }

    #[test]
    fn disabled_pushdown_is_fully_residual() {
        let filter = doc! { "name" => Value::String("alice".into()) };
        let (pw, residual) = build(&filter, &[], false);
        assert!(pw.sql.is_none());
        assert_eq!(residual, filter);
    }

    #[test]
    fn single_top_level_sort_is_pushed_down() {
        let keys = SortKey::parse_spec(&doc! { "v" => Value::Int32(-1) }).unwrap();
        let (pw, _) = build(&Document::new(), &keys, true);
        assert!(pw.order_by.is_some());
    }

    #[test]
    fn eq_inside_single_key_subdocument_is_pushed_down() {
        let filter = doc! { "age" => doc! { "$eq" => Value::Int32(30) } };
        let (pw, residual) = build(&filter, &[], true);
        assert!(pw.sql.is_some());
        assert_eq!(residual, filter);
    }

    #[test]
    fn ne_is_never_pushed_down() {
        // A type-strict `<>` clause would exclude documents missing the
        // field or holding it as a different type, both of which satisfy
        // Mongo's `$ne` -- so `$ne` must stay fully residual rather than
        // risk a false negative in the pushed SQL predicate.
        let filter = doc! { "age" => doc! { "$ne" => Value::Int32(30) } };
        let (pw, residual) = build(&filter, &[], true);
        assert!(pw.sql.is_none());
        assert_eq!(residual, filter);
    }

    #[test]
    fn nan_double_stays_residual() {
        let filter = doc! { "v" => Value::Double(f64::NAN) };
        let (pw, residual) = build(&filter, &[], true);
        assert!(pw.sql.is_none());
        assert!(!residual.is_empty());
    }
}
