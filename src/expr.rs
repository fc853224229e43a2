/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file expr.rs
 * @brief `$expr` operator-expression evaluation, shared by `$match` and aggregation.
 */

use crate::comparator::{compare_eq, compare_total, CompareResult};
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::path::Path;
use crate::value::Value;

/// Evaluates an operator-expression tree against a document. Field references
/// are strings prefixed with `$` (e.g. `"$a.b"`); a missing referenced field
/// evaluates to `Null` rather than erroring. Anything else is a literal.
pub fn evaluate(expr: &Value, doc: &Document) -> CommandResult<Value> {
    match expr {
        Value::String(s) if s.starts_with('$') && !s.starts_with("$$") => Ok(resolve_field(&s[1..], doc)),
        Value::String(s) if s == "$$ROOT" => Ok(Value::Document(doc.clone())),
        Value::Document(d) if d.len() == 1 && d.keys().next().map(|k| k.starts_with('$')).unwrap_or(false) => {
            let (op, arg) = d.iter().next().unwrap();
            evaluate_operator(op, arg, doc)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, doc)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_field(path: &str, doc: &Document) -> Value {
    match Path::parse(path) {
        Ok(p) => crate::path::get_from_document(doc, &p).cloned().unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

fn evaluate_args(arg: &Value, doc: &Document) -> CommandResult<Vec<Value>> {
    match arg {
        Value::Array(items) => items.iter().map(|v| evaluate(v, doc)).collect(),
        other => Ok(vec![evaluate(other, doc)?]),
    }
}

fn evaluate_operator(op: &str, arg: &Value, doc: &Document) -> CommandResult<Value> {
    let bad = |msg: &str| CommandError::new(ErrorCode::BadValue, msg.to_string());
    match op {
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let args = evaluate_args(arg, doc)?;
            if args.len() != 2 {
                return Err(bad(&format!("{} requires exactly two arguments", op)));
            }
            let cmp = compare_total(&args[0], &args[1]);
            let result = match op {
                "$eq" => cmp == CompareResult::Equal,
                "$ne" => cmp != CompareResult::Equal,
                "$gt" => cmp == CompareResult::Greater,
                "$gte" => cmp != CompareResult::Less,
                "$lt" => cmp == CompareResult::Less,
                "$lte" => cmp != CompareResult::Greater,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        "$and" => {
            let args = evaluate_args(arg, doc)?;
            Ok(Value::Bool(args.iter().all(Value::as_bool_coerced)))
        }
        "$or" => {
            let args = evaluate_args(arg, doc)?;
            Ok(Value::Bool(args.iter().any(Value::as_bool_coerced)))
        }
        "$not" => {
            let args = evaluate_args(arg, doc)?;
            let v = args.into_iter().next().ok_or_else(|| bad("$not requires one argument"))?;
            Ok(Value::Bool(!v.as_bool_coerced()))
        }
        "$literal" => Ok(arg.clone()),
        "$type" => {
            let args = evaluate_args(arg, doc)?;
            let v = args.into_iter().next().ok_or_else(|| bad("$type requires one argument"))?;
            Ok(Value::String(v.type_name().to_string()))
        }
        "$ifNull" => {
            let args = evaluate_args(arg, doc)?;
            for v in &args[..args.len().saturating_sub(1)] {
                if !matches!(v, Value::Null) {
                    return Ok(v.clone());
                }
            }
            Ok(args.last().cloned().unwrap_or(Value::Null))
        }
        "$size" => {
            let args = evaluate_args(arg, doc)?;
            let v = args.into_iter().next().ok_or_else(|| bad("$size requires one argument"))?;
            match v {
                Value::Array(a) => Ok(Value::Int32(a.len() as i32)),
                _ => Err(bad("$size requires an array")),
            }
        }
        "$sum" => {
            let args = evaluate_args(arg, doc)?;
            let flattened: Vec<Value> = args
                .into_iter()
                .flat_map(|v| match v {
                    Value::Array(a) => a,
                    other => vec![other],
                })
                .collect();
            let mut total = 0f64;
            let mut all_int = true;
            let mut int_total: i64 = 0;
            for v in &flattened {
                if let Some(n) = v.as_f64() {
                    total += n;
                    if let Some(i) = v.as_whole_i64() {
                        int_total += i;
                    } else {
                        all_int = false;
                    }
                }
            }
            if all_int && int_total as f64 == total {
                Ok(Value::Int64(int_total))
            } else {
                Ok(Value::Double(total))
            }
        }
        _ => Err(CommandError::new(ErrorCode::NotImplemented, format!("unsupported expression operator: {}", op))),
    }
}

/// `Value` equality as used by `$expr`'s own top-level boolean coercion.
pub fn truthy(v: &Value) -> bool {
    v.as_bool_coerced()
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_eq(a, b)
}
