/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file aggregation/mod.rs
 * @brief Aggregation pipeline: stages, `$expr`, and accumulators.
 */

use crate::comparator::compare_eq;
use crate::doc;
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::expr;
use crate::query::projection::{project, Projection};
use crate::query::sort::{sort_documents, SortKey};
use crate::value::Value;

fn bad(msg: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::BadValue, msg.into())
}

/// Runs a pipeline against the documents a backend query already produced
/// (post-`$match`-pushdown, pre-residual). `coll_stats` is invoked lazily,
/// only if the pipeline opens with `$collStats`.
pub fn execute(
    docs: Vec<Document>,
    stages: &[Document],
    coll_stats: impl FnOnce() -> CommandResult<Document>,
) -> CommandResult<Vec<Document>> {
    if stages.is_empty() {
        return Ok(docs);
    }
    let first_is_stats = stages[0].contains_key("$collStats");
    if stages[1..].iter().any(|s| s.contains_key("$collStats")) {
        return Err(bad("$collStats is only valid as the first stage"));
    }
    if first_is_stats {
        let stats = coll_stats()?;
        return run_stages(vec![stats], &stages[1..]);
    }
    run_stages(docs, stages)
}

fn run_stages(mut docs: Vec<Document>, stages: &[Document]) -> CommandResult<Vec<Document>> {
    for stage in stages {
        let (name, spec) = stage.iter().next().ok_or_else(|| bad("empty aggregation stage"))?;
        docs = match name.as_str() {
            "$match" => {
                let filter = spec.as_document().ok_or_else(|| bad("$match requires a document"))?;
                let mut out = Vec::with_capacity(docs.len());
                for d in docs {
                    if crate::query::filter::evaluate(filter, &d)? {
                        out.push(d);
                    }
                }
                out
            }
            "$sort" => {
                let spec_doc = spec.as_document().ok_or_else(|| bad("$sort requires a document"))?;
                if spec_doc.is_empty() {
                    return Err(CommandError::new(ErrorCode::Location(15976), "$sort stage must have at least one sort key"));
                }
                let keys = SortKey::parse_spec(spec_doc)?;
                let mut d = docs;
                sort_documents(&mut d, &keys);
                d
            }
            "$limit" => {
                let n = spec.as_whole_i64().filter(|n| *n >= 0).ok_or_else(|| bad("$limit requires a non-negative whole number"))?;
                docs.into_iter().take(n as usize).collect()
            }
            "$skip" => {
                let n = spec.as_whole_i64().filter(|n| *n >= 0).ok_or_else(|| bad("$skip requires a non-negative whole number"))?;
                docs.into_iter().skip(n as usize).collect()
            }
            "$project" => {
                let spec_doc = spec.as_document().ok_or_else(|| bad("$project requires a document"))?;
                let pspec = Projection::parse(spec_doc)?;
                if pspec.is_empty() {
                    return Err(bad("$project requires a non-empty spec"));
                }
                docs.into_iter().map(|d| project(&d, &pspec)).collect::<CommandResult<Vec<_>>>()?
            }
            "$unset" => unset_stage(docs, spec)?,
            "$unwind" => unwind_stage(docs, spec)?,
            "$count" => {
                let field = spec.as_str().ok_or_else(|| bad("$count requires a field name string"))?;
                if field.is_empty() || field.contains('.') || field.starts_with('$') {
                    return Err(bad("invalid $count field name"));
                }
                vec![doc! { field => Value::Int64(docs.len() as i64) }]
            }
            "$group" => {
                let spec_doc = spec.as_document().ok_or_else(|| bad("$group requires a document"))?;
                group_stage(docs, spec_doc)?
            }
            "$collStats" => return Err(bad("$collStats is only valid as the first stage")),
            other => return Err(CommandError::new(ErrorCode::NotImplemented, format!("unsupported aggregation stage: {}", other))),
        };
    }
    Ok(docs)
}

fn unset_stage(docs: Vec<Document>, spec: &Value) -> CommandResult<Vec<Document>> {
    let fields: Vec<String> = match spec {
        Value::String(s) => vec![s.clone()],
        Value::Array(a) => a
            .iter()
            .map(|v| v.as_str().map(String::from).ok_or_else(|| bad("$unset array entries must be strings")))
            .collect::<CommandResult<Vec<_>>>()?,
        _ => return Err(bad("$unset requires a string or array of strings")),
    };
    let mut spec_doc = Document::new();
    for f in fields {
        spec_doc.insert(f, Value::Int32(0));
    }
    let pspec = Projection::parse(&spec_doc)?;
    docs.into_iter().map(|d| project(&d, &pspec)).collect()
}

fn unwind_stage(docs: Vec<Document>, spec: &Value) -> CommandResult<Vec<Document>> {
    let (path_str, preserve_empty, include_index) = match spec {
        Value::String(s) => (s.clone(), false, None),
        Value::Document(d) => {
            let path = d
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("$unwind requires a 'path' field"))?
                .to_string();
            let preserve = d.get("preserveNullAndEmptyArrays").map(Value::as_bool_coerced).unwrap_or(false);
            let idx_field = d.get("includeArrayIndex").and_then(Value::as_str).map(String::from);
            (path, preserve, idx_field)
        }
        _ => return Err(bad("$unwind requires a string or document")),
    };
    if !path_str.starts_with('$') {
        return Err(bad("$unwind path must start with '$'"));
    }
    let field_path = path_str[1..].to_string();
    let path = crate::path::Path::parse(&field_path).map_err(CommandError::from)?;

    let mut out = Vec::with_capacity(docs.len());
    for d in docs {
        match crate::path::get_from_document(&d, &path).ok().cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (i, item) in items.into_iter().enumerate() {
                    let mut d2 = d.clone();
                    crate::path::set(&mut d2, &path, item).map_err(CommandError::from)?;
                    if let Some(idx_field) = &include_index {
                        d2.insert(idx_field.clone(), Value::Int64(i as i64));
                    }
                    out.push(d2);
                }
            }
            _ if preserve_empty => {
                let mut d2 = d;
                if let Some(idx_field) = &include_index {
                    d2.insert(idx_field.clone(), Value::Null);
                }
                out.push(d2);
            }
            _ => {}
        }
    }
    Ok(out)
}

fn group_stage(docs: Vec<Document>, spec: &Document) -> CommandResult<Vec<Document>> {
    let id_expr = spec.get("_id").ok_or_else(|| bad("$group requires an _id expression"))?;
    let mut groups: Vec<(Value, Vec<Document>)> = Vec::new();
    for d in docs {
        let key = expr::evaluate(id_expr, &d)?;
        match groups.iter_mut().find(|(k, _)| compare_eq(k, &key)) {
            Some((_, members)) => members.push(d),
            None => groups.push((key, vec![d])),
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut result = Document::new();
        result.insert("_id", key);
        for (out_field, acc_spec) in spec.iter() {
            if out_field == "_id" {
                continue;
            }
            let acc_doc = acc_spec.as_document().ok_or_else(|| bad(format!("accumulator '{}' requires a document", out_field)))?;
            let (acc_op, acc_arg) = acc_doc.iter().next().ok_or_else(|| bad(format!("empty accumulator for '{}'", out_field)))?;
            let value = match acc_op.as_str() {
                "$sum" => sum_accumulator(acc_arg, &members)?,
                "$count" => Value::Int64(members.len() as i64),
                other => return Err(CommandError::new(ErrorCode::NotImplemented, format!("unsupported accumulator: {}", other))),
            };
            result.insert(out_field.clone(), value);
        }
        out.push(result);
    }
    Ok(out)
}

fn sum_accumulator(expr_spec: &Value, members: &[Document]) -> CommandResult<Value> {
    let mut total_f = 0f64;
    let mut total_i: i64 = 0;
    let mut all_int = true;
    for d in members {
        let v = expr::evaluate(expr_spec, d)?;
        if let Some(n) = v.as_f64() {
            total_f += n;
            match v.as_whole_i64() {
                Some(i) => total_i += i,
                None => all_int = false,
            }
        }
    }
    if all_int && (total_i as f64) == total_f {
        Ok(Value::Int64(total_i))
    } else {
        Ok(Value::Double(total_f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn stats_unused() -> CommandResult<Document> {
        Err(bad("coll_stats should not be invoked"))
    }

    #[test]
    fn match_then_count() {
        let docs: Vec<Document> = (0..10)
            .map(|i| doc! { "a" => Value::Int32(i), "b" => Value::Int32(if i < 3 { i } else { i + 1 }) })
            .collect();
        let stages = vec![
            doc! { "$match" => doc! { "$expr" => doc! { "$eq" => vec![Value::String("$a".into()), Value::String("$b".into())] } } },
            doc! { "$count" => Value::String("n".into()) },
        ];
        let out = execute(docs, &stages, stats_unused).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("n"), Some(&Value::Int64(3)));
    }

    #[test]
    fn group_sums_per_key() {
        let docs = vec![
            doc! { "cat" => Value::String("a".into()), "v" => Value::Int32(1) },
            doc! { "cat" => Value::String("a".into()), "v" => Value::Int32(2) },
            doc! { "cat" => Value::String("b".into()), "v" => Value::Int32(5) },
        ];
        let stages = vec![doc! {
            "$group" => doc! {
                "_id" => Value::String("$cat".into()),
                "total" => doc! { "$sum" => Value::String("$v".into()) },
            }
        }];
        let out = execute(docs, &stages, stats_unused).unwrap();
        assert_eq!(out.len(), 2);
        let a = out.iter().find(|d| d.get("_id") == Some(&Value::String("a".into()))).unwrap();
        assert_eq!(a.get("total"), Some(&Value::Int64(3)));
    }

    #[test]
    fn unwind_emits_one_doc_per_element() {
        let docs = vec![doc! { "tags" => vec![Value::String("x".into()), Value::String("y".into())] }];
        let stages = vec![doc! { "$unwind" => Value::String("$tags".into()) }];
        let out = execute(docs, &stages, stats_unused).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn sort_then_limit() {
        let docs: Vec<Document> = (0..5).map(|i| doc! { "v" => Value::Int32(i) }).collect();
        let stages = vec![
            doc! { "$sort" => doc! { "v" => Value::Int32(-1) } },
            doc! { "$limit" => Value::Int32(2) },
        ];
        let out = execute(docs, &stages, stats_unused).unwrap();
        assert_eq!(out[0].get("v"), Some(&Value::Int32(4)));
        assert_eq!(out[1].get("v"), Some(&Value::Int32(3)));
    }

    #[test]
    fn collstats_must_be_first() {
        let docs = vec![doc! { "v" => Value::Int32(1) }];
        let stages = vec![doc! { "$match" => Document::new() }, doc! { "$collStats" => Document::new() }];
        assert!(execute(docs, &stages, stats_unused).is_err());
    }
}
