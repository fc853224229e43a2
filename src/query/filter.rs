/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file query/filter.rs
 * @brief `{field: value}` and operator-expression filter evaluation.
 */

use crate::comparator::{compare_eq, compare_for_filter, CompareResult};
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::path::Path;
use crate::value::Value;

/// A parsed filter is just the wire document itself -- both the evaluator and
/// the pushdown translator walk the same shape directly rather than building
/// a separate AST.
#[derive(Debug, Clone)]
pub struct Filter(pub Document);

impl Filter {
    pub fn new(doc: Document) -> Self {
        Filter(doc)
    }

    pub fn matches(&self, doc: &Document) -> CommandResult<bool> {
        evaluate(&self.0, doc)
    }
}

fn bad(msg: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::BadValue, msg.into())
}

/// Evaluates a filter document against a candidate document.
pub fn evaluate(filter: &Document, doc: &Document) -> CommandResult<bool> {
    for (key, predicate) in filter.iter() {
        let ok = if key.starts_with('$') {
            match key.as_str() {
                "$and" => all_subfilters(predicate, doc)?,
                "$or" => any_subfilters(predicate, doc)?,
                "$nor" => !any_subfilters(predicate, doc)?,
                "$expr" => crate::expr::evaluate(predicate, doc)?.as_bool_coerced(),
                other => return Err(bad(format!("unknown top-level operator: {}", other))),
            }
        } else {
            match_field(doc, key, predicate)?
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn subfilter_array(v: &Value) -> CommandResult<&[Value]> {
    match v {
        Value::Array(a) => Ok(a),
        _ => Err(bad("$and/$or/$nor requires an array of filter documents")),
    }
}

fn all_subfilters(v: &Value, doc: &Document) -> CommandResult<bool> {
    for sub in subfilter_array(v)? {
        let sub_doc = sub.as_document().ok_or_else(|| bad("$and/$or/$nor entries must be documents"))?;
        if !evaluate(sub_doc, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_subfilters(v: &Value, doc: &Document) -> CommandResult<bool> {
    for sub in subfilter_array(v)? {
        let sub_doc = sub.as_document().ok_or_else(|| bad("$and/$or/$nor entries must be documents"))?;
        if evaluate(sub_doc, doc)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolves a dotted path against a document for filter purposes. `None`
/// means the field is absent (as opposed to present-and-null).
fn resolve(doc: &Document, field: &str) -> Option<Value> {
    let path = Path::parse(field).ok()?;
    crate::path::get_from_document(doc, &path).ok().cloned()
}

fn match_field(doc: &Document, field: &str, predicate: &Value) -> CommandResult<bool> {
    let resolved = resolve(doc, field);
    match predicate {
        Value::Document(d) if !d.is_empty() && d.keys().next().map(|k| k.starts_with('$')).unwrap_or(false) => {
            match_operator_document(&resolved, d, doc)
        }
        Value::Regex { pattern, options } => Ok(regex_matches(pattern, options, &resolved)?),
        _ => Ok(literal_match(&resolved, predicate)),
    }
}

/// Matches a single already-resolved value (not a document field) against a
/// predicate -- an operator document, a sub-filter document (for array
/// elements that are themselves documents), a regex, or a literal. Used by
/// `$pull`'s element matching.
pub fn value_matches(predicate: &Value, value: &Value) -> CommandResult<bool> {
    match predicate {
        Value::Document(d) if !d.is_empty() => {
            let first_is_operator = d.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
            if first_is_operator {
                match_operator_document(&Some(value.clone()), d, &Document::new())
            } else if let Value::Document(vd) = value {
                evaluate(d, vd)
            } else {
                Ok(false)
            }
        }
        Value::Regex { pattern, options } => regex_matches(pattern, options, &Some(value.clone())),
        _ => Ok(literal_match(&Some(value.clone()), predicate)),
    }
}

fn literal_match(resolved: &Option<Value>, predicate: &Value) -> bool {
    match resolved {
        None => matches!(predicate, Value::Null),
        Some(v) => {
            if compare_eq(v, predicate) {
                return true;
            }
            if let Value::Array(arr) = v {
                return arr.iter().any(|e| compare_eq(e, predicate));
            }
            false
        }
    }
}

fn any_or_whole(resolved: &Option<Value>, test: impl Fn(&Value) -> CommandResult<bool>) -> CommandResult<bool> {
    match resolved {
        None => Ok(false),
        Some(Value::Array(arr)) => {
            for elem in arr {
                if test(elem)? {
                    return Ok(true);
                }
            }
            test(&Value::Array(arr.clone()))
        }
        Some(v) => test(v),
    }
}

fn match_operator_document(resolved: &Option<Value>, ops: &Document, root: &Document) -> CommandResult<bool> {
    // $regex/$options are consumed together since $options only modifies a
    // sibling $regex within the same operator document.
    let regex_pattern = ops.get("$regex");
    let regex_options = ops.get("$options");

    for (op, val) in ops.iter() {
        if !op.starts_with('$') {
            return Err(bad(format!("unknown operator field: {}", op)));
        }
        let ok = match op.as_str() {
            "$eq" => literal_match(resolved, val),
            "$ne" => !literal_match(resolved, val),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                if matches!(val, Value::Regex { .. }) {
                    return Err(bad(format!("{} does not accept a regex", op)));
                }
                any_or_whole(resolved, |v| {
                    Ok(match compare_for_filter(v, val) {
                        CompareResult::Incomparable => false,
                        cmp => match op.as_str() {
                            "$gt" => cmp == CompareResult::Greater,
                            "$gte" => cmp != CompareResult::Less,
                            "$lt" => cmp == CompareResult::Less,
                            "$lte" => cmp != CompareResult::Greater,
                            _ => unreachable!(),
                        },
                    })
                })?
            }
            "$in" => {
                let items = subfilter_like_array(val, "$in")?;
                items.iter().any(|p| literal_match(resolved, p))
            }
            "$nin" => {
                let items = subfilter_like_array(val, "$nin")?;
                !items.iter().any(|p| literal_match(resolved, p))
            }
            "$exists" => resolved.is_some() == val.as_bool_coerced(),
            "$type" => match resolved {
                Some(v) => type_matches(v, val)?,
                None => false,
            },
            "$size" => {
                let n = val.as_whole_i64().filter(|n| *n >= 0).ok_or_else(|| bad("$size requires a non-negative whole number"))?;
                matches!(resolved, Some(Value::Array(a)) if a.len() as i64 == n)
            }
            "$regex" => {
                if regex_options.is_some() && matches!(regex_pattern, Some(Value::Regex { .. })) {
                    return Err(bad("regex options specified in both $regex and $options"));
                }
                let (pattern, options) = regex_parts(regex_pattern.unwrap_or(val), regex_options)?;
                regex_matches(&pattern, &options, resolved)?
            }
            "$options" => true, // consumed above alongside $regex
            "$bitsAllClear" | "$bitsAllSet" | "$bitsAnyClear" | "$bitsAnySet" => {
                bits_match(op, resolved, val)?
            }
            "$mod" => mod_match(resolved, val)?,
            "$all" => all_match(resolved, val)?,
            "$elemMatch" => elem_match(resolved, val, root)?,
            "$not" => match val {
                Value::Null => return Err(bad("$not does not accept null")),
                Value::Document(d) => !match_operator_document(resolved, d, root)?,
                Value::Regex { pattern, options } => !regex_matches(pattern, options, resolved)?,
                _ => return Err(bad("$not requires a filter document or regex")),
            },
            other => return Err(CommandError::new(ErrorCode::NotImplemented, format!("unsupported operator: {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn subfilter_like_array<'a>(v: &'a Value, op: &str) -> CommandResult<&'a [Value]> {
    match v {
        Value::Array(a) => Ok(a),
        _ => Err(bad(format!("{} requires an array", op))),
    }
}

fn type_matches(v: &Value, alias: &Value) -> CommandResult<bool> {
    let aliases: Vec<&Value> = match alias {
        Value::Array(a) => a.iter().collect(),
        other => vec![other],
    };
    for a in aliases {
        let matched = match a {
            Value::String(s) if s == "number" => v.is_number(),
            Value::String(s) => type_alias_code(s).map(|code| code == v.type_code()).unwrap_or(false),
            _ => a.as_whole_i64().map(|code| code as i32 == v.type_code()).unwrap_or(false),
        };
        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}

fn type_alias_code(alias: &str) -> Option<i32> {
    Some(match alias {
        "double" => 1,
        "string" => 2,
        "object" => 3,
        "array" => 4,
        "binData" => 5,
        "objectId" => 7,
        "bool" => 8,
        "date" => 9,
        "null" => 10,
        "regex" => 11,
        "int" => 16,
        "timestamp" => 17,
        "long" => 18,
        "minKey" => -1,
        "maxKey" => 127,
        _ => return None,
    })
}

fn regex_parts(regex_value: &Value, options_key: Option<&Value>) -> CommandResult<(String, String)> {
    let (pattern, mut options) = match regex_value {
        Value::Regex { pattern, options } => (pattern.clone(), options.clone()),
        Value::String(s) => (s.clone(), String::new()),
        _ => return Err(bad("$regex requires a string or regex value")),
    };
    if let Some(Value::String(o)) = options_key {
        if !options.is_empty() && options != *o {
            return Err(bad("regex options specified in both $regex and $options"));
        }
        options = o.clone();
    }
    Ok((pattern, options))
}

fn compile_regex(pattern: &str, options: &str) -> CommandResult<regex::Regex> {
    let mut flags = String::new();
    for c in options.chars() {
        match c {
            'i' | 'm' | 's' | 'x' => flags.push(c),
            _ => {}
        }
    }
    let full = if flags.is_empty() { pattern.to_string() } else { format!("(?{}){}", flags, pattern) };
    regex::Regex::new(&full).map_err(|e| bad(format!("invalid regular expression: {}", e)))
}

fn regex_matches(pattern: &str, options: &str, resolved: &Option<Value>) -> CommandResult<bool> {
    let re = compile_regex(pattern, options)?;
    any_or_whole(resolved, |v| {
        Ok(match v.as_str() {
            Some(s) => re.is_match(s),
            None => false,
        })
    })
}

fn bits_value(v: &Value) -> Option<u64> {
    match v {
        Value::Int32(i) => Some(*i as u32 as u64),
        Value::Int64(i) => Some(*i as u64),
        Value::Double(d) if d.fract() == 0.0 => Some(*d as i64 as u64),
        Value::Binary { bytes, .. } => {
            let mut mask = 0u64;
            for (i, b) in bytes.iter().take(8).enumerate() {
                mask |= (*b as u64) << (i * 8);
            }
            Some(mask)
        }
        _ => None,
    }
}

fn bits_mask(predicate: &Value) -> CommandResult<u64> {
    match predicate {
        Value::Array(positions) => {
            let mut mask = 0u64;
            for p in positions {
                let pos = p.as_whole_i64().filter(|n| *n >= 0).ok_or_else(|| bad("bit position must be a non-negative whole number"))?;
                if pos < 64 {
                    mask |= 1u64 << pos;
                }
            }
            Ok(mask)
        }
        other => bits_value(other).ok_or_else(|| bad("bitmask must be a whole number, bit-position array, or binary value")),
    }
}

fn bits_match(op: &str, resolved: &Option<Value>, predicate: &Value) -> CommandResult<bool> {
    let mask = bits_mask(predicate)?;
    any_or_whole(resolved, |v| {
        let value = bits_value(v).ok_or_else(|| bad("$bits* requires a numeric or binary field"))?;
        Ok(match op {
            "$bitsAllClear" => (value & mask) == 0,
            "$bitsAllSet" => (value & mask) == mask,
            "$bitsAnyClear" => (value & mask) != mask,
            "$bitsAnySet" => (value & mask) != 0,
            _ => unreachable!(),
        })
    })
}

fn mod_match(resolved: &Option<Value>, predicate: &Value) -> CommandResult<bool> {
    let arr = match predicate {
        Value::Array(a) if a.len() == 2 => a,
        _ => return Err(bad("$mod requires an array of [divisor, remainder]")),
    };
    let divisor = arr[0].as_whole_i64().ok_or_else(|| bad("$mod divisor must be a whole number"))?;
    let remainder = arr[1].as_whole_i64().ok_or_else(|| bad("$mod remainder must be a whole number"))?;
    if divisor == 0 {
        return Err(bad("$mod divisor cannot be 0"));
    }
    any_or_whole(resolved, |v| {
        Ok(v.as_whole_i64().map(|n| n % divisor == remainder).unwrap_or(false))
    })
}

fn all_match(resolved: &Option<Value>, predicate: &Value) -> CommandResult<bool> {
    let wanted = match predicate {
        Value::Array(a) => a,
        _ => return Err(bad("$all requires an array")),
    };
    let arr = match resolved {
        Some(Value::Array(a)) => a,
        _ => return Ok(wanted.is_empty()),
    };
    Ok(wanted.iter().all(|w| arr.iter().any(|e| compare_eq(e, w))))
}

fn elem_match(resolved: &Option<Value>, predicate: &Value, root: &Document) -> CommandResult<bool> {
    let arr = match resolved {
        Some(Value::Array(a)) => a,
        _ => return Ok(false),
    };
    let pred_doc = predicate.as_document().ok_or_else(|| bad("$elemMatch requires a filter document"))?;
    let is_operator_form = pred_doc.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
    for elem in arr {
        let matched = if is_operator_form {
            match_operator_document(&Some(elem.clone()), pred_doc, root)?
        } else {
            match elem.as_document() {
                Some(d) => evaluate(pred_doc, d)?,
                None => false,
            }
        };
        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn simple_equality() {
        let d = doc! { "a" => Value::Int32(1) };
        let f = doc! { "a" => Value::Int32(1) };
        assert!(evaluate(&f, &d).unwrap());
    }

    #[test]
    fn array_traversal_matches_element() {
        let d = doc! { "a" => vec![Value::Int32(1), Value::Int32(2)] };
        let f = doc! { "a" => Value::Int32(2) };
        assert!(evaluate(&f, &d).unwrap());
    }

    #[test]
    fn gt_operator() {
        let d = doc! { "a" => Value::Int32(5) };
        let f = doc! { "a" => doc! { "$gt" => Value::Int32(3) } };
        assert!(evaluate(&f, &d).unwrap());
    }

    #[test]
    fn exists_false_for_absent_field() {
        let d = doc! { "a" => Value::Int32(1) };
        let f = doc! { "b" => doc! { "$exists" => Value::Bool(true) } };
        assert!(!evaluate(&f, &d).unwrap());
    }

    #[test]
    fn and_or_nor_combinators() {
        let d = doc! { "a" => Value::Int32(1), "b" => Value::Int32(2) };
        let f = doc! { "$and" => vec![
            Value::Document(doc! { "a" => Value::Int32(1) }),
            Value::Document(doc! { "b" => Value::Int32(2) }),
        ]};
        assert!(evaluate(&f, &d).unwrap());

        let f2 = doc! { "$nor" => vec![Value::Document(doc! { "a" => Value::Int32(99) })] };
        assert!(evaluate(&f2, &d).unwrap());
    }

    #[test]
    fn null_equality_matches_missing_field() {
        let d = doc! { "a" => Value::Int32(1) };
        let f = doc! { "b" => Value::Null };
        assert!(evaluate(&f, &d).unwrap());
    }

    #[test]
    fn size_requires_exact_length() {
        let d = doc! { "a" => vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)] };
        let f = doc! { "a" => doc! { "$size" => Value::Int32(3) } };
        assert!(evaluate(&f, &d).unwrap());
        let f2 = doc! { "a" => doc! { "$size" => Value::Int32(2) } };
        assert!(!evaluate(&f2, &d).unwrap());
    }

    #[test]
    fn elem_match_against_subdocuments() {
        let d = doc! { "a" => vec![
            Value::Document(doc! { "x" => Value::Int32(1) }),
            Value::Document(doc! { "x" => Value::Int32(5) }),
        ]};
        let f = doc! { "a" => doc! { "$elemMatch" => doc! { "x" => doc! { "$gt" => Value::Int32(3) } } } };
        assert!(evaluate(&f, &d).unwrap());
    }

    #[test]
    fn expr_top_level() {
        let d = doc! { "a" => Value::Int32(1), "b" => Value::Int32(1) };
        let f = doc! { "$expr" => doc! { "$eq" => vec![Value::String("$a".into()), Value::String("$b".into())] } };
        assert!(evaluate(&f, &d).unwrap());
    }

    #[test]
    fn regex_inside_gt_is_error() {
        let d = doc! { "a" => Value::String("x".into()) };
        let f = doc! { "a" => doc! { "$gt" => Value::Regex { pattern: "x".into(), options: String::new() } } };
        assert!(evaluate(&f, &d).is_err());
    }
}
