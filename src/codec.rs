/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file codec.rs
 * @brief Bidirectional BSON<->storage-JSON mapping with a type sidecar.
 *
 * Two conversions live here:
 *  - `wire`: `bson::Bson`/`bson::Document` (what the driver sends over the
 *    socket) <-> our internal `Value`/`Document` model.
 *  - `storage`: internal `Value`/`Document` <-> a `serde_json::Value` that
 *    carries a `$s` sidecar recording the exact BSON type of every field, so
 *    that round-tripping through a JSONB column loses no type information.
 */

use crate::document::{Document, DocumentError};
use crate::value::{ObjectId, Value};
use base64::Engine;
use serde_json::{json, Map, Number, Value as Json};
use thiserror::Error;

pub const MAX_NESTING_DEPTH: usize = 100;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("document too deeply nested (limit {0})")]
    TooDeep(usize),
    #[error("missing schema sidecar ($s)")]
    MissingSidecar,
    #[error("malformed schema sidecar: {0}")]
    MalformedSidecar(String),
    #[error("value does not match its declared schema type")]
    TypeMismatch,
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("bson error: {0}")]
    Bson(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

// ---------------------------------------------------------------------
// wire: bson::Bson <-> Value
// ---------------------------------------------------------------------
pub mod wire {
    use super::*;

    pub fn document_from_bson(doc: &bson::Document) -> Result<Document> {
        let pairs: Vec<(String, Value)> = doc
            .iter()
            .map(|(k, v)| Ok((k.clone(), value_from_bson(v)?)))
            .collect::<Result<_>>()?;
        Ok(Document::try_from_pairs(pairs)?)
    }

    pub fn value_from_bson(b: &bson::Bson) -> Result<Value> {
        Ok(match b {
            bson::Bson::Double(d) => Value::Double(*d),
            bson::Bson::String(s) => Value::String(s.clone()),
            bson::Bson::Array(a) => {
                Value::Array(a.iter().map(value_from_bson).collect::<Result<_>>()?)
            }
            bson::Bson::Document(d) => Value::Document(document_from_bson(d)?),
            bson::Bson::Boolean(b) => Value::Bool(*b),
            bson::Bson::Null => Value::Null,
            bson::Bson::RegularExpression(r) => Value::Regex {
                pattern: r.pattern.clone(),
                options: r.options.clone(),
            },
            bson::Bson::Int32(i) => Value::Int32(*i),
            bson::Bson::Int64(i) => Value::Int64(*i),
            bson::Bson::Timestamp(t) => Value::Timestamp(((t.time as u64) << 32) | t.increment as u64),
            bson::Bson::Binary(b) => Value::Binary {
                subtype: binary_subtype_to_u8(&b.subtype),
                bytes: b.bytes.clone(),
            },
            bson::Bson::ObjectId(o) => Value::ObjectId(ObjectId(o.bytes())),
            bson::Bson::DateTime(d) => Value::DateTime(d.timestamp_millis()),
            bson::Bson::MinKey => Value::MinKey,
            bson::Bson::MaxKey => Value::MaxKey,
            other => return Err(CodecError::Bson(format!("unsupported BSON type: {:?}", other))),
        })
    }

    pub fn document_to_bson(doc: &Document) -> bson::Document {
        let mut out = bson::Document::new();
        for (k, v) in doc.iter() {
            out.insert(k.clone(), value_to_bson(v));
        }
        out
    }

    pub fn value_to_bson(v: &Value) -> bson::Bson {
        match v {
            Value::Double(d) => bson::Bson::Double(*d),
            Value::String(s) => bson::Bson::String(s.clone()),
            Value::Binary { subtype, bytes } => bson::Bson::Binary(bson::Binary {
                subtype: u8_to_binary_subtype(*subtype),
                bytes: bytes.clone(),
            }),
            Value::ObjectId(o) => bson::Bson::ObjectId(bson::oid::ObjectId::from_bytes(o.0)),
            Value::Bool(b) => bson::Bson::Boolean(*b),
            Value::DateTime(ms) => bson::Bson::DateTime(bson::DateTime::from_millis(*ms)),
            Value::Null => bson::Bson::Null,
            Value::Regex { pattern, options } => {
                bson::Bson::RegularExpression(bson::Regex { pattern: pattern.clone(), options: options.clone() })
            }
            Value::Int32(i) => bson::Bson::Int32(*i),
            Value::Timestamp(t) => bson::Bson::Timestamp(bson::Timestamp {
                time: (*t >> 32) as u32,
                increment: *t as u32,
            }),
            Value::Int64(i) => bson::Bson::Int64(*i),
            Value::Document(d) => bson::Bson::Document(document_to_bson(d)),
            Value::Array(a) => bson::Bson::Array(a.iter().map(value_to_bson).collect()),
            Value::MinKey => bson::Bson::MinKey,
            Value::MaxKey => bson::Bson::MaxKey,
        }
    }

    fn binary_subtype_to_u8(s: &bson::spec::BinarySubtype) -> u8 {
        use bson::spec::BinarySubtype::*;
        match s {
            Generic => 0x00,
            Function => 0x01,
            BinaryOld => 0x02,
            UuidOld => 0x03,
            Uuid => 0x04,
            Md5 => 0x05,
            Encrypted => 0x06,
            UserDefined(n) => *n,
            _ => 0x00,
        }
    }

    fn u8_to_binary_subtype(n: u8) -> bson::spec::BinarySubtype {
        use bson::spec::BinarySubtype::*;
        match n {
            0x00 => Generic,
            0x01 => Function,
            0x02 => BinaryOld,
            0x03 => UuidOld,
            0x04 => Uuid,
            0x05 => Md5,
            0x06 => Encrypted,
            other => UserDefined(other),
        }
    }
}

// ---------------------------------------------------------------------
// storage: Value/Document <-> serde_json::Value with a `$s` sidecar
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Schema {
    Simple(&'static str),
    Binary(u8),
    Object { keys: Vec<String>, fields: std::collections::HashMap<String, Schema> },
    Array(Vec<Schema>),
}

impl Schema {
    fn to_json(&self) -> Json {
        match self {
            Schema::Simple(t) => json!({ "t": t }),
            Schema::Binary(subtype) => json!({ "t": "binData", "s": subtype }),
            Schema::Object { keys, fields } => {
                let mut f = Map::new();
                for (k, s) in fields {
                    f.insert(k.clone(), s.to_json());
                }
                json!({ "t": "object", "k": keys, "f": Json::Object(f) })
            }
            Schema::Array(items) => {
                json!({ "t": "array", "i": items.iter().map(Schema::to_json).collect::<Vec<_>>() })
            }
        }
    }

    fn from_json(j: &Json) -> Result<Schema> {
        let obj = j
            .as_object()
            .ok_or_else(|| CodecError::MalformedSidecar("schema is not an object".into()))?;
        let t = obj
            .get("t")
            .and_then(Json::as_str)
            .ok_or_else(|| CodecError::MalformedSidecar("missing 't'".into()))?;
        Ok(match t {
            "binData" => {
                let s = obj.get("s").and_then(Json::as_u64).unwrap_or(0) as u8;
                Schema::Binary(s)
            }
            "object" => {
                let keys: Vec<String> = obj
                    .get("k")
                    .and_then(Json::as_array)
                    .ok_or_else(|| CodecError::MalformedSidecar("missing 'k'".into()))?
                    .iter()
                    .filter_map(Json::as_str)
                    .map(String::from)
                    .collect();
                let f = obj
                    .get("f")
                    .and_then(Json::as_object)
                    .ok_or_else(|| CodecError::MalformedSidecar("missing 'f'".into()))?;
                let mut fields = std::collections::HashMap::new();
                for k in &keys {
                    let nested = f.get(k).ok_or_else(|| {
                        CodecError::MalformedSidecar(format!("schema missing field '{}'", k))
                    })?;
                    fields.insert(k.clone(), Schema::from_json(nested)?);
                }
                Schema::Object { keys, fields }
            }
            "array" => {
                let items = obj
                    .get("i")
                    .and_then(Json::as_array)
                    .ok_or_else(|| CodecError::MalformedSidecar("missing 'i'".into()))?
                    .iter()
                    .map(Schema::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Schema::Array(items)
            }
            other => Schema::Simple(match other {
                "double" => "double",
                "string" => "string",
                "objectId" => "objectId",
                "bool" => "bool",
                "date" => "date",
                "null" => "null",
                "regex" => "regex",
                "int" => "int",
                "timestamp" => "timestamp",
                "long" => "long",
                "minKey" => "minKey",
                "maxKey" => "maxKey",
                other => return Err(CodecError::MalformedSidecar(format!("unknown type tag '{}'", other))),
            }),
        })
    }
}

fn encode_value(v: &Value, depth: usize) -> Result<(Json, Schema)> {
    if depth > MAX_NESTING_DEPTH {
        return Err(CodecError::TooDeep(MAX_NESTING_DEPTH));
    }
    Ok(match v {
        Value::Double(d) => {
            let j = if d.is_nan() {
                json!("NaN")
            } else if d.is_infinite() {
                json!(if *d > 0.0 { "Infinity" } else { "-Infinity" })
            } else {
                Json::Number(Number::from_f64(*d).unwrap_or_else(|| Number::from(0)))
            };
            (j, Schema::Simple("double"))
        }
        Value::String(s) => (json!(s), Schema::Simple("string")),
        Value::Binary { subtype, bytes } => {
            let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
            (json!(b64), Schema::Binary(*subtype))
        }
        Value::ObjectId(o) => (json!(o.to_hex()), Schema::Simple("objectId")),
        Value::Bool(b) => (json!(b), Schema::Simple("bool")),
        Value::DateTime(ms) => (json!(ms), Schema::Simple("date")),
        Value::Null => (Json::Null, Schema::Simple("null")),
        Value::Regex { pattern, options } => {
            (json!({ "pattern": pattern, "options": options }), Schema::Simple("regex"))
        }
        Value::Int32(i) => (json!(i), Schema::Simple("int")),
        Value::Timestamp(t) => (json!(t.to_string()), Schema::Simple("timestamp")),
        Value::Int64(i) => (json!(i.to_string()), Schema::Simple("long")),
        Value::Document(doc) => {
            let (j, keys, fields) = encode_document_fields(doc, depth + 1)?;
            (j, Schema::Object { keys, fields })
        }
        Value::Array(arr) => {
            let mut items = Vec::with_capacity(arr.len());
            let mut schemas = Vec::with_capacity(arr.len());
            for elem in arr {
                let (j, s) = encode_value(elem, depth + 1)?;
                items.push(j);
                schemas.push(s);
            }
            (Json::Array(items), Schema::Array(schemas))
        }
        Value::MinKey => (Json::Null, Schema::Simple("minKey")),
        Value::MaxKey => (Json::Null, Schema::Simple("maxKey")),
    })
}

fn encode_document_fields(doc: &Document, depth: usize) -> Result<(Json, Vec<String>, std::collections::HashMap<String, Schema>)> {
    let mut obj = Map::new();
    let mut keys = Vec::new();
    let mut fields = std::collections::HashMap::new();
    for (k, v) in doc.iter() {
        let (j, s) = encode_value(v, depth)?;
        obj.insert(k.clone(), j);
        keys.push(k.clone());
        fields.insert(k.clone(), s);
    }
    Ok((Json::Object(obj), keys, fields))
}

/// Encodes a document into its storage representation: a JSON object whose
/// fields are the natively-encoded values, plus a `$s` sidecar describing
/// their exact BSON types.
pub fn encode(doc: &Document) -> Result<Json> {
    let (value_json, keys, fields) = encode_document_fields(doc, 0)?;
    let mut obj = match value_json {
        Json::Object(m) => m,
        _ => unreachable!(),
    };
    let schema = Schema::Object { keys, fields };
    obj.insert("$s".to_string(), schema.to_json());
    Ok(Json::Object(obj))
}

fn decode_value(j: &Json, schema: &Schema, depth: usize) -> Result<Value> {
    if depth > MAX_NESTING_DEPTH {
        return Err(CodecError::TooDeep(MAX_NESTING_DEPTH));
    }
    Ok(match schema {
        Schema::Simple("double") => match j {
            Json::String(s) if s == "NaN" => Value::Double(f64::NAN),
            Json::String(s) if s == "Infinity" => Value::Double(f64::INFINITY),
            Json::String(s) if s == "-Infinity" => Value::Double(f64::NEG_INFINITY),
            Json::Number(n) => Value::Double(n.as_f64().ok_or(CodecError::TypeMismatch)?),
            _ => return Err(CodecError::TypeMismatch),
        },
        Schema::Simple("string") => Value::String(j.as_str().ok_or(CodecError::TypeMismatch)?.to_string()),
        Schema::Binary(subtype) => {
            let s = j.as_str().ok_or(CodecError::TypeMismatch)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| CodecError::MalformedSidecar(e.to_string()))?;
            Value::Binary { subtype: *subtype, bytes }
        }
        Schema::Simple("objectId") => {
            let s = j.as_str().ok_or(CodecError::TypeMismatch)?;
            Value::ObjectId(ObjectId::from_hex(s).ok_or(CodecError::TypeMismatch)?)
        }
        Schema::Simple("bool") => Value::Bool(j.as_bool().ok_or(CodecError::TypeMismatch)?),
        Schema::Simple("date") => Value::DateTime(j.as_i64().ok_or(CodecError::TypeMismatch)?),
        Schema::Simple("null") => Value::Null,
        Schema::Simple("regex") => {
            let obj = j.as_object().ok_or(CodecError::TypeMismatch)?;
            let pattern = obj.get("pattern").and_then(Json::as_str).unwrap_or_default().to_string();
            let options = obj.get("options").and_then(Json::as_str).unwrap_or_default().to_string();
            Value::Regex { pattern, options }
        }
        Schema::Simple("int") => Value::Int32(j.as_i64().ok_or(CodecError::TypeMismatch)? as i32),
        Schema::Simple("timestamp") => {
            let s = j.as_str().ok_or(CodecError::TypeMismatch)?;
            Value::Timestamp(s.parse().map_err(|_| CodecError::TypeMismatch)?)
        }
        Schema::Simple("long") => {
            let s = j.as_str().ok_or(CodecError::TypeMismatch)?;
            Value::Int64(s.parse().map_err(|_| CodecError::TypeMismatch)?)
        }
        Schema::Simple("minKey") => Value::MinKey,
        Schema::Simple("maxKey") => Value::MaxKey,
        Schema::Object { keys, fields } => {
            let obj = j.as_object().ok_or(CodecError::TypeMismatch)?;
            Value::Document(decode_document_fields(obj, keys, fields, depth + 1)?)
        }
        Schema::Array(items) => {
            let arr = j.as_array().ok_or(CodecError::TypeMismatch)?;
            if arr.len() != items.len() {
                return Err(CodecError::MalformedSidecar("array length mismatch with schema".into()));
            }
            let mut out = Vec::with_capacity(arr.len());
            for (elem, s) in arr.iter().zip(items) {
                out.push(decode_value(elem, s, depth + 1)?);
            }
            Value::Array(out)
        }
        Schema::Simple(other) => return Err(CodecError::MalformedSidecar(format!("unhandled type tag '{}'", other))),
    })
}

fn decode_document_fields(
    obj: &Map<String, Json>,
    keys: &[String],
    fields: &std::collections::HashMap<String, Schema>,
    depth: usize,
) -> Result<Document> {
    let mut pairs = Vec::with_capacity(keys.len());
    for k in keys {
        let schema = fields
            .get(k)
            .ok_or_else(|| CodecError::MalformedSidecar(format!("schema missing field '{}'", k)))?;
        let j = obj
            .get(k)
            .ok_or_else(|| CodecError::MalformedSidecar(format!("value missing field '{}'", k)))?;
        pairs.push((k.clone(), decode_value(j, schema, depth)?));
    }
    Ok(Document::try_from_pairs(pairs)?)
}

/// Decodes a previously-`encode`d storage JSON value back into a `Document`.
/// A missing `$s` sidecar is an error (see module docs).
pub fn decode(j: &Json) -> Result<Document> {
    let obj = j.as_object().ok_or(CodecError::TypeMismatch)?;
    let sidecar = obj.get("$s").ok_or(CodecError::MissingSidecar)?;
    let schema = Schema::from_json(sidecar)?;
    match schema {
        Schema::Object { keys, fields } => decode_document_fields(obj, &keys, &fields, 0),
        _ => Err(CodecError::MalformedSidecar("top-level schema must be 'object'".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn roundtrip(d: Document) {
        let encoded = encode(&d).expect("encode");
        let decoded = decode(&encoded).expect("decode");
        assert_eq!(d, decoded);
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(doc! {
            "_id" => Value::ObjectId(ObjectId::new()),
            "s" => Value::String("hi".to_string()),
            "b" => Value::Bool(true),
            "n" => Value::Null,
            "d" => Value::Double(3.5),
            "i32" => Value::Int32(7),
            "i64" => Value::Int64(9_000_000_000),
            "ts" => Value::Timestamp(42),
            "date" => Value::DateTime(1_700_000_000_000),
        });
    }

    #[test]
    fn distinguishes_numeric_types() {
        let d = doc! { "a" => Value::Int32(1), "b" => Value::Int64(1), "c" => Value::Double(1.0) };
        let encoded = encode(&d).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert!(matches!(decoded.get("a").unwrap(), Value::Int32(1)));
        assert!(matches!(decoded.get("b").unwrap(), Value::Int64(1)));
        assert!(matches!(decoded.get("c").unwrap(), Value::Double(x) if *x == 1.0));
    }

    #[test]
    fn roundtrips_nan() {
        let d = doc! { "a" => Value::Double(f64::NAN) };
        let encoded = encode(&d).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert!(matches!(decoded.get("a").unwrap(), Value::Double(x) if x.is_nan()));
    }

    #[test]
    fn roundtrips_nested_documents_and_arrays() {
        let inner = doc! { "x" => Value::Int32(1) };
        let d = doc! {
            "a" => Value::Array(vec![Value::Int32(1), Value::String("two".into())]),
            "nested" => Value::Document(inner),
        };
        roundtrip(d);
    }

    #[test]
    fn roundtrips_binary_with_subtype() {
        let d = doc! { "b" => Value::Binary { subtype: 0x04, bytes: vec![1, 2, 3, 4] } };
        roundtrip(d);
    }

    #[test]
    fn missing_sidecar_is_error() {
        let j = json!({ "a": 1 });
        assert!(matches!(decode(&j), Err(CodecError::MissingSidecar)));
    }
}
