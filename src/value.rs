/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file value.rs
 * @brief The document value model: one variant per BSON type.
 */

use crate::document::Document;
use rand::RngCore;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A 12-byte MongoDB-style ObjectID: 4-byte seconds, 5-byte process-random,
/// 3-byte counter. The counter wraps on overflow rather than erroring --
/// collisions within a single process/second/counter cycle are accepted,
/// matching the reference implementation's tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub [u8; 12]);

struct ObjectIdState {
    random: [u8; 5],
    counter: AtomicU32,
}

static OID_STATE: std::sync::OnceLock<ObjectIdState> = std::sync::OnceLock::new();

fn oid_state() -> &'static ObjectIdState {
    OID_STATE.get_or_init(|| {
        let mut random = [0u8; 5];
        rand::thread_rng().fill_bytes(&mut random);
        let mut counter_seed = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut counter_seed);
        ObjectIdState {
            random,
            counter: AtomicU32::new(u32::from_be_bytes(counter_seed) & 0x00FF_FFFF),
        }
    })
}

impl ObjectId {
    pub fn new() -> Self {
        let state = oid_state();
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        // wraps 0x00FFFFFF -> 0 rather than panicking; a 3-byte counter is
        // expected to cycle many times a second under load.
        let counter = state.counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&state.random);
        bytes[9] = (counter >> 16) as u8;
        bytes[10] = (counter >> 8) as u8;
        bytes[11] = counter as u8;
        ObjectId(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        for i in 0..12 {
            bytes[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ObjectId(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub type Array = Vec<Value>;

/// The document value model. One constructor per BSON type named in the
/// spec's data model, plus a `NaN` double is represented as `Double(f64::NAN)`
/// and compares equal to itself (see `comparator`).
#[derive(Debug, Clone)]
pub enum Value {
    Double(f64),
    String(String),
    Binary { subtype: u8, bytes: Vec<u8> },
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(i64),
    Null,
    Regex { pattern: String, options: String },
    Int32(i32),
    Timestamp(u64),
    Int64(i64),
    Document(Document),
    Array(Array),
    MinKey,
    MaxKey,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary { .. } => "binData",
            Value::ObjectId(_) => "objectId",
            Value::Bool(_) => "bool",
            Value::DateTime(_) => "date",
            Value::Null => "null",
            Value::Regex { .. } => "regex",
            Value::Int32(_) => "int",
            Value::Timestamp(_) => "timestamp",
            Value::Int64(_) => "long",
            Value::Document(_) => "object",
            Value::Array(_) => "array",
            Value::MinKey => "minKey",
            Value::MaxKey => "maxKey",
        }
    }

    /// BSON's numeric type code, used by `$type` when given an integer alias.
    pub fn type_code(&self) -> i32 {
        match self {
            Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Binary { .. } => 5,
            Value::ObjectId(_) => 7,
            Value::Bool(_) => 8,
            Value::DateTime(_) => 9,
            Value::Null => 10,
            Value::Regex { .. } => 11,
            Value::Int32(_) => 16,
            Value::Timestamp(_) => 17,
            Value::Int64(_) => 18,
            Value::MinKey => -1,
            Value::MaxKey => 127,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Double(_) | Value::Int32(_) | Value::Int64(_))
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Double(d) if d.is_nan())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int32(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Whole-number extraction used by operators that require non-fractional
    /// numeric input (`$size`, `$mod`, `$bitsAll*`, limit/skip).
    pub fn as_whole_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Int64(i) => Some(*i),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_bool_coerced(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Int32(i) => *i != 0,
            Value::Int64(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            _ => true,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}
impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(d)
    }
}
impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}
impl From<ObjectId> for Value {
    fn from(o: ObjectId) -> Self {
        Value::ObjectId(o)
    }
}

/// Equality used by the testsuite and `$eq`/`$in`: NaN-equal, exact type
/// within the scalar families that must not coincide (`int32(1) != int64(1)`
/// is NOT implied here -- numeric cross-type equality is value-based per the
/// comparator; see `comparator::compare_eq`).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        crate::comparator::compare_eq(self, other)
    }
}
