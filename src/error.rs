/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file error.rs
 * @brief Numeric error-code model: CommandError and WriteError shapes.
 */

use crate::document::Document;
use crate::doc;
use crate::value::Value;
use thiserror::Error;

/// The closed set of canonical error codes the test suite's literal-message
/// assertions rely on, plus a `Location` escape hatch for internal asserts
/// that do not have a well-known symbolic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    Unauthorized,
    TypeMismatch,
    NamespaceNotFound,
    PathNotViable,
    ConflictingUpdateOperators,
    NamespaceExists,
    InvalidNamespace,
    ImmutableField,
    CursorNotFound,
    /// The wire-level code (50738) used for a `getMore`/`killCursors` from a
    /// connection that does not own the cursor, distinct from the generic
    /// `CursorNotFound` (43) used elsewhere.
    CursorNotFoundCrossSession,
    DocumentValidationFailure,
    NotImplemented,
    DuplicateKey,
    /// An ad hoc internal-assertion code, mirroring the reference
    /// implementation's `Location#####` convention for errors that have no
    /// stable symbolic name.
    Location(i32),
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::Unauthorized => 13,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::PathNotViable => 28,
            ErrorCode::ConflictingUpdateOperators => 40,
            ErrorCode::CursorNotFound => 43,
            ErrorCode::NamespaceExists => 48,
            ErrorCode::InvalidNamespace => 73,
            ErrorCode::ImmutableField => 66,
            ErrorCode::DocumentValidationFailure => 121,
            ErrorCode::NotImplemented => 238,
            ErrorCode::DuplicateKey => 11000,
            ErrorCode::CursorNotFoundCrossSession => 50738,
            ErrorCode::Location(n) => n,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::NamespaceNotFound => "NamespaceNotFound",
            ErrorCode::PathNotViable => "PathNotViable",
            ErrorCode::ConflictingUpdateOperators => "ConflictingUpdateOperators",
            ErrorCode::CursorNotFound | ErrorCode::CursorNotFoundCrossSession => "CursorNotFound",
            ErrorCode::NamespaceExists => "NamespaceExists",
            ErrorCode::InvalidNamespace => "InvalidNamespace",
            ErrorCode::ImmutableField => "ImmutableField",
            ErrorCode::DocumentValidationFailure => "DocumentValidationFailure",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::DuplicateKey => "DuplicateKey",
            ErrorCode::Location(_) => "Location",
        }
    }
}

/// A whole-command failure, wrapped at the wire boundary as
/// `{ok: 0, code, codeName, errmsg}`.
#[derive(Debug, Clone, Error)]
#[error("{errmsg} (code {code})")]
pub struct CommandError {
    pub code: i32,
    pub code_name: String,
    pub errmsg: String,
}

impl CommandError {
    pub fn new(kind: ErrorCode, errmsg: impl Into<String>) -> Self {
        CommandError { code: kind.code(), code_name: kind.name().to_string(), errmsg: errmsg.into() }
    }

    pub fn to_document(&self) -> Document {
        doc! {
            "ok" => Value::Double(0.0),
            "code" => Value::Int32(self.code),
            "codeName" => Value::String(self.code_name.clone()),
            "errmsg" => Value::String(self.errmsg.clone()),
        }
    }
}

/// A single document's failure inside a bulk write.
#[derive(Debug, Clone)]
pub struct WriteError {
    pub index: usize,
    pub code: i32,
    pub code_name: String,
    pub errmsg: String,
}

impl WriteError {
    pub fn new(index: usize, kind: ErrorCode, errmsg: impl Into<String>) -> Self {
        WriteError { index, code: kind.code(), code_name: kind.name().to_string(), errmsg: errmsg.into() }
    }

    pub fn to_document(&self) -> Document {
        doc! {
            "index" => Value::Int32(self.index as i32),
            "code" => Value::Int32(self.code),
            "codeName" => Value::String(self.code_name.clone()),
            "errmsg" => Value::String(self.errmsg.clone()),
        }
    }
}

/// `{ok: 1, writeErrors: [...]}`, returned alongside any successfully-applied
/// writes from the same batch.
pub fn write_errors_document(errors: &[WriteError]) -> Document {
    doc! {
        "ok" => Value::Double(1.0),
        "writeErrors" => Value::Array(errors.iter().map(|e| Value::Document(e.to_document())).collect()),
    }
}

/// Ambient error type for everything below the command layer: wire I/O,
/// backend/SQL failures, (de)serialization. `Command` lets a `CommandError`
/// raised deep in a handler propagate with `?` up to the dispatcher boundary
/// that renders it onto the wire.
#[derive(Error, Debug)]
pub enum FauxDBError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("BSON error: {0}")]
    Bson(#[from] bson::de::Error),

    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    #[error("Wire protocol error: {0}")]
    WireProtocol(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),

    #[error(transparent)]
    Path(#[from] crate::path::PathError),

    #[error(transparent)]
    DocumentError(#[from] crate::document::DocumentError),
}

impl From<crate::path::PathError> for CommandError {
    fn from(e: crate::path::PathError) -> Self {
        use crate::path::PathErrorKind::*;
        let code = match e.kind {
            NotFound => ErrorCode::Location(31248),
            EmptyKey => ErrorCode::BadValue,
            ArrayIndexNotInteger => ErrorCode::BadValue,
            TypeMismatch => ErrorCode::TypeMismatch,
            PathNotViable => ErrorCode::PathNotViable,
        };
        CommandError::new(code, e.to_string())
    }
}

impl From<crate::document::DocumentError> for CommandError {
    fn from(e: crate::document::DocumentError) -> Self {
        CommandError::new(ErrorCode::BadValue, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FauxDBError>;
pub type CommandResult<T> = std::result::Result<T, CommandError>;
