/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file commands/admin.rs
 * @brief Database/collection/index administration and handshake commands.
 */

use super::{extract, ok, to_command_error};
use crate::backend::{Backend, IndexMeta};
use crate::doc;
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::value::Value;

fn bad(msg: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::BadValue, msg.into())
}

fn current_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

pub fn hello() -> Document {
    ok(doc! {
        "ismaster" => Value::Bool(true),
        "isWritablePrimary" => Value::Bool(true),
        "maxBsonObjectSize" => Value::Int32(16 * 1024 * 1024),
        "maxMessageSizeBytes" => Value::Int32(48_000_000),
        "maxWriteBatchSize" => Value::Int32(100_000),
        "localTime" => Value::DateTime(current_millis()),
        "minWireVersion" => Value::Int32(0),
        "maxWireVersion" => Value::Int32(17),
        "readOnly" => Value::Bool(false),
    })
}

pub fn build_info() -> Document {
    ok(doc! {
        "version" => Value::String("7.0.0".to_string()),
        "versionArray" => Value::Array(vec![Value::Int32(7), Value::Int32(0), Value::Int32(0), Value::Int32(0)]),
        "bits" => Value::Int32(64),
        "maxBsonObjectSize" => Value::Int32(16 * 1024 * 1024),
    })
}

/// `saslStart`/`saslContinue`: the wire-level handshake surface is exposed
/// so drivers get a response they accept, but the core always succeeds in
/// one round trip rather than running the full SCRAM challenge-response --
/// exhaustive auth parity with the reference implementation is out of
/// scope (see DESIGN.md). `security::SecurityManager` carries the real
/// user store and password hashing for a future wiring of this handshake.
pub fn sasl_start(_cmd: &Document) -> CommandResult<Document> {
    Ok(ok(doc! {
        "conversationId" => Value::Int32(1),
        "done" => Value::Bool(true),
        "payload" => Value::Binary { subtype: 0, bytes: Vec::new() },
    }))
}

pub fn sasl_continue(_cmd: &Document) -> CommandResult<Document> {
    Ok(ok(doc! {
        "conversationId" => Value::Int32(1),
        "done" => Value::Bool(true),
        "payload" => Value::Binary { subtype: 0, bytes: Vec::new() },
    }))
}

pub fn connection_status() -> Document {
    ok(doc! {
        "authInfo" => doc! {
            "authenticatedUsers" => Value::Array(vec![]),
            "authenticatedUserRoles" => Value::Array(vec![]),
        },
    })
}

pub fn get_parameter(cmd: &Document) -> CommandResult<Document> {
    let show_details = cmd.get("getParameter").map(Value::as_bool_coerced).unwrap_or(false);
    if show_details {
        return Ok(ok(Document::new()));
    }
    Err(CommandError::new(ErrorCode::NotImplemented, "unrecognized parameter"))
}

pub async fn list_databases(backend: &dyn Backend) -> CommandResult<Document> {
    let names = backend.database_list().await.map_err(to_command_error)?;
    let mut databases = Vec::with_capacity(names.len());
    for name in &names {
        databases.push(Value::Document(doc! {
            "name" => Value::String(name.clone()),
            "sizeOnDisk" => Value::Int64(0),
            "empty" => Value::Bool(false),
        }));
    }
    Ok(ok(doc! {
        "databases" => Value::Array(databases),
        "totalSize" => Value::Int64(0),
    }))
}

pub async fn drop_database(backend: &dyn Backend, db: &str) -> CommandResult<Document> {
    backend.database_drop(db).await.map_err(to_command_error)?;
    Ok(ok(Document::new()))
}

pub async fn create_collection(backend: &dyn Backend, db: &str, cmd: &Document) -> CommandResult<Document> {
    let name = extract::collection_name(cmd)?;
    let capped = extract::numeric_bool(cmd, "capped", false)?;
    backend.database_get_or_create(db).await.map_err(to_command_error)?;
    backend.collection_create(db, &name, capped).await.map_err(to_command_error)?;
    Ok(ok(Document::new()))
}

pub async fn drop_collection(backend: &dyn Backend, db: &str, cmd: &Document) -> CommandResult<Document> {
    let name = extract::collection_name(cmd)?;
    backend.collection_drop(db, &name).await.map_err(to_command_error)?;
    Ok(ok(Document::new()))
}

pub async fn list_collections(backend: &dyn Backend, db: &str) -> CommandResult<Document> {
    let collections = backend.collection_list(db).await.map_err(to_command_error)?;
    let first_batch: Vec<Document> = collections
        .into_iter()
        .map(|c| {
            doc! {
                "name" => Value::String(c.name),
                "type" => Value::String("collection".to_string()),
                "options" => Document::new(),
            }
        })
        .collect();
    Ok(ok(super::cursor_document(format!("{}.$cmd.listCollections", db), first_batch, 0)))
}

fn parse_index_spec(spec: &Document) -> CommandResult<IndexMeta> {
    let key_doc = spec.get("key").and_then(Value::as_document).ok_or_else(|| bad("index spec requires 'key'"))?;
    let keys: Vec<(String, i32)> = key_doc
        .iter()
        .map(|(k, v)| {
            let dir = v.as_whole_i64().ok_or_else(|| bad("index key direction must be 1 or -1"))? as i32;
            Ok((k.clone(), dir))
        })
        .collect::<CommandResult<_>>()?;
    let default_name = keys.iter().map(|(k, d)| format!("{}_{}", k, d)).collect::<Vec<_>>().join("_");
    let name = spec.get("name").and_then(Value::as_str).map(String::from).unwrap_or(default_name);
    let unique = spec.get("unique").map(Value::as_bool_coerced).unwrap_or(false);
    Ok(IndexMeta { name, keys, unique })
}

pub async fn create_indexes(backend: &dyn Backend, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let specs = extract::require_array(cmd, "indexes")?;
    let indexes: Vec<IndexMeta> = specs
        .iter()
        .map(|v| v.as_document().ok_or_else(|| bad("index spec must be a document")).and_then(parse_index_spec))
        .collect::<CommandResult<_>>()?;
    backend.create_indexes(db, &collection, &indexes).await.map_err(to_command_error)?;
    Ok(ok(doc! { "numIndexesBefore" => Value::Int32(0), "numIndexesAfter" => Value::Int32(indexes.len() as i32) }))
}

pub async fn drop_indexes(backend: &dyn Backend, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    match cmd.get("index") {
        Some(Value::String(name)) if name != "*" => {
            backend.drop_index(db, &collection, name).await.map_err(to_command_error)?;
        }
        Some(_) => {
            for idx in backend.list_indexes(db, &collection).await.map_err(to_command_error)? {
                if idx.name != "_id_" {
                    backend.drop_index(db, &collection, &idx.name).await.map_err(to_command_error)?;
                }
            }
        }
        None => {}
    }
    Ok(ok(Document::new()))
}

pub async fn list_indexes(backend: &dyn Backend, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let indexes = backend.list_indexes(db, &collection).await.map_err(to_command_error)?;
    let mut first_batch = vec![doc! {
        "v" => Value::Int32(2),
        "key" => doc! { "_id" => Value::Int32(1) },
        "name" => Value::String("_id_".to_string()),
    }];
    for idx in indexes {
        let mut key_doc = Document::new();
        for (field, dir) in &idx.keys {
            key_doc.insert(field.clone(), Value::Int32(*dir));
        }
        let mut entry = doc! { "v" => Value::Int32(2), "key" => key_doc, "name" => Value::String(idx.name) };
        if idx.unique {
            entry.insert("unique", Value::Bool(true));
        }
        first_batch.push(entry);
    }
    Ok(ok(super::cursor_document(format!("{}.{}.$cmd.listIndexes", db, collection), first_batch, 0)))
}
