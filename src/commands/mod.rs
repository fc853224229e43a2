/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file commands/mod.rs
 * @brief Command dispatcher: routes a decoded command document to its
 * handler and renders the handler's result (or error) back onto the wire.
 */

pub mod admin;
pub mod crud;
pub mod extract;

use crate::backend::{Backend, Row};
use crate::cursor::CursorRegistry;
use crate::doc;
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode, FauxDBError};
use crate::pushdown;
use crate::query;
use crate::value::Value;
use futures::StreamExt;
use std::sync::Arc;

fn to_command_error(e: FauxDBError) -> CommandError {
    match e {
        FauxDBError::Command(ce) => ce,
        other => CommandError::new(ErrorCode::InternalError, other.to_string()),
    }
}

pub fn ok(mut body: Document) -> Document {
    body.insert("ok", Value::Double(1.0));
    body
}

/// Dispatches MongoDB wire commands to their handlers and owns the
/// resources a handler needs: the storage backend, the server-side cursor
/// table, and the pushdown feature flag.
pub struct Dispatcher {
    pub backend: Arc<dyn Backend>,
    pub cursors: Arc<CursorRegistry>,
    pub default_database: String,
    pub pushdown_enabled: bool,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, cursors: Arc<CursorRegistry>, default_database: String, pushdown_enabled: bool) -> Self {
        Self { backend, cursors, default_database, pushdown_enabled }
    }

    /// Runs one command document to completion, never propagating an error:
    /// every failure is rendered as `{ok: 0, code, codeName, errmsg}`.
    pub async fn dispatch(&self, cmd: &Document, owner_connection: u64) -> Document {
        match self.dispatch_inner(cmd, owner_connection).await {
            Ok(body) => body,
            Err(e) => e.to_document(),
        }
    }

    async fn dispatch_inner(&self, cmd: &Document, owner_connection: u64) -> CommandResult<Document> {
        let (name, _) = extract::command_name_and_target(cmd)?;
        let db = extract::database_name(cmd, &self.default_database);
        match name {
            "ping" => Ok(ok(Document::new())),
            "hello" | "ismaster" | "isMaster" => Ok(admin::hello()),
            "buildInfo" | "buildinfo" => Ok(admin::build_info()),
            "connectionStatus" => Ok(admin::connection_status()),
            "getParameter" => admin::get_parameter(cmd),
            "saslStart" => admin::sasl_start(cmd),
            "saslContinue" => admin::sasl_continue(cmd),
            "logout" => Ok(ok(Document::new())),
            "listDatabases" => admin::list_databases(&*self.backend).await,
            "create" => admin::create_collection(&*self.backend, &db, cmd).await,
            "drop" => admin::drop_collection(&*self.backend, &db, cmd).await,
            "dropDatabase" => admin::drop_database(&*self.backend, &db).await,
            "listCollections" => admin::list_collections(&*self.backend, &db).await,
            "listIndexes" => admin::list_indexes(&*self.backend, &db, cmd).await,
            "createIndexes" => admin::create_indexes(&*self.backend, &db, cmd).await,
            "dropIndexes" => admin::drop_indexes(&*self.backend, &db, cmd).await,
            "find" => crud::find(self, &db, cmd, owner_connection).await,
            "getMore" => crud::get_more(self, &db, cmd, owner_connection).await,
            "killCursors" => Ok(crud::kill_cursors(self, cmd)?),
            "insert" => crud::insert(self, &db, cmd).await,
            "update" => crud::update(self, &db, cmd).await,
            "delete" => crud::delete(self, &db, cmd).await,
            "findAndModify" | "findandmodify" => crud::find_and_modify(self, &db, cmd).await,
            "count" => crud::count(self, &db, cmd).await,
            "distinct" => crud::distinct(self, &db, cmd).await,
            "aggregate" => crud::aggregate(self, &db, cmd).await,
            "explain" => crud::explain(self, &db, cmd).await,
            other => Err(CommandError::new(ErrorCode::NotImplemented, format!("no such command: '{}'", other))),
        }
    }

    /// Runs `filter` (after pushdown translation) against a collection and
    /// returns every matching row, residual-filtered in-process. Does not
    /// apply sort/skip/limit/projection -- callers compose those themselves
    /// since not every caller wants them (e.g. `update`/`delete` never sort).
    pub(crate) async fn query_rows(&self, db: &str, collection: &str, filter: &Document) -> CommandResult<Vec<Row>> {
        let (pushdown_where, residual) = pushdown::build(filter, &[], self.pushdown_enabled);
        let mut stream = self
            .backend
            .collection_query(db, collection, &pushdown_where)
            .await
            .map_err(to_command_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            let row = row.map_err(to_command_error)?;
            if query::evaluate_filter(&residual, &row.document)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub(crate) async fn query_documents_sorted(
        &self,
        db: &str,
        collection: &str,
        filter: &Document,
        sort_keys: &[query::SortKey],
    ) -> CommandResult<Vec<Document>> {
        let (pushdown_where, residual) = pushdown::build(filter, sort_keys, self.pushdown_enabled);
        let mut stream = self
            .backend
            .collection_query(db, collection, &pushdown_where)
            .await
            .map_err(to_command_error)?;
        let mut docs = Vec::new();
        while let Some(row) = stream.next().await {
            let row = row.map_err(to_command_error)?;
            if query::evaluate_filter(&residual, &row.document)? {
                docs.push(row.document);
            }
        }
        query::sort_documents(&mut docs, sort_keys);
        Ok(docs)
    }
}

pub fn namespace(db: &str, collection: &str) -> String {
    format!("{}.{}", db, collection)
}

pub fn cursor_document(ns: String, first_batch: Vec<Document>, cursor_id: i64) -> Document {
    doc! {
        "cursor" => doc! {
            "firstBatch" => Value::Array(first_batch.into_iter().map(Value::Document).collect()),
            "id" => Value::Int64(cursor_id),
            "ns" => Value::String(ns),
        },
    }
}
