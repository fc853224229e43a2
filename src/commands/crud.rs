/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file commands/crud.rs
 * @brief find/getMore/killCursors, insert/update/delete/findAndModify,
 * count/distinct/aggregate, explain.
 */

use super::{extract, namespace, ok, to_command_error, Dispatcher};
use crate::aggregation;
use crate::comparator::compare_eq;
use crate::cursor::{CursorKind, NextBatchOutcome, TailableSource};
use crate::doc;
use crate::document::Document;
use crate::error::{CommandError, CommandResult, ErrorCode};
use crate::pushdown;
use crate::query::{self, Projection, SortKey};
use crate::value::{ObjectId, Value};

fn bad(msg: impl Into<String>) -> CommandError {
    CommandError::new(ErrorCode::BadValue, msg.into())
}

fn parse_sort(cmd: &Document, field: &str) -> CommandResult<Vec<SortKey>> {
    match extract::opt_document(cmd, field)? {
        Some(d) if !d.is_empty() => SortKey::parse_spec(d),
        _ => Ok(Vec::new()),
    }
}

fn parse_projection(cmd: &Document, field: &str) -> CommandResult<Option<Projection>> {
    match extract::opt_document(cmd, field)? {
        Some(d) if !d.is_empty() => Ok(Some(Projection::parse(d)?)),
        _ => Ok(None),
    }
}

fn cursor_kind(cmd: &Document) -> CommandResult<CursorKind> {
    let tailable = extract::numeric_bool(cmd, "tailable", false)?;
    let await_data = extract::numeric_bool(cmd, "awaitData", false)?;
    Ok(match (tailable, await_data) {
        (true, true) => CursorKind::TailableAwait,
        (true, false) => CursorKind::Tailable,
        (false, _) => CursorKind::Normal,
    })
}

pub async fn find(d: &Dispatcher, db: &str, cmd: &Document, owner: u64) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let filter = extract::opt_document(cmd, "filter")?.cloned().unwrap_or_default();
    let sort_keys = parse_sort(cmd, "sort")?;
    let projection = parse_projection(cmd, "projection")?;
    let skip = extract::opt_non_negative_i64(cmd, "skip", 0)? as usize;
    let limit = extract::opt_non_negative_i64(cmd, "limit", 0)? as usize;
    let batch_size = extract::opt_non_negative_i64(cmd, "batchSize", 101)?.max(1) as usize;
    let show_record_id = extract::numeric_bool(cmd, "showRecordId", false)?;
    let no_cursor_timeout = extract::numeric_bool(cmd, "noCursorTimeout", false)?;
    let kind = cursor_kind(cmd)?;

    // Tailable cursors track the backend's own `record_id` (natural/insertion
    // order) rather than an in-process document count, so they go through
    // `query_rows` directly instead of the document-only sorted path.
    let (mut docs, last_record_id) = if kind.is_tailable() {
        let mut rows = d.query_rows(db, &collection, &filter).await?;
        rows.sort_by_key(|r| r.record_id);
        let highest = rows.last().map(|r| r.record_id).unwrap_or(0);
        (rows.into_iter().map(|r| r.document).collect(), highest)
    } else {
        let docs = d.query_documents_sorted(db, &collection, &filter, &sort_keys).await?;
        (docs, 0)
    };
    if skip > 0 {
        docs = docs.into_iter().skip(skip).collect();
    }
    if limit > 0 {
        docs.truncate(limit);
    }
    if let Some(pspec) = &projection {
        docs = docs.into_iter().map(|doc| query::project(&doc, pspec)).collect::<CommandResult<_>>()?;
    }

    let ns = namespace(db, &collection);
    let tailable_source = kind
        .is_tailable()
        .then(|| TailableSource { database: db.to_string(), collection: collection.clone(), filter: filter.clone() });
    let (first_batch, cursor_id) = d.cursors.new_cursor(
        owner,
        ns.clone(),
        kind,
        show_record_id,
        no_cursor_timeout,
        docs,
        batch_size,
        last_record_id,
        tailable_source,
    );
    Ok(ok(super::cursor_document(ns, first_batch, cursor_id)))
}

pub async fn get_more(d: &Dispatcher, db: &str, cmd: &Document, owner: u64) -> CommandResult<Document> {
    let cursor_id = cmd
        .get("getMore")
        .and_then(Value::as_whole_i64)
        .ok_or_else(|| bad("'getMore' requires a cursor id"))?;
    let collection = extract::opt_str(cmd, "collection")?.map(String::from).unwrap_or_default();
    let batch_size = extract::opt_non_negative_i64(cmd, "batchSize", 101)?.max(1) as usize;

    let outcome = d.cursors.next_batch(cursor_id, owner, batch_size)?;
    let (documents, new_cursor_id) = match outcome {
        NextBatchOutcome::Batch { documents, cursor_id } => (documents, cursor_id),
        NextBatchOutcome::Requery { source, last_record_id } => {
            let mut pushdown_where = crate::backend::PushdownWhere::default();
            pushdown_where.sql = Some("record_id > $1".to_string());
            pushdown_where.args = vec![pushdown::SqlParam::I64(last_record_id)];
            pushdown_where.order_by = Some("record_id ASC".to_string());

            use futures::StreamExt as _;
            let mut stream = d.backend.collection_query(&source.database, &source.collection, &pushdown_where).await.map_err(to_command_error)?;
            let mut fresh = Vec::new();
            let mut highest = last_record_id;
            while let Some(row) = stream.next().await {
                let row = row.map_err(to_command_error)?;
                highest = highest.max(row.record_id);
                if query::evaluate_filter(&source.filter, &row.document)? {
                    fresh.push(row.document);
                }
            }
            d.cursors.refill(cursor_id, fresh.clone(), highest);
            (fresh, cursor_id)
        }
    };

    let ns = if collection.is_empty() {
        d.cursors.namespace(cursor_id).unwrap_or_else(|| namespace(db, "unknown"))
    } else {
        namespace(db, &collection)
    };
    Ok(ok(doc! {
        "cursor" => doc! {
            "nextBatch" => Value::Array(documents.into_iter().map(Value::Document).collect()),
            "id" => Value::Int64(new_cursor_id),
            "ns" => Value::String(ns),
        },
    }))
}

pub fn kill_cursors(d: &Dispatcher, cmd: &Document) -> CommandResult<Document> {
    let ids: Vec<i64> = extract::require_array(cmd, "cursors")?
        .iter()
        .map(|v| v.as_whole_i64().ok_or_else(|| bad("'cursors' entries must be integers")))
        .collect::<CommandResult<_>>()?;
    let (killed, not_found) = d.cursors.kill(&ids);
    Ok(ok(doc! {
        "cursorsKilled" => Value::Array(killed.into_iter().map(Value::Int64).collect()),
        "cursorsNotFound" => Value::Array(not_found.into_iter().map(Value::Int64).collect()),
        "cursorsAlive" => Value::Array(vec![]),
        "cursorsUnknown" => Value::Array(vec![]),
    }))
}

async fn check_duplicate_id(d: &Dispatcher, db: &str, collection: &str, id: &Value) -> CommandResult<bool> {
    let filter = doc! { "_id" => id.clone() };
    let rows = d.query_rows(db, collection, &filter).await?;
    Ok(!rows.is_empty())
}

pub async fn insert(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let documents = extract::require_array(cmd, "documents")?;
    let ordered = extract::numeric_bool(cmd, "ordered", true)?;

    d.backend.database_get_or_create(db).await.map_err(to_command_error)?;

    let mut to_insert: Vec<Document> = Vec::new();
    let mut write_errors = Vec::new();
    for (index, value) in documents.iter().enumerate() {
        let mut doc = value.as_document().ok_or_else(|| bad("'documents' entries must be documents"))?.clone();
        if doc.id().is_none() {
            doc.insert("_id", ObjectId::new());
        }
        let id = doc.id().cloned().unwrap();
        // A collision against a document already queued in this same batch
        // never reaches the backend (they are inserted together), so it has
        // to be checked here, not just against what is already stored.
        let collides_in_batch = to_insert.iter().any(|queued| queued.id().map(|qid| compare_eq(qid, &id)).unwrap_or(false));
        let duplicate = collides_in_batch || check_duplicate_id(d, db, &collection, &id).await?;
        if duplicate {
            write_errors.push(crate::error::WriteError::new(index, ErrorCode::DuplicateKey, format!("duplicate key error for _id: {:?}", id)));
            if ordered {
                break;
            }
            continue;
        }
        to_insert.push(doc);
    }

    let inserted = if to_insert.is_empty() { 0 } else { d.backend.collection_insert_all(db, &collection, &to_insert).await.map_err(to_command_error)?.len() };

    let mut body = doc! { "n" => Value::Int32(inserted as i32) };
    if !write_errors.is_empty() {
        body.insert("writeErrors", Value::Array(write_errors.iter().map(|e| Value::Document(e.to_document())).collect()));
    }
    Ok(ok(body))
}

fn seed_from_filter(filter: &Document) -> Document {
    let mut seed = Document::new();
    for (k, v) in filter.iter() {
        if k.starts_with('$') || k.contains('.') {
            continue;
        }
        match v {
            Value::Document(sub) if sub.len() == 1 && sub.keys().next().map(|k| k.as_str()) == Some("$eq") => {
                seed.insert(k.clone(), sub.get("$eq").cloned().unwrap());
            }
            Value::Document(_) => {}
            scalar => {
                seed.insert(k.clone(), scalar.clone());
            }
        }
    }
    seed
}

pub async fn update(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let updates = extract::require_array(cmd, "updates")?;

    let mut matched = 0i64;
    let mut modified = 0i64;
    let mut upserted = Vec::new();

    for spec in updates {
        let spec = spec.as_document().ok_or_else(|| bad("'updates' entries must be documents"))?;
        let filter = spec.get("q").and_then(Value::as_document).ok_or_else(|| bad("update spec requires 'q'"))?;
        let update_spec = spec.get("u").and_then(Value::as_document).ok_or_else(|| bad("update spec requires 'u'"))?;
        let upsert = spec.get("upsert").map(Value::as_bool_coerced).unwrap_or(false);
        let multi = spec.get("multi").map(Value::as_bool_coerced).unwrap_or(false);

        let rows = d.query_rows(db, &collection, filter).await?;
        if rows.is_empty() {
            if upsert {
                let mut new_doc = seed_from_filter(filter);
                query::apply_update(&mut new_doc, update_spec, true)?;
                if new_doc.id().is_none() {
                    new_doc.insert("_id", ObjectId::new());
                }
                let id = new_doc.id().cloned().unwrap();
                d.backend.collection_insert_all(db, &collection, std::slice::from_ref(&new_doc)).await.map_err(to_command_error)?;
                upserted.push(Value::Document(doc! { "index" => Value::Int32(upserted.len() as i32), "_id" => id }));
            }
            continue;
        }

        let targets = if multi { rows } else { rows.into_iter().take(1).collect() };
        matched += targets.len() as i64;
        let mut changed = Vec::with_capacity(targets.len());
        for row in targets {
            let mut doc = row.document;
            query::apply_update(&mut doc, update_spec, false)?;
            changed.push((row.record_id, doc));
        }
        modified += changed.len() as i64;
        if !changed.is_empty() {
            d.backend.collection_update_all(db, &collection, &changed).await.map_err(to_command_error)?;
        }
    }

    let mut body = doc! { "n" => Value::Int64(matched + upserted.len() as i64), "nModified" => Value::Int64(modified) };
    if !upserted.is_empty() {
        body.insert("upserted", Value::Array(upserted));
    }
    Ok(ok(body))
}

pub async fn delete(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let deletes = extract::require_array(cmd, "deletes")?;

    let mut deleted = 0i64;
    for spec in deletes {
        let spec = spec.as_document().ok_or_else(|| bad("'deletes' entries must be documents"))?;
        let filter = spec.get("q").and_then(Value::as_document).ok_or_else(|| bad("delete spec requires 'q'"))?;
        let limit = spec.get("limit").and_then(Value::as_whole_i64).unwrap_or(0);

        let mut rows = d.query_rows(db, &collection, filter).await?;
        if limit == 1 {
            rows.truncate(1);
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.record_id).collect();
        deleted += ids.len() as i64;
        if !ids.is_empty() {
            d.backend.collection_delete_all(db, &collection, &ids).await.map_err(to_command_error)?;
        }
    }

    Ok(ok(doc! { "n" => Value::Int64(deleted) }))
}

pub async fn find_and_modify(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let filter = extract::opt_document(cmd, "query")?.cloned().unwrap_or_default();
    let sort_keys = parse_sort(cmd, "sort")?;
    let remove = extract::numeric_bool(cmd, "remove", false)?;
    let new_doc = extract::numeric_bool(cmd, "new", false)?;
    let upsert = extract::numeric_bool(cmd, "upsert", false)?;
    let projection = parse_projection(cmd, "fields")?;

    let mut candidates = d.query_documents_sorted(db, &collection, &filter, &sort_keys).await?;
    if candidates.is_empty() {
        if remove {
            return Ok(ok(doc! { "value" => Value::Null, "lastErrorObject" => doc! { "n" => Value::Int32(0) } }));
        }
        if upsert {
            let update_spec = cmd.get("update").and_then(Value::as_document).ok_or_else(|| bad("findAndModify requires 'update' or 'remove'"))?;
            let mut seed = seed_from_filter(&filter);
            query::apply_update(&mut seed, update_spec, true)?;
            if seed.id().is_none() {
                seed.insert("_id", ObjectId::new());
            }
            d.backend.collection_insert_all(db, &collection, std::slice::from_ref(&seed)).await.map_err(to_command_error)?;
            let returned = if new_doc { Some(seed.clone()) } else { None };
            let mut out = doc! {
                "value" => returned.map(Value::Document).unwrap_or(Value::Null),
                "lastErrorObject" => doc! { "n" => Value::Int32(1), "updatedExisting" => Value::Bool(false) },
            };
            if let Some(pspec) = &projection {
                if let Value::Document(v) = out.get("value").cloned().unwrap_or(Value::Null) {
                    out.insert("value", query::project(&v, pspec)?);
                }
            }
            return Ok(ok(out));
        }
        return Ok(ok(doc! { "value" => Value::Null }));
    }

    // Need the backing row to write changes back; re-fetch rows the same way
    // `update`/`delete` do rather than threading record_id through sort.
    let rows = d.query_rows(db, &collection, &filter).await?;
    let target_doc = candidates.remove(0);
    let row = rows
        .into_iter()
        .find(|r| compare_eq(r.document.id().unwrap_or(&Value::Null), target_doc.id().unwrap_or(&Value::Null)))
        .ok_or_else(|| CommandError::new(ErrorCode::InternalError, "matched document vanished during findAndModify"))?;

    let before = row.document.clone();
    if remove {
        d.backend.collection_delete_all(db, &collection, &[row.record_id]).await.map_err(to_command_error)?;
        let mut result = before;
        if let Some(pspec) = &projection {
            result = query::project(&result, pspec)?;
        }
        return Ok(ok(doc! {
            "value" => Value::Document(result),
            "lastErrorObject" => doc! { "n" => Value::Int32(1) },
        }));
    }

    let update_spec = cmd.get("update").and_then(Value::as_document).ok_or_else(|| bad("findAndModify requires 'update' or 'remove'"))?;
    let mut after = before.clone();
    query::apply_update(&mut after, update_spec, false)?;
    d.backend.collection_update_all(db, &collection, &[(row.record_id, after.clone())]).await.map_err(to_command_error)?;

    let mut result = if new_doc { after } else { before };
    if let Some(pspec) = &projection {
        result = query::project(&result, pspec)?;
    }
    Ok(ok(doc! {
        "value" => Value::Document(result),
        "lastErrorObject" => doc! { "n" => Value::Int32(1), "updatedExisting" => Value::Bool(true) },
    }))
}

pub async fn count(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let filter = extract::opt_document(cmd, "query")?.cloned().unwrap_or_default();
    let skip = extract::opt_non_negative_i64(cmd, "skip", 0)? as usize;
    let limit = extract::opt_non_negative_i64(cmd, "limit", 0)? as usize;

    let mut rows = d.query_rows(db, &collection, &filter).await?;
    if skip > 0 {
        rows = rows.into_iter().skip(skip).collect();
    }
    if limit > 0 {
        rows.truncate(limit);
    }
    Ok(ok(doc! { "n" => Value::Int64(rows.len() as i64) }))
}

pub async fn distinct(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let collection = extract::collection_name(cmd)?;
    let key = extract::opt_str(cmd, "key")?.ok_or_else(|| bad("'distinct' requires 'key'"))?.to_string();
    let filter = extract::opt_document(cmd, "query")?.cloned().unwrap_or_default();
    let path = crate::path::Path::parse(&key).map_err(CommandError::from)?;

    let rows = d.query_rows(db, &collection, &filter).await?;
    let mut values: Vec<Value> = Vec::new();
    for row in rows {
        if let Ok(v) = crate::path::get_from_document(&row.document, &path) {
            if !values.iter().any(|existing| compare_eq(existing, v)) {
                values.push(v.clone());
            }
        }
    }
    Ok(ok(doc! { "values" => Value::Array(values) }))
}

pub async fn aggregate(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let (_, target) = extract::command_name_and_target(cmd)?;
    let collection = target.as_str().map(String::from);
    let pipeline = extract::require_array(cmd, "pipeline")?;
    let stages: Vec<Document> = pipeline
        .iter()
        .map(|v| v.as_document().cloned().ok_or_else(|| bad("pipeline stages must be documents")))
        .collect::<CommandResult<_>>()?;

    let opens_with_coll_stats = stages.first().map(|s| s.contains_key("$collStats")).unwrap_or(false);

    // $collStats needs an async round trip to the backend, but the pipeline
    // runner only takes a synchronous closure; fetch eagerly so the closure
    // just hands back an already-built document.
    let stats_doc = if opens_with_coll_stats {
        let name = collection.as_deref().ok_or_else(|| bad("$collStats requires a collection"))?;
        let stats = d.backend.collection_stats(db, name).await.map_err(to_command_error)?;
        Some(doc! {
            "ns" => Value::String(namespace(db, name)),
            "count" => Value::Int64(stats.count),
            "size" => Value::Int64(stats.size_bytes),
            "avgObjSize" => Value::Double(stats.avg_obj_size),
            "storageSize" => Value::Int64(stats.storage_size_bytes),
        })
    } else {
        None
    };

    let docs = if opens_with_coll_stats {
        Vec::new()
    } else {
        match &collection {
            Some(name) => d.query_documents_sorted(db, name, &Document::new(), &[]).await?,
            None => Vec::new(),
        }
    };

    let stats_fn = move || -> CommandResult<Document> {
        stats_doc.ok_or_else(|| CommandError::new(ErrorCode::InternalError, "$collStats document was not prefetched"))
    };

    let result_docs = aggregation::execute(docs, &stages, stats_fn)?;
    let ns = namespace(db, &collection.unwrap_or_default());
    Ok(ok(super::cursor_document(ns, result_docs, 0)))
}

pub async fn explain(d: &Dispatcher, db: &str, cmd: &Document) -> CommandResult<Document> {
    let inner = cmd.get("explain").and_then(Value::as_document).ok_or_else(|| bad("'explain' requires a command document"))?;
    let collection = extract::collection_name(inner)?;
    let filter = extract::opt_document(inner, "filter").or_else(|_| extract::opt_document(inner, "query"))?.cloned().unwrap_or_default();
    let sort_keys = parse_sort(inner, "sort")?;

    let (pushdown_where, residual) = pushdown::build(&filter, &sort_keys, d.pushdown_enabled);
    let explain_doc = d.backend.collection_explain(db, &collection, &pushdown_where).await.map_err(to_command_error)?;
    let mut body = explain_doc;
    body.insert("residualFilter", Value::Document(residual));
    Ok(ok(body))
}
