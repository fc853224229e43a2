//! End-to-end dispatcher scenarios, backed by `MockBackend` instead of a
//! real Postgres connection: insert/find/getMore pagination, sort and
//! projection, conflicting update operators, numeric type fidelity, and
//! `$expr`-filtered aggregation with `$count`.

mod common;

use common::MockBackend;
use fauxdb::document::Document;
use fauxdb::value::Value;
use fauxdb::{doc, CursorRegistry, Dispatcher};
use std::sync::Arc;
use std::time::Duration;

fn dispatcher() -> Dispatcher {
    let backend = Arc::new(MockBackend::new());
    let cursors = Arc::new(CursorRegistry::new(Duration::from_secs(600)));
    Dispatcher::new(backend, cursors, "testdb".to_string(), true)
}

fn docs(n: i32) -> Vec<Value> {
    (0..n).map(|i| Value::Document(doc! { "_id" => Value::Int32(i), "n" => Value::Int32(i) })).collect()
}

#[tokio::test]
async fn find_paginates_across_get_more() {
    let d = dispatcher();
    let insert_cmd = doc! {
        "insert" => Value::String("widgets".into()),
        "documents" => Value::Array(docs(5)),
    };
    let reply = d.dispatch(&insert_cmd, 1).await;
    assert_eq!(reply.get("n"), Some(&Value::Int32(5)));

    let find_cmd = doc! {
        "find" => Value::String("widgets".into()),
        "filter" => Value::Document(Document::new()),
        "batchSize" => Value::Int32(2),
    };
    let reply = d.dispatch(&find_cmd, 1).await;
    let cursor = reply.get("cursor").and_then(Value::as_document).unwrap();
    let first_batch = cursor.get("firstBatch").and_then(Value::as_array).unwrap();
    assert_eq!(first_batch.len(), 2);
    let cursor_id = cursor.get("id").and_then(Value::as_whole_i64).unwrap();
    assert_ne!(cursor_id, 0, "cursor should stay open past the first batch");

    let mut seen = first_batch.len();
    let mut id = cursor_id;
    while id != 0 {
        let get_more = doc! {
            "getMore" => Value::Int64(id),
            "collection" => Value::String("widgets".into()),
            "batchSize" => Value::Int32(2),
        };
        let reply = d.dispatch(&get_more, 1).await;
        let cursor = reply.get("cursor").and_then(Value::as_document).unwrap();
        let batch = cursor.get("nextBatch").and_then(Value::as_array).unwrap();
        seen += batch.len();
        id = cursor.get("id").and_then(Value::as_whole_i64).unwrap();
    }
    assert_eq!(seen, 5);
}

#[tokio::test]
async fn find_sorts_filters_and_projects() {
    let d = dispatcher();
    let documents = vec![
        Value::Document(doc! { "_id" => Value::Int32(1), "score" => Value::Int32(30), "name" => Value::String("a".into()) }),
        Value::Document(doc! { "_id" => Value::Int32(2), "score" => Value::Int32(10), "name" => Value::String("b".into()) }),
        Value::Document(doc! { "_id" => Value::Int32(3), "score" => Value::Int32(20), "name" => Value::String("c".into()) }),
    ];
    d.dispatch(&doc! { "insert" => Value::String("players".into()), "documents" => Value::Array(documents) }, 1).await;

    let find_cmd = doc! {
        "find" => Value::String("players".into()),
        "filter" => Value::Document(doc! { "score" => Value::Document(doc! { "$gte" => Value::Int32(20) }) }),
        "sort" => Value::Document(doc! { "score" => Value::Int32(1) }),
        "projection" => Value::Document(doc! { "name" => Value::Int32(1) }),
    };
    let reply = d.dispatch(&find_cmd, 1).await;
    let batch = reply.get("cursor").and_then(Value::as_document).unwrap().get("firstBatch").and_then(Value::as_array).unwrap();
    assert_eq!(batch.len(), 2);
    let first = batch[0].as_document().unwrap();
    assert_eq!(first.get("name"), Some(&Value::String("c".into())));
    assert!(first.get("score").is_none(), "inclusion projection must drop unlisted fields");
}

#[tokio::test]
async fn conflicting_update_operators_are_rejected() {
    let d = dispatcher();
    d.dispatch(
        &doc! { "insert" => Value::String("accounts".into()), "documents" => Value::Array(vec![Value::Document(doc! { "_id" => Value::Int32(1), "balance" => Value::Int32(5) })]) },
        1,
    )
    .await;

    let update_cmd = doc! {
        "update" => Value::String("accounts".into()),
        "updates" => Value::Array(vec![Value::Document(doc! {
            "q" => Value::Document(doc! { "_id" => Value::Int32(1) }),
            "u" => Value::Document(doc! {
                "$set" => Value::Document(doc! { "balance" => Value::Int32(10) }),
                "$inc" => Value::Document(doc! { "balance" => Value::Int32(1) }),
            }),
        })]),
    };
    let reply = d.dispatch(&update_cmd, 1).await;
    assert_eq!(reply.get("ok"), Some(&Value::Double(0.0)));
    assert_eq!(reply.get("code"), Some(&Value::Int32(40)));
}

#[tokio::test]
async fn duplicate_id_insert_fails_with_write_error() {
    let d = dispatcher();
    let first = doc! { "insert" => Value::String("dupes".into()), "documents" => Value::Array(vec![Value::Document(doc! { "_id" => Value::Int32(1) })]) };
    d.dispatch(&first, 1).await;

    let second = doc! {
        "insert" => Value::String("dupes".into()),
        "documents" => Value::Array(vec![Value::Document(doc! { "_id" => Value::Int32(1) })]),
        "ordered" => Value::Bool(false),
    };
    let reply = d.dispatch(&second, 1).await;
    assert_eq!(reply.get("n"), Some(&Value::Int32(0)));
    let write_errors = reply.get("writeErrors").and_then(Value::as_array).unwrap();
    assert_eq!(write_errors.len(), 1);
    let err = write_errors[0].as_document().unwrap();
    assert_eq!(err.get("code"), Some(&Value::Int32(11000)));
}

#[tokio::test]
async fn duplicate_id_within_same_insert_batch_fails_second_document() {
    let d = dispatcher();
    let insert_cmd = doc! {
        "insert" => Value::String("dupes".into()),
        "documents" => Value::Array(vec![
            Value::Document(doc! { "_id" => Value::Int32(1) }),
            Value::Document(doc! { "_id" => Value::Int32(1) }),
        ]),
        "ordered" => Value::Bool(false),
    };
    let reply = d.dispatch(&insert_cmd, 1).await;
    assert_eq!(reply.get("n"), Some(&Value::Int32(1)), "only the first of the two colliding documents should insert");
    let write_errors = reply.get("writeErrors").and_then(Value::as_array).unwrap();
    assert_eq!(write_errors.len(), 1);
    let err = write_errors[0].as_document().unwrap();
    assert_eq!(err.get("index"), Some(&Value::Int32(1)));
    assert_eq!(err.get("code"), Some(&Value::Int32(11000)));
}

#[tokio::test]
async fn number_long_round_trips_distinct_from_double_and_int32() {
    let d = dispatcher();
    let document = doc! {
        "_id" => Value::Int32(1),
        "small" => Value::Int32(7),
        "big" => Value::Int64(9_000_000_000),
        "pi" => Value::Double(3.5),
    };
    d.dispatch(&doc! { "insert" => Value::String("numbers".into()), "documents" => Value::Array(vec![Value::Document(document)]) }, 1).await;

    let find_cmd = doc! { "find" => Value::String("numbers".into()), "filter" => Value::Document(Document::new()) };
    let reply = d.dispatch(&find_cmd, 1).await;
    let batch = reply.get("cursor").and_then(Value::as_document).unwrap().get("firstBatch").and_then(Value::as_array).unwrap();
    let found = batch[0].as_document().unwrap();
    assert_eq!(found.get("small"), Some(&Value::Int32(7)));
    assert_eq!(found.get("big"), Some(&Value::Int64(9_000_000_000)));
    assert_eq!(found.get("pi"), Some(&Value::Double(3.5)));
}

#[tokio::test]
async fn aggregate_matches_then_counts() {
    let d = dispatcher();
    let documents = vec![
        Value::Document(doc! { "_id" => Value::Int32(1), "qty" => Value::Int32(3) }),
        Value::Document(doc! { "_id" => Value::Int32(2), "qty" => Value::Int32(8) }),
        Value::Document(doc! { "_id" => Value::Int32(3), "qty" => Value::Int32(12) }),
    ];
    d.dispatch(&doc! { "insert" => Value::String("orders".into()), "documents" => Value::Array(documents) }, 1).await;

    let pipeline = vec![
        Value::Document(doc! {
            "$match" => Value::Document(doc! {
                "$expr" => Value::Document(doc! {
                    "$gt" => Value::Array(vec![Value::String("$qty".into()), Value::Int32(5)]),
                }),
            }),
        }),
        Value::Document(doc! { "$count" => Value::String("matched".into()) }),
    ];
    let aggregate_cmd = doc! { "aggregate" => Value::String("orders".into()), "pipeline" => Value::Array(pipeline) };
    let reply = d.dispatch(&aggregate_cmd, 1).await;
    let batch = reply.get("cursor").and_then(Value::as_document).unwrap().get("firstBatch").and_then(Value::as_array).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].as_document().unwrap().get("matched"), Some(&Value::Int64(2)));
}
