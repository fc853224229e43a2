//! Full round trip through both halves of the codec: a driver's BSON goes
//! to our `Document` model (`codec::wire`), through the storage sidecar
//! format (`codec::encode`/`decode`), and back out to BSON, exactly the
//! path a real insert-then-find takes.

use fauxdb::codec::{self, wire};
use fauxdb::doc;
use fauxdb::document::Document;
use fauxdb::value::{ObjectId, Value};

fn round_trip_through_storage(original: &bson::Document) -> bson::Document {
    let as_document = wire::document_from_bson(original).expect("bson -> Document");
    let json = codec::encode(&as_document).expect("Document -> storage json");
    let back: Document = codec::decode(&json).expect("storage json -> Document");
    wire::document_to_bson(&back)
}

#[test]
fn object_id_survives_the_full_pipeline() {
    let oid = bson::oid::ObjectId::new();
    let original = bson::doc! { "_id": oid, "name": "widget" };
    let round_tripped = round_trip_through_storage(&original);
    assert_eq!(round_tripped.get_object_id("_id").unwrap(), &oid);
}

#[test]
fn int32_int64_and_double_stay_distinct_end_to_end() {
    let original = bson::doc! { "a": 1i32, "b": 1i64, "c": 1.0f64 };
    let round_tripped = round_trip_through_storage(&original);
    assert!(matches!(round_tripped.get("a").unwrap(), bson::Bson::Int32(1)));
    assert!(matches!(round_tripped.get("b").unwrap(), bson::Bson::Int64(1)));
    assert!(matches!(round_tripped.get("c").unwrap(), bson::Bson::Double(x) if *x == 1.0));
}

#[test]
fn regex_and_timestamp_survive_the_full_pipeline() {
    let original = bson::doc! {
        "pattern": bson::Bson::RegularExpression(bson::Regex { pattern: "^a.*z$".into(), options: "i".into() }),
        "ts": bson::Bson::Timestamp(bson::Timestamp { time: 100, increment: 7 }),
    };
    let round_tripped = round_trip_through_storage(&original);
    match round_tripped.get("pattern").unwrap() {
        bson::Bson::RegularExpression(r) => {
            assert_eq!(r.pattern, "^a.*z$");
            assert_eq!(r.options, "i");
        }
        other => panic!("expected regex, got {:?}", other),
    }
    match round_tripped.get("ts").unwrap() {
        bson::Bson::Timestamp(t) => {
            assert_eq!(t.time, 100);
            assert_eq!(t.increment, 7);
        }
        other => panic!("expected timestamp, got {:?}", other),
    }
}

#[test]
fn object_id_hex_round_trips() {
    let id = ObjectId::new();
    let hex = id.to_hex();
    let parsed = ObjectId::from_hex(&hex).expect("valid hex");
    assert_eq!(id, parsed);
    assert_eq!(hex.len(), 24);
}

#[test]
fn decode_rejects_a_plain_json_value_with_no_sidecar() {
    let bare = serde_json::json!({ "a": 1 });
    assert!(codec::decode(&bare).is_err());
}

#[test]
fn wire_document_preserves_field_order_and_id_first() {
    let d = doc! { "b" => Value::Int32(2), "_id" => Value::Int32(1), "a" => Value::Int32(3) };
    let keys: Vec<&str> = d.keys().map(String::as_str).collect();
    assert_eq!(keys[0], "_id", "_id must be reordered first");

    let bson_doc = wire::document_to_bson(&d);
    let back = wire::document_from_bson(&bson_doc).unwrap();
    assert_eq!(back, d);
}
