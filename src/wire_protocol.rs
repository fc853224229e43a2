/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file wire_protocol.rs
 * @brief MongoDB wire protocol framing: OP_MSG (primary), legacy OP_QUERY
 * (accepted only for `hello`/`ismaster`), and OP_REPLY (its response).
 */

use crate::codec::wire as bson_codec;
use crate::document::Document;
use crate::error::{FauxDBError, Result};
use crate::value::Value;
use bytes::{Buf, BufMut, BytesMut};

pub const OP_REPLY: u32 = 1;
pub const OP_QUERY: u32 = 2004;
pub const OP_MSG: u32 = 2013;

const HEADER_LEN: usize = 16;
const OP_MSG_CHECKSUM_PRESENT: u32 = 1;

/// A fully-framed wire message: header fields plus the raw opcode-specific
/// body. `parse_body` interprets `body` according to `op_code`.
#[derive(Debug, Clone)]
pub struct MongoMessage {
    pub request_id: u32,
    pub response_to: u32,
    pub op_code: u32,
    pub body: Vec<u8>,
}

/// Reads one complete frame off a byte buffer that may contain a partial or
/// multiple messages. Returns `None` if the buffer doesn't yet hold a full
/// message (caller should read more bytes and retry).
pub fn try_read_message(buf: &mut BytesMut) -> Result<Option<MongoMessage>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let message_length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if message_length < HEADER_LEN {
        return Err(FauxDBError::WireProtocol(format!("invalid message length {}", message_length)));
    }
    if buf.len() < message_length {
        return Ok(None);
    }

    let mut frame = buf.split_to(message_length);
    frame.advance(4); // message_length already consumed
    let request_id = frame.get_u32_le();
    let response_to = frame.get_u32_le();
    let op_code = frame.get_u32_le();
    let body = frame.to_vec();

    Ok(Some(MongoMessage { request_id, response_to, op_code, body }))
}

/// The command document plus any document-sequence sections appended under
/// their section identifier, as a single field on the command document --
/// e.g. an `insert` command's kind-1 `documents` section lands as the
/// `documents` array field, exactly where a kind-0-only command would have
/// put it inline.
pub fn parse_op_msg(body: &[u8]) -> Result<Document> {
    if body.len() < 4 {
        return Err(FauxDBError::WireProtocol("OP_MSG body too short".to_string()));
    }
    let flag_bits = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let checksum_present = flag_bits & OP_MSG_CHECKSUM_PRESENT != 0;
    let mut sections = &body[4..];
    if checksum_present && sections.len() >= 4 {
        sections = &sections[..sections.len() - 4];
    }

    let mut command: Option<Document> = None;
    let mut sequences: Vec<(String, Vec<Value>)> = Vec::new();
    let mut cursor = sections;
    while !cursor.is_empty() {
        let kind = cursor[0];
        cursor = &cursor[1..];
        match kind {
            0x00 => {
                let (doc, rest) = read_one_bson_document(cursor)?;
                command = Some(doc);
                cursor = rest;
            }
            0x01 => {
                if cursor.len() < 4 {
                    return Err(FauxDBError::WireProtocol("truncated OP_MSG kind-1 section".to_string()));
                }
                let size = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]) as usize;
                if size < 4 || size > cursor.len() {
                    return Err(FauxDBError::WireProtocol("invalid OP_MSG kind-1 section size".to_string()));
                }
                let (section, rest) = cursor.split_at(size);
                cursor = rest;
                let mut body = &section[4..];
                let identifier_end = body.iter().position(|b| *b == 0).ok_or_else(|| {
                    FauxDBError::WireProtocol("OP_MSG kind-1 section missing identifier terminator".to_string())
                })?;
                let identifier = String::from_utf8_lossy(&body[..identifier_end]).to_string();
                body = &body[identifier_end + 1..];
                let mut docs = Vec::new();
                while !body.is_empty() {
                    let (doc, rest) = read_one_bson_document(body)?;
                    docs.push(Value::Document(doc));
                    body = rest;
                }
                sequences.push((identifier, docs));
            }
            other => return Err(FauxDBError::WireProtocol(format!("unsupported OP_MSG section kind {}", other))),
        }
    }

    let mut command = command.ok_or_else(|| FauxDBError::WireProtocol("OP_MSG carries no kind-0 section".to_string()))?;
    for (identifier, docs) in sequences {
        command.insert(identifier, Value::Array(docs));
    }
    Ok(command)
}

fn read_one_bson_document(bytes: &[u8]) -> Result<(Document, &[u8])> {
    if bytes.len() < 4 {
        return Err(FauxDBError::WireProtocol("truncated BSON document".to_string()));
    }
    let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len < 5 || len > bytes.len() {
        return Err(FauxDBError::WireProtocol("invalid BSON document length".to_string()));
    }
    let (doc_bytes, rest) = bytes.split_at(len);
    let bson_doc = bson::from_slice::<bson::Document>(doc_bytes)?;
    let doc = bson_codec::document_from_bson(&bson_doc).map_err(|e| FauxDBError::WireProtocol(e.to_string()))?;
    Ok((doc, rest))
}

/// Legacy `OP_QUERY` body, accepted only for `hello`/`ismaster` probes from
/// old drivers. `flags`/`numberToSkip`/`numberToReturn` are parsed but
/// unused -- the core never executes a real legacy query.
pub fn parse_op_query(body: &[u8]) -> Result<Document> {
    if body.len() < 12 {
        return Err(FauxDBError::WireProtocol("OP_QUERY body too short".to_string()));
    }
    let rest = &body[4..]; // flags
    let nul = rest.iter().position(|b| *b == 0).ok_or_else(|| FauxDBError::WireProtocol("OP_QUERY missing collection name terminator".to_string()))?;
    let after_name = &rest[nul + 1..];
    if after_name.len() < 8 {
        return Err(FauxDBError::WireProtocol("OP_QUERY body truncated before query document".to_string()));
    }
    let query_bytes = &after_name[8..]; // numberToSkip + numberToReturn
    let (doc, _) = read_one_bson_document(query_bytes)?;
    Ok(doc)
}

/// Serializes a command reply as `OP_MSG` (single kind-0 section, no
/// checksum flag).
pub fn encode_op_msg_reply(request_id: u32, response_to: u32, body: &Document) -> Result<Vec<u8>> {
    let bson_doc = bson_codec::document_to_bson(body);
    let bson_bytes = bson::to_vec(&bson_doc)?;

    let mut payload = BytesMut::new();
    payload.put_u32_le(0); // flagBits
    payload.put_u8(0x00); // section kind 0
    payload.extend_from_slice(&bson_bytes);

    Ok(frame(request_id, response_to, OP_MSG, &payload))
}

/// Serializes a legacy `OP_REPLY` to an `OP_QUERY` probe: one document,
/// `responseFlags = 0`, `cursorID = 0`, `startingFrom = 0`, `numberReturned = 1`.
pub fn encode_op_reply(request_id: u32, response_to: u32, body: &Document) -> Result<Vec<u8>> {
    let bson_doc = bson_codec::document_to_bson(body);
    let bson_bytes = bson::to_vec(&bson_doc)?;

    let mut payload = BytesMut::new();
    payload.put_u32_le(0); // responseFlags
    payload.put_i64_le(0); // cursorID
    payload.put_u32_le(0); // startingFrom
    payload.put_u32_le(1); // numberReturned
    payload.extend_from_slice(&bson_bytes);

    Ok(frame(request_id, response_to, OP_REPLY, &payload))
}

fn frame(request_id: u32, response_to: u32, op_code: u32, payload: &[u8]) -> Vec<u8> {
    let message_length = (HEADER_LEN + payload.len()) as u32;
    let mut out = BytesMut::with_capacity(message_length as usize);
    out.put_u32_le(message_length);
    out.put_u32_le(request_id);
    out.put_u32_le(response_to);
    out.put_u32_le(op_code);
    out.extend_from_slice(payload);
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn round_trips_a_kind0_only_op_msg() {
        let cmd = doc! { "ping" => Value::Int32(1) };
        let bson_doc = bson_codec::document_to_bson(&cmd);
        let bson_bytes = bson::to_vec(&bson_doc).unwrap();
        let mut payload = BytesMut::new();
        payload.put_u32_le(0);
        payload.put_u8(0x00);
        payload.extend_from_slice(&bson_bytes);

        let parsed = parse_op_msg(&payload).unwrap();
        assert_eq!(parsed.get("ping"), Some(&Value::Int32(1)));
    }

    #[test]
    fn kind1_section_lands_as_an_array_field() {
        let cmd = doc! { "insert" => Value::String("coll".into()) };
        let cmd_bson = bson::to_vec(&bson_codec::document_to_bson(&cmd)).unwrap();

        let doc1 = doc! { "_id" => Value::Int32(1) };
        let doc1_bson = bson::to_vec(&bson_codec::document_to_bson(&doc1)).unwrap();

        let mut section1 = BytesMut::new();
        let identifier = b"documents\0";
        let size = (4 + identifier.len() + doc1_bson.len()) as u32;
        section1.put_u32_le(size);
        section1.extend_from_slice(identifier);
        section1.extend_from_slice(&doc1_bson);

        let mut payload = BytesMut::new();
        payload.put_u32_le(0);
        payload.put_u8(0x00);
        payload.extend_from_slice(&cmd_bson);
        payload.put_u8(0x01);
        payload.extend_from_slice(&section1);

        let parsed = parse_op_msg(&payload).unwrap();
        let docs = parsed.get("documents").and_then(Value::as_array).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn try_read_message_waits_for_a_full_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(20);
        buf.put_u32_le(1);
        buf.put_u32_le(0);
        buf.put_u32_le(OP_MSG);
        assert!(try_read_message(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[1, 2, 3, 4]);
        let msg = try_read_message(&mut buf).unwrap().unwrap();
        assert_eq!(msg.op_code, OP_MSG);
        assert_eq!(msg.body, vec![1, 2, 3, 4]);
    }
}
