/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file backend/mod.rs
 * @brief Storage backend abstraction: databases, collections, indexes, rows.
 */

pub mod postgres;

use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One row as the backend sees it: a monotonically increasing `record_id`
/// (survives updates; used by tailable cursors) and the decoded document.
#[derive(Debug, Clone)]
pub struct Row {
    pub record_id: i64,
    pub document: Document,
}

#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub name: String,
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
}

#[derive(Debug, Clone)]
pub struct CollectionMeta {
    pub database: String,
    pub name: String,
    pub storage_table: String,
    pub indexes: Vec<IndexMeta>,
    pub capped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    pub count: i64,
    pub size_bytes: i64,
    pub avg_obj_size: f64,
    pub storage_size_bytes: i64,
}

/// A parameterized SQL WHERE fragment plus its positional arguments, as
/// produced by the pushdown translator and consumed by `collection_query`.
#[derive(Debug, Clone, Default)]
pub struct PushdownWhere {
    pub sql: Option<String>,
    pub args: Vec<crate::pushdown::SqlParam>,
    pub order_by: Option<String>,
}

pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// The interface the query/mutation execution layer consumes; implemented by
/// each supported relational store. All methods operate within the caller's
/// transaction/connection lease where one is required (writes; DDL).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn database_get_or_create(&self, name: &str) -> Result<()>;
    async fn database_list(&self) -> Result<Vec<String>>;
    async fn database_drop(&self, name: &str) -> Result<()>;

    async fn collection_get(&self, db: &str, name: &str) -> Result<Option<CollectionMeta>>;
    async fn collection_create(&self, db: &str, name: &str, capped: bool) -> Result<CollectionMeta>;
    async fn collection_drop(&self, db: &str, name: &str) -> Result<()>;
    async fn collection_list(&self, db: &str) -> Result<Vec<CollectionMeta>>;
    async fn collection_stats(&self, db: &str, name: &str) -> Result<CollectionStats>;

    async fn collection_insert_all(&self, db: &str, name: &str, docs: &[Document]) -> Result<Vec<i64>>;
    async fn collection_update_all(&self, db: &str, name: &str, rows: &[(i64, Document)]) -> Result<()>;
    async fn collection_delete_all(&self, db: &str, name: &str, ids: &[i64]) -> Result<()>;

    async fn collection_query<'a>(&'a self, db: &str, name: &str, pushdown: &PushdownWhere) -> Result<RowStream<'a>>;
    async fn collection_explain(&self, db: &str, name: &str, pushdown: &PushdownWhere) -> Result<Document>;

    async fn list_indexes(&self, db: &str, name: &str) -> Result<Vec<IndexMeta>>;
    async fn create_indexes(&self, db: &str, name: &str, indexes: &[IndexMeta]) -> Result<()>;
    async fn drop_index(&self, db: &str, name: &str, index_name: &str) -> Result<()>;
}

/// Derives the backend's storage table name for a logical collection name:
/// long or special names are hashed so the physical identifier stays short
/// and syntactically safe, while staying stable across calls.
pub fn storage_table_name(collection: &str) -> String {
    const MAX_LEN: usize = 63;
    let sanitized: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if sanitized.len() <= MAX_LEN && sanitized == collection {
        return sanitized;
    }
    let hash = fnv32a(collection.as_bytes());
    let prefix_len = MAX_LEN.saturating_sub(9);
    let prefix: String = sanitized.chars().take(prefix_len).collect();
    format!("{}_{:08x}", prefix, hash)
}

fn fnv32a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

pub const RESERVED_PREFIX: &str = "_ferretdb_";

pub fn is_reserved_collection_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_names_pass_through() {
        assert_eq!(storage_table_name("users"), "users");
    }

    #[test]
    fn long_names_are_hashed_consistently() {
        let long_name = "x".repeat(100);
        let first = storage_table_name(&long_name);
        let second = storage_table_name(&long_name);
        assert_eq!(first, second);
        assert!(first.len() <= 63);
    }

    #[test]
    fn reserved_prefix_is_detected() {
        assert!(is_reserved_collection_name("_ferretdb_settings"));
        assert!(!is_reserved_collection_name("settings"));
    }
}
