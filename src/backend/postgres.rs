/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file backend/postgres.rs
 * @brief PostgreSQL/JSONB-backed `Backend` implementation.
 *
 * One Postgres schema per logical database, one table per collection with a
 * fixed `_jsonb` payload column, and a per-schema `_ferretdb_collections`
 * directory table mapping logical collection name to physical storage table.
 */

use crate::backend::{
    is_reserved_collection_name, storage_table_name, Backend, CollectionMeta, CollectionStats,
    IndexMeta, PushdownWhere, Row, RowStream, RESERVED_PREFIX,
};
use crate::codec;
use crate::document::Document;
use crate::error::{CommandError, ErrorCode, FauxDBError, Result};
use crate::pushdown::SqlParam;
use async_trait::async_trait;
use deadpool_postgres::{Manager, Pool};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value as Json};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

const DIRECTORY_TABLE: &str = "_ferretdb_collections";

/// A deadpool-managed `tokio-postgres` connection pool backing the storage
/// layer. Every document travels through [`codec::encode`]/[`codec::decode`]
/// on the way in and out, so the `_jsonb` column always carries the `$s`
/// type sidecar.
pub struct PostgresBackend {
    pool: Pool,
}

impl PostgresBackend {
    pub async fn connect(database_url: &str, max_connections: usize) -> Result<Self> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e| FauxDBError::Database(format!("invalid PostgreSQL URI: {}", e)))?;

        let manager = Manager::new(pg_config, NoTls);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| FauxDBError::ConnectionPool(format!("failed to build connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| FauxDBError::ConnectionPool(format!("failed to get database connection: {}", e)))
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualified(&self, db: &str, table: &str) -> String {
        format!("{}.{}", Self::quote_ident(db), Self::quote_ident(table))
    }

    async fn ensure_directory(&self, db: &str) -> Result<()> {
        let client = self.client().await?;
        let schema = Self::quote_ident(db);
        let dir = self.qualified(db, DIRECTORY_TABLE);
        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {schema};
                 CREATE TABLE IF NOT EXISTS {dir} (
                     name TEXT PRIMARY KEY,
                     storage_table TEXT NOT NULL,
                     capped BOOLEAN NOT NULL DEFAULT false,
                     indexes JSONB NOT NULL DEFAULT '[]'
                 );"
            ))
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn directory_row(&self, db: &str, name: &str) -> Result<Option<(String, bool, Json)>> {
        self.ensure_directory(db).await?;
        let client = self.client().await?;
        let dir = self.qualified(db, DIRECTORY_TABLE);
        let rows = client
            .query(
                &format!("SELECT storage_table, capped, indexes FROM {} WHERE name = $1", dir),
                &[&name],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(rows.into_iter().next().map(|r| {
            let storage_table: String = r.get(0);
            let capped: bool = r.get(1);
            let indexes: Json = r.get(2);
            (storage_table, capped, indexes)
        }))
    }

    fn meta_from_row(database: &str, name: &str, storage_table: String, capped: bool, indexes_json: &Json) -> CollectionMeta {
        CollectionMeta {
            database: database.to_string(),
            name: name.to_string(),
            storage_table,
            indexes: indexes_from_json(indexes_json),
            capped,
        }
    }
}

fn index_meta_to_json(idx: &IndexMeta) -> Json {
    json!({
        "name": idx.name,
        "keys": idx.keys.iter().map(|(k, d)| json!([k, d])).collect::<Vec<_>>(),
        "unique": idx.unique,
    })
}

fn indexes_from_json(j: &Json) -> Vec<IndexMeta> {
    j.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    let name = v.get("name")?.as_str()?.to_string();
                    let unique = v.get("unique")?.as_bool().unwrap_or(false);
                    let keys = v
                        .get("keys")?
                        .as_array()?
                        .iter()
                        .filter_map(|pair| {
                            let pair = pair.as_array()?;
                            let field = pair.get(0)?.as_str()?.to_string();
                            let dir = pair.get(1)?.as_i64()? as i32;
                            Some((field, dir))
                        })
                        .collect();
                    Some(IndexMeta { name, keys, unique })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Converts a parameter list produced by the pushdown translator into boxed
/// `ToSql` values the driver can bind positionally.
fn bind_params(args: &[SqlParam]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    args.iter()
        .map(|p| -> Box<dyn ToSql + Sync + Send> {
            match p {
                SqlParam::Text(s) => Box::new(s.clone()),
                SqlParam::I32(i) => Box::new(*i),
                SqlParam::I64(i) => Box::new(*i),
                SqlParam::F64(f) => Box::new(*f),
                SqlParam::Bool(b) => Box::new(*b),
            }
        })
        .collect()
}

fn as_refs(owned: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    owned.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn database_get_or_create(&self, name: &str) -> Result<()> {
        self.ensure_directory(name).await
    }

    async fn database_list(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
                 AND schema_name !~ '^pg_'",
                &[],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    async fn database_drop(&self, name: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", Self::quote_ident(name)))
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn collection_get(&self, db: &str, name: &str) -> Result<Option<CollectionMeta>> {
        Ok(self
            .directory_row(db, name)
            .await?
            .map(|(table, capped, indexes)| Self::meta_from_row(db, name, table, capped, &indexes)))
    }

    async fn collection_create(&self, db: &str, name: &str, capped: bool) -> Result<CollectionMeta> {
        if is_reserved_collection_name(name) {
            return Err(FauxDBError::Database(format!("'{}' uses the reserved prefix '{}'", name, RESERVED_PREFIX)));
        }
        self.ensure_directory(db).await?;
        if let Some((table, existing_capped, indexes)) = self.directory_row(db, name).await? {
            return Ok(Self::meta_from_row(db, name, table, existing_capped, &indexes));
        }

        let table = storage_table_name(name);
        let qualified = self.qualified(db, &table);
        let client = self.client().await?;
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {qualified} (
                     record_id BIGSERIAL PRIMARY KEY,
                     _jsonb JSONB NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS {idx} ON {qualified} USING GIN (_jsonb);
                 CREATE UNIQUE INDEX IF NOT EXISTS {id_idx} ON {qualified} ((_jsonb ->> '_id'));",
                qualified = qualified,
                idx = Self::quote_ident(&format!("idx_{}_gin", table)),
                id_idx = Self::quote_ident(&format!("idx_{}_id", table)),
            ))
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;

        let dir = self.qualified(db, DIRECTORY_TABLE);
        client
            .execute(
                &format!(
                    "INSERT INTO {} (name, storage_table, capped, indexes) VALUES ($1, $2, $3, '[]') \
                     ON CONFLICT (name) DO NOTHING",
                    dir
                ),
                &[&name, &table, &capped],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;

        Ok(CollectionMeta { database: db.to_string(), name: name.to_string(), storage_table: table, indexes: Vec::new(), capped })
    }

    async fn collection_drop(&self, db: &str, name: &str) -> Result<()> {
        let Some((table, _, _)) = self.directory_row(db, name).await? else { return Ok(()) };
        let client = self.client().await?;
        let qualified = self.qualified(db, &table);
        client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", qualified))
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        let dir = self.qualified(db, DIRECTORY_TABLE);
        client
            .execute(&format!("DELETE FROM {} WHERE name = $1", dir), &[&name])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn collection_list(&self, db: &str) -> Result<Vec<CollectionMeta>> {
        self.ensure_directory(db).await?;
        let client = self.client().await?;
        let dir = self.qualified(db, DIRECTORY_TABLE);
        let rows = client
            .query(&format!("SELECT name, storage_table, capped, indexes FROM {}", dir), &[])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let name: String = r.get(0);
                let table: String = r.get(1);
                let capped: bool = r.get(2);
                let indexes: Json = r.get(3);
                Self::meta_from_row(db, &name, table, capped, &indexes)
            })
            .collect())
    }

    async fn collection_stats(&self, db: &str, name: &str) -> Result<CollectionStats> {
        let Some((table, _, _)) = self.directory_row(db, name).await? else {
            return Ok(CollectionStats::default());
        };
        let qualified = self.qualified(db, &table);
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT count(*), pg_total_relation_size('{q}'::regclass), \
                     coalesce(pg_relation_size('{q}'::regclass), 0) \
                     FROM {q}",
                    q = qualified
                ),
                &[],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        let count: i64 = row.get(0);
        let total_size: i64 = row.get(1);
        let storage_size: i64 = row.get(2);
        let avg_obj_size = if count > 0 { total_size as f64 / count as f64 } else { 0.0 };
        Ok(CollectionStats { count, size_bytes: total_size, avg_obj_size, storage_size_bytes: storage_size })
    }

    async fn collection_insert_all(&self, db: &str, name: &str, docs: &[Document]) -> Result<Vec<i64>> {
        let meta = self.collection_create(db, name, false).await?;
        let qualified = self.qualified(db, &meta.storage_table);
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(|e| FauxDBError::Database(e.to_string()))?;
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let encoded = codec::encode(doc)?;
            let row = tx
                .query_one(&format!("INSERT INTO {} (_jsonb) VALUES ($1) RETURNING record_id", qualified), &[&encoded])
                .await
                .map_err(|e| {
                    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                        FauxDBError::Command(CommandError::new(
                            ErrorCode::DuplicateKey,
                            format!("duplicate key error for _id: {:?}", doc.id()),
                        ))
                    } else {
                        FauxDBError::Database(e.to_string())
                    }
                })?;
            ids.push(row.get(0));
        }
        tx.commit().await.map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(ids)
    }

    async fn collection_update_all(&self, db: &str, name: &str, rows: &[(i64, Document)]) -> Result<()> {
        let Some((table, _, _)) = self.directory_row(db, name).await? else {
            return Err(FauxDBError::Database(format!("collection '{}' does not exist", name)));
        };
        let qualified = self.qualified(db, &table);
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(|e| FauxDBError::Database(e.to_string()))?;
        for (record_id, doc) in rows {
            let encoded = codec::encode(doc)?;
            tx.execute(
                &format!("UPDATE {} SET _jsonb = $1 WHERE record_id = $2", qualified),
                &[&encoded, record_id],
            )
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn collection_delete_all(&self, db: &str, name: &str, ids: &[i64]) -> Result<()> {
        let Some((table, _, _)) = self.directory_row(db, name).await? else { return Ok(()) };
        let qualified = self.qualified(db, &table);
        let client = self.client().await?;
        let owned: Vec<i64> = ids.to_vec();
        client
            .execute(&format!("DELETE FROM {} WHERE record_id = ANY($1)", qualified), &[&owned])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn collection_query<'a>(&'a self, db: &str, name: &str, pushdown: &PushdownWhere) -> Result<RowStream<'a>> {
        let Some((table, _, _)) = self.directory_row(db, name).await? else {
            return Ok(stream::iter(Vec::<Result<Row>>::new()).boxed());
        };
        let qualified = self.qualified(db, &table);
        let mut sql = format!("SELECT record_id, _jsonb FROM {}", qualified);
        if let Some(w) = &pushdown.sql {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        if let Some(o) = &pushdown.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(o);
        }

        let client = self.client().await?;
        let owned_params = bind_params(&pushdown.args);
        let refs = as_refs(&owned_params);
        let pg_rows = client.query(&sql, &refs).await.map_err(|e| FauxDBError::Database(e.to_string()))?;

        let rows: Vec<Result<Row>> = pg_rows
            .into_iter()
            .map(|pg_row| {
                let record_id: i64 = pg_row.get(0);
                let payload: Json = pg_row.get(1);
                let document = codec::decode(&payload)?;
                Ok(Row { record_id, document })
            })
            .collect();
        Ok(stream::iter(rows).boxed())
    }

    async fn collection_explain(&self, db: &str, name: &str, pushdown: &PushdownWhere) -> Result<Document> {
        let Some((table, _, _)) = self.directory_row(db, name).await? else {
            return Ok(crate::doc! { "pushdown" => crate::value::Value::Bool(false) });
        };
        let qualified = self.qualified(db, &table);
        let mut sql = format!("SELECT record_id, _jsonb FROM {}", qualified);
        if let Some(w) = &pushdown.sql {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        if let Some(o) = &pushdown.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(o);
        }
        let explain_sql = format!("EXPLAIN (FORMAT JSON) {}", sql);

        let client = self.client().await?;
        let owned_params = bind_params(&pushdown.args);
        let refs = as_refs(&owned_params);
        let row = client
            .query_one(&explain_sql, &refs)
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        let plan: Json = row.get(0);

        Ok(crate::doc! {
            "pushdown" => crate::value::Value::Bool(pushdown.sql.is_some() || pushdown.order_by.is_some()),
            "query" => crate::value::Value::String(sql),
            "queryPlanner" => crate::value::Value::String(plan.to_string()),
        })
    }

    async fn list_indexes(&self, db: &str, name: &str) -> Result<Vec<IndexMeta>> {
        Ok(self.directory_row(db, name).await?.map(|(_, _, j)| indexes_from_json(&j)).unwrap_or_default())
    }

    async fn create_indexes(&self, db: &str, name: &str, indexes: &[IndexMeta]) -> Result<()> {
        let meta = self.collection_create(db, name, false).await?;
        let mut existing = self.list_indexes(db, name).await?;
        let qualified = self.qualified(db, &meta.storage_table);
        let client = self.client().await?;
        for idx in indexes {
            if existing.iter().any(|e| e.name == idx.name) {
                continue;
            }
            // Only the first key of a compound index is pushed into a real
            // Postgres expression index; the rest stay logical (enforced at
            // the query-evaluation layer) since arbitrary multi-key jsonb
            // path expressions don't compose into one btree index here.
            if let Some((field, _dir)) = idx.keys.first() {
                let col_expr = format!("(_jsonb ->> {})", quote_literal(field));
                let unique_kw = if idx.unique { "UNIQUE " } else { "" };
                client
                    .batch_execute(&format!(
                        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                        unique_kw,
                        Self::quote_ident(&format!("idx_{}_{}", meta.storage_table, idx.name)),
                        qualified,
                        col_expr
                    ))
                    .await
                    .map_err(|e| FauxDBError::Database(e.to_string()))?;
            }
            existing.push(idx.clone());
        }
        let dir = self.qualified(db, DIRECTORY_TABLE);
        let indexes_json = Json::Array(existing.iter().map(index_meta_to_json).collect());
        client
            .execute(&format!("UPDATE {} SET indexes = $1 WHERE name = $2", dir), &[&indexes_json, &name])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }

    async fn drop_index(&self, db: &str, name: &str, index_name: &str) -> Result<()> {
        let Some((table, _, indexes_json)) = self.directory_row(db, name).await? else { return Ok(()) };
        let client = self.client().await?;
        client
            .batch_execute(&format!(
                "DROP INDEX IF EXISTS {}",
                Self::quote_ident(&format!("idx_{}_{}", table, index_name))
            ))
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        let mut remaining = indexes_from_json(&indexes_json);
        remaining.retain(|i| i.name != index_name);
        let dir = self.qualified(db, DIRECTORY_TABLE);
        let indexes_json = Json::Array(remaining.iter().map(index_meta_to_json).collect());
        client
            .execute(&format!("UPDATE {} SET indexes = $1 WHERE name = $2", dir), &[&indexes_json, &name])
            .await
            .map_err(|e| FauxDBError::Database(e.to_string()))?;
        Ok(())
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_meta_round_trips_through_json() {
        let idx = IndexMeta { name: "by_a".to_string(), keys: vec![("a".to_string(), 1)], unique: true };
        let json = Json::Array(vec![index_meta_to_json(&idx)]);
        let back = indexes_from_json(&json);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].name, "by_a");
        assert!(back[0].unique);
    }
}
