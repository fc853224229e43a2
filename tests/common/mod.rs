use async_trait::async_trait;
use fauxdb::backend::{Backend, CollectionMeta, CollectionStats, IndexMeta, PushdownWhere, Row, RowStream};
use fauxdb::document::Document;
use fauxdb::doc;
use fauxdb::value::Value;
use fauxdb::Result;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// An in-memory `Backend` standing in for Postgres in tests: no SQL, no
/// pushdown translation of its own -- `collection_query` always returns
/// every row for the collection (a trivially safe superset) and leaves
/// exact filtering to the dispatcher's residual evaluator.
pub struct MockBackend {
    next_record_id: AtomicI64,
    collections: Mutex<HashMap<(String, String), Vec<(i64, Document)>>>,
    indexes: Mutex<HashMap<(String, String), Vec<IndexMeta>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_record_id: AtomicI64::new(1),
            collections: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    fn key(db: &str, name: &str) -> (String, String) {
        (db.to_string(), name.to_string())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn database_get_or_create(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn database_list(&self) -> Result<Vec<String>> {
        let cols = self.collections.lock();
        let mut names: Vec<String> = cols.keys().map(|(db, _)| db.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn database_drop(&self, name: &str) -> Result<()> {
        self.collections.lock().retain(|(db, _), _| db != name);
        Ok(())
    }

    async fn collection_get(&self, db: &str, name: &str) -> Result<Option<CollectionMeta>> {
        let cols = self.collections.lock();
        Ok(cols.get(&Self::key(db, name)).map(|_| CollectionMeta {
            database: db.to_string(),
            name: name.to_string(),
            storage_table: name.to_string(),
            indexes: Vec::new(),
            capped: false,
        }))
    }

    async fn collection_create(&self, db: &str, name: &str, _capped: bool) -> Result<CollectionMeta> {
        self.collections.lock().entry(Self::key(db, name)).or_insert_with(Vec::new);
        Ok(CollectionMeta { database: db.to_string(), name: name.to_string(), storage_table: name.to_string(), indexes: Vec::new(), capped: false })
    }

    async fn collection_drop(&self, db: &str, name: &str) -> Result<()> {
        self.collections.lock().remove(&Self::key(db, name));
        Ok(())
    }

    async fn collection_list(&self, db: &str) -> Result<Vec<CollectionMeta>> {
        let cols = self.collections.lock();
        Ok(cols
            .keys()
            .filter(|(d, _)| d == db)
            .map(|(_, name)| CollectionMeta { database: db.to_string(), name: name.clone(), storage_table: name.clone(), indexes: Vec::new(), capped: false })
            .collect())
    }

    async fn collection_stats(&self, db: &str, name: &str) -> Result<CollectionStats> {
        let cols = self.collections.lock();
        let count = cols.get(&Self::key(db, name)).map(|rows| rows.len() as i64).unwrap_or(0);
        Ok(CollectionStats { count, size_bytes: 0, avg_obj_size: 0.0, storage_size_bytes: 0 })
    }

    async fn collection_insert_all(&self, db: &str, name: &str, docs: &[Document]) -> Result<Vec<i64>> {
        let mut cols = self.collections.lock();
        let rows = cols.entry(Self::key(db, name)).or_insert_with(Vec::new);
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = self.next_record_id.fetch_add(1, Ordering::Relaxed);
            rows.push((id, doc.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn collection_update_all(&self, db: &str, name: &str, updates: &[(i64, Document)]) -> Result<()> {
        let mut cols = self.collections.lock();
        if let Some(rows) = cols.get_mut(&Self::key(db, name)) {
            for (record_id, new_doc) in updates {
                if let Some(entry) = rows.iter_mut().find(|(id, _)| id == record_id) {
                    entry.1 = new_doc.clone();
                }
            }
        }
        Ok(())
    }

    async fn collection_delete_all(&self, db: &str, name: &str, ids: &[i64]) -> Result<()> {
        let mut cols = self.collections.lock();
        if let Some(rows) = cols.get_mut(&Self::key(db, name)) {
            rows.retain(|(id, _)| !ids.contains(id));
        }
        Ok(())
    }

    async fn collection_query<'a>(&'a self, db: &str, name: &str, _pushdown: &PushdownWhere) -> Result<RowStream<'a>> {
        let cols = self.collections.lock();
        let rows: Vec<Result<Row>> = cols
            .get(&Self::key(db, name))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(record_id, document)| Ok(Row { record_id, document }))
            .collect();
        Ok(stream::iter(rows).boxed())
    }

    async fn collection_explain(&self, _db: &str, _name: &str, pushdown: &PushdownWhere) -> Result<Document> {
        Ok(doc! { "pushdown" => Value::Bool(pushdown.sql.is_some()) })
    }

    async fn list_indexes(&self, db: &str, name: &str) -> Result<Vec<IndexMeta>> {
        Ok(self.indexes.lock().get(&Self::key(db, name)).cloned().unwrap_or_default())
    }

    async fn create_indexes(&self, db: &str, name: &str, indexes: &[IndexMeta]) -> Result<()> {
        self.indexes.lock().entry(Self::key(db, name)).or_insert_with(Vec::new).extend(indexes.iter().cloned());
        Ok(())
    }

    async fn drop_index(&self, db: &str, name: &str, index_name: &str) -> Result<()> {
        if let Some(idxs) = self.indexes.lock().get_mut(&Self::key(db, name)) {
            idxs.retain(|i| i.name != index_name);
        }
        Ok(())
    }
}
