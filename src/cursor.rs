/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file cursor.rs
 * @brief Server-side cursor registry: `find`/`aggregate` result buffering,
 * `getMore`/`killCursors` lifecycle, and tailable-cursor reset.
 */

use crate::document::Document;
use crate::error::{CommandError, ErrorCode};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Normal,
    Tailable,
    TailableAwait,
}

impl CursorKind {
    pub fn is_tailable(self) -> bool {
        matches!(self, CursorKind::Tailable | CursorKind::TailableAwait)
    }
}

/// Everything a tailable cursor needs to re-issue its query once its buffer
/// runs dry: the original filter plus the namespace it reads from. The
/// registry never touches the backend itself -- it hands this back to the
/// caller, which owns the backend connection.
#[derive(Debug, Clone)]
pub struct TailableSource {
    pub database: String,
    pub collection: String,
    pub filter: Document,
}

struct Cursor {
    owner_connection: u64,
    ns: String,
    kind: CursorKind,
    show_record_id: bool,
    no_cursor_timeout: bool,
    last_record_id: i64,
    last_touched: Instant,
    batch: VecDeque<Document>,
    tailable_source: Option<TailableSource>,
}

pub enum NextBatchOutcome {
    /// Zero or more documents, plus the cursor id to report back (`0` means
    /// the cursor is now exhausted and has been removed from the registry).
    Batch { documents: Vec<Document>, cursor_id: i64 },
    /// A tailable cursor's buffer ran dry; the caller must re-query the
    /// backend for records past `last_record_id` and call [`CursorRegistry::refill`].
    Requery { source: TailableSource, last_record_id: i64 },
}

/// Global table of live server-side cursors. `id` is a 63-bit positive
/// monotonic counter; `0` is reserved as the "cursor exhausted" sentinel and
/// is never assigned to a live cursor.
pub struct CursorRegistry {
    next_id: AtomicI64,
    cursors: Mutex<HashMap<i64, Cursor>>,
    idle_timeout: Duration,
}

impl CursorRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { next_id: AtomicI64::new(1), cursors: Mutex::new(HashMap::new()), idle_timeout }
    }

    fn allocate_id(&self) -> i64 {
        // Wraps within the positive 63-bit range rather than overflowing
        // into the sign bit, which would collide with the exhausted sentinel
        // on an improbable but possible billions-of-cursors run.
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) & i64::MAX;
            if id != 0 {
                return id;
            }
        }
    }

    /// Registers a fresh cursor for a `find`/`aggregate`/`listIndexes` result
    /// set that didn't fit (or, for tailable cursors, may never fit) in one
    /// batch. Returns `0` directly, without registering anything, when a
    /// non-tailable result is already fully drained by the first batch.
    #[allow(clippy::too_many_arguments)]
    pub fn new_cursor(
        &self,
        owner_connection: u64,
        ns: String,
        kind: CursorKind,
        show_record_id: bool,
        no_cursor_timeout: bool,
        first_batch: Vec<Document>,
        batch_size: usize,
        last_record_id: i64,
        tailable_source: Option<TailableSource>,
    ) -> (Vec<Document>, i64) {
        let mut remaining: VecDeque<Document> = first_batch.into();
        let returned: Vec<Document> = remaining.drain(..remaining.len().min(batch_size)).collect();

        if remaining.is_empty() && !kind.is_tailable() {
            return (returned, 0);
        }

        let id = self.allocate_id();
        let cursor = Cursor {
            owner_connection,
            ns,
            kind,
            show_record_id,
            no_cursor_timeout,
            last_record_id,
            last_touched: Instant::now(),
            batch: remaining,
            tailable_source,
        };
        self.cursors.lock().insert(id, cursor);
        (returned, id)
    }

    pub fn next_batch(&self, id: i64, owner_connection: u64, batch_size: usize) -> Result<NextBatchOutcome, CommandError> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.get_mut(&id).ok_or_else(|| {
            CommandError::new(ErrorCode::CursorNotFound, format!("cursor id {} not found", id))
        })?;
        if cursor.owner_connection != owner_connection {
            return Err(CommandError::new(
                ErrorCode::CursorNotFoundCrossSession,
                format!("cursor id {} was not created by this session", id),
            ));
        }
        cursor.last_touched = Instant::now();

        if cursor.batch.is_empty() {
            if cursor.kind.is_tailable() {
                if let Some(source) = cursor.tailable_source.clone() {
                    return Ok(NextBatchOutcome::Requery { source, last_record_id: cursor.last_record_id });
                }
            }
            return Ok(NextBatchOutcome::Batch { documents: Vec::new(), cursor_id: id });
        }

        let take = batch_size.min(cursor.batch.len());
        let documents: Vec<Document> = cursor.batch.drain(..take).collect();
        if cursor.batch.is_empty() && !cursor.kind.is_tailable() {
            cursors.remove(&id);
            return Ok(NextBatchOutcome::Batch { documents, cursor_id: 0 });
        }
        Ok(NextBatchOutcome::Batch { documents, cursor_id: id })
    }

    /// Resets a tailable cursor's iterator with freshly queried documents,
    /// advancing `last_record_id` so the next requery excludes what was just
    /// delivered.
    pub fn refill(&self, id: i64, documents: Vec<Document>, last_record_id: i64) {
        let mut cursors = self.cursors.lock();
        if let Some(cursor) = cursors.get_mut(&id) {
            cursor.batch = documents.into();
            cursor.last_record_id = last_record_id;
            cursor.last_touched = Instant::now();
        }
    }

    pub fn show_record_id(&self, id: i64) -> bool {
        self.cursors.lock().get(&id).map(|c| c.show_record_id).unwrap_or(false)
    }

    pub fn namespace(&self, id: i64) -> Option<String> {
        self.cursors.lock().get(&id).map(|c| c.ns.clone())
    }

    /// Kills the requested cursor ids, regardless of owner (an operator-level
    /// `killCursors` is not scoped to one connection). Returns
    /// `(killed, not_found)`.
    pub fn kill(&self, ids: &[i64]) -> (Vec<i64>, Vec<i64>) {
        let mut cursors = self.cursors.lock();
        let mut killed = Vec::new();
        let mut not_found = Vec::new();
        for &id in ids {
            if cursors.remove(&id).is_some() {
                killed.push(id);
            } else {
                not_found.push(id);
            }
        }
        (killed, not_found)
    }

    /// Drops every cursor owned by a connection that has just disconnected.
    pub fn close_connection(&self, owner_connection: u64) {
        self.cursors.lock().retain(|_, c| c.owner_connection != owner_connection);
    }

    /// Removes cursors idle past the configured timeout, exempting those
    /// opened with `noCursorTimeout`. Returns the ids removed.
    pub fn reap_idle(&self) -> Vec<i64> {
        let mut cursors = self.cursors.lock();
        let now = Instant::now();
        let expired: Vec<i64> = cursors
            .iter()
            .filter(|(_, c)| !c.no_cursor_timeout && now.duration_since(c.last_touched) > self.idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            cursors.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.cursors.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::value::Value;

    fn docs(n: i32) -> Vec<Document> {
        (0..n).map(|i| doc! { "v" => Value::Int32(i) }).collect()
    }

    #[test]
    fn small_result_exhausts_immediately() {
        let reg = CursorRegistry::new(Duration::from_secs(60));
        let (batch, id) = reg.new_cursor(1, "db.coll".into(), CursorKind::Normal, false, false, docs(3), 10, 3, None);
        assert_eq!(batch.len(), 3);
        assert_eq!(id, 0);
    }

    #[test]
    fn large_result_keeps_cursor_alive_and_drains() {
        let reg = CursorRegistry::new(Duration::from_secs(60));
        let (batch, id) = reg.new_cursor(1, "db.coll".into(), CursorKind::Normal, false, false, docs(5), 2, 5, None);
        assert_eq!(batch.len(), 2);
        assert_ne!(id, 0);

        let outcome = reg.next_batch(id, 1, 2).unwrap();
        match outcome {
            NextBatchOutcome::Batch { documents, cursor_id } => {
                assert_eq!(documents.len(), 2);
                assert_ne!(cursor_id, 0);
            }
            _ => panic!("expected a batch"),
        }

        let outcome = reg.next_batch(id, 1, 2).unwrap();
        match outcome {
            NextBatchOutcome::Batch { documents, cursor_id } => {
                assert_eq!(documents.len(), 1);
                assert_eq!(cursor_id, 0);
            }
            _ => panic!("expected the final batch"),
        }
    }

    #[test]
    fn cross_session_getmore_is_rejected() {
        let reg = CursorRegistry::new(Duration::from_secs(60));
        let (_, id) = reg.new_cursor(1, "db.coll".into(), CursorKind::Normal, false, false, docs(5), 2, 5, None);
        let err = reg.next_batch(id, 2, 2).unwrap_err();
        assert_eq!(err.code, ErrorCode::CursorNotFoundCrossSession.code());
    }

    #[test]
    fn tailable_cursor_requests_requery_when_dry() {
        let reg = CursorRegistry::new(Duration::from_secs(60));
        let source = TailableSource { database: "db".into(), collection: "coll".into(), filter: Document::new() };
        let (batch, id) = reg.new_cursor(1, "db.coll".into(), CursorKind::Tailable, false, false, docs(1), 10, 1, Some(source));
        assert_eq!(batch.len(), 1);
        assert_ne!(id, 0);

        match reg.next_batch(id, 1, 10).unwrap() {
            NextBatchOutcome::Requery { last_record_id, .. } => assert_eq!(last_record_id, 1),
            _ => panic!("expected a requery request"),
        }
    }

    #[test]
    fn kill_removes_cursor() {
        let reg = CursorRegistry::new(Duration::from_secs(60));
        let (_, id) = reg.new_cursor(1, "db.coll".into(), CursorKind::Normal, false, false, docs(5), 2, 5, None);
        let (killed, not_found) = reg.kill(&[id, 999]);
        assert_eq!(killed, vec![id]);
        assert_eq!(not_found, vec![999]);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn no_cursor_timeout_is_exempt_from_reaping() {
        let reg = CursorRegistry::new(Duration::from_millis(0));
        let (_, id) = reg.new_cursor(1, "db.coll".into(), CursorKind::Normal, true, true, docs(5), 2, 5, None);
        let expired = reg.reap_idle();
        assert!(expired.is_empty());
        assert_eq!(reg.len(), 1);
        let _ = id;
    }
}
