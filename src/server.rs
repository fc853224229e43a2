/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file server.rs
 * @brief Connection server: TCP accept loop, one task per connection,
 * half-duplex read/dispatch/write, `ConnInfo` lifecycle and cursor cleanup.
 */

use crate::backend::Backend;
use crate::commands::Dispatcher;
use crate::cursor::CursorRegistry;
use crate::document::Document;
use crate::error::Result;
use crate::wire_protocol::{self, MongoMessage, OP_MSG, OP_QUERY};
use crate::{fauxdb_debug, fauxdb_info, fauxdb_warn};
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection state the cursor registry and dispatcher key off of. Kept
/// deliberately small: peer address for logging, and the numeric id that
/// scopes this connection's cursors.
pub struct ConnInfo {
    pub id: u64,
    pub peer_addr: String,
}

/// Owns the pieces a connection task needs: the storage backend, the
/// process-wide cursor table, and which database a `$db`-less command
/// falls back to.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    cursor_idle_reaper_interval: Duration,
}

impl Server {
    pub fn new(backend: Arc<dyn Backend>, default_database: String, pushdown_enabled: bool, cursor_idle_timeout: Duration) -> Self {
        let cursors = Arc::new(CursorRegistry::new(cursor_idle_timeout));
        let dispatcher = Arc::new(Dispatcher::new(backend, cursors, default_database, pushdown_enabled));
        Self { dispatcher, cursor_idle_reaper_interval: Duration::from_secs(60) }
    }

    /// Binds and serves forever, spawning one task per accepted connection.
    /// Never returns except on a fatal bind/accept error.
    pub async fn run(self: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        fauxdb_info!("Listening on {}", bind_addr);

        let reaper = self.clone();
        tokio::spawn(async move { reaper.reap_idle_cursors_forever().await });

        loop {
            let (socket, peer) = listener.accept().await?;
            let server = self.clone();
            let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            let conn = ConnInfo { id, peer_addr: peer.to_string() };
            tokio::spawn(async move {
                fauxdb_info!("connection {} opened from {}", conn.id, conn.peer_addr);
                if let Err(e) = server.serve_connection(socket, &conn).await {
                    fauxdb_warn!("connection {} closed with error: {}", conn.id, e);
                } else {
                    fauxdb_info!("connection {} closed", conn.id);
                }
                server.dispatcher.cursors.close_connection(conn.id);
            });
        }
    }

    async fn reap_idle_cursors_forever(&self) {
        let mut interval = tokio::time::interval(self.cursor_idle_reaper_interval);
        loop {
            interval.tick().await;
            let reaped = self.dispatcher.cursors.reap_idle();
            if !reaped.is_empty() {
                fauxdb_debug!("reaped {} idle cursor(s)", reaped.len());
            }
        }
    }

    /// The half-duplex per-connection loop: read one frame, dispatch it to
    /// completion, write the response, and only then read the next frame.
    /// Disconnect (EOF or I/O error) ends the loop; the caller closes every
    /// cursor this connection owns.
    async fn serve_connection(&self, mut socket: TcpStream, conn: &ConnInfo) -> Result<()> {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        loop {
            let message = loop {
                if let Some(msg) = wire_protocol::try_read_message(&mut buf)? {
                    break msg;
                }
                let mut chunk = [0u8; 16 * 1024];
                let n = socket.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(()); // clean EOF
                }
                buf.extend_from_slice(&chunk[..n]);
            };

            let response_bytes = self.handle_message(&message, conn).await?;
            if let Some(bytes) = response_bytes {
                socket.write_all(&bytes).await?;
            }
        }
    }

    async fn handle_message(&self, message: &MongoMessage, conn: &ConnInfo) -> Result<Option<Vec<u8>>> {
        match message.op_code {
            OP_MSG => {
                let cmd = wire_protocol::parse_op_msg(&message.body)?;
                let reply = self.dispatcher.dispatch(&cmd, conn.id).await;
                let bytes = wire_protocol::encode_op_msg_reply(message.request_id, 0, &reply)?;
                Ok(Some(bytes))
            }
            OP_QUERY => {
                let cmd = wire_protocol::parse_op_query(&message.body)?;
                let reply = handshake_reply(&cmd, &self.dispatcher, conn).await;
                let bytes = wire_protocol::encode_op_reply(message.request_id, 0, &reply)?;
                Ok(Some(bytes))
            }
            other => {
                fauxdb_warn!("connection {} sent unsupported opcode {}, closing", conn.id, other);
                Err(crate::error::FauxDBError::WireProtocol(format!("unsupported opcode {}", other)))
            }
        }
    }
}

/// Legacy `OP_QUERY` is only ever a `hello`/`isMaster` probe in practice;
/// anything else still goes through the real dispatcher so a non-conforming
/// driver gets a coherent error rather than a hardcoded response.
async fn handshake_reply(cmd: &Document, dispatcher: &Dispatcher, conn: &ConnInfo) -> Document {
    let is_handshake = cmd
        .iter()
        .next()
        .map(|(k, _)| k.eq_ignore_ascii_case("ismaster") || k.eq_ignore_ascii_case("hello"))
        .unwrap_or(false);
    if is_handshake {
        crate::commands::admin::hello()
    } else {
        dispatcher.dispatch(cmd, conn.id).await
    }
}
