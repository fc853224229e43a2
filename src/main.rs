/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file main.rs
 * @brief Server entry point: loads configuration, connects the storage
 * backend, and serves MongoDB wire protocol connections.
 */

use fauxdb::logger::{init_logger, LogLevel};
use fauxdb::{fauxdb_info, Config, PostgresBackend, Server};
use std::sync::Arc;
use std::time::Duration;

fn parse_args() -> (Option<String>, bool, Option<String>, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut no_pushdown = false;
    let mut database_url = None;
    let mut port = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = args.get(i + 1).cloned();
                i += 2;
            }
            "--no-pushdown" => {
                no_pushdown = true;
                i += 1;
            }
            "--database-url" => {
                database_url = args.get(i + 1).cloned();
                i += 2;
            }
            "--port" => {
                port = args.get(i + 1).and_then(|s| s.parse().ok());
                i += 2;
            }
            _ => i += 1,
        }
    }
    (config_path, no_pushdown, database_url, port)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LogLevel::Info, false);

    let (config_path, no_pushdown, database_url_override, port_override) = parse_args();

    let mut config = match &config_path {
        Some(path) => Config::load(path).await?,
        None => Config::load("config/fauxdb.toml").await.unwrap_or_default(),
    };
    if let Some(url) = database_url_override {
        config.database.uri = url;
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if no_pushdown {
        config.pushdown.enabled = false;
    }

    fauxdb_info!("FauxDB starting");
    fauxdb_info!("Pushdown: {}", if config.pushdown.enabled { "enabled" } else { "disabled" });
    fauxdb_info!("Database: {}", config.database.uri);
    fauxdb_info!("Listening address: {}:{}", config.server.host, config.server.port);

    let backend = PostgresBackend::connect(&config.database.uri, config.database.max_connections as usize).await?;
    let server = Arc::new(Server::new(
        Arc::new(backend),
        "admin".to_string(),
        config.pushdown.enabled,
        Duration::from_millis(config.server.idle_timeout_ms),
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    server.run(&bind_addr).await?;
    Ok(())
}
