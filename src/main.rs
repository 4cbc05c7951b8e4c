//! nulkv: an in-memory key-value cache server
//!
//! Clients connect over TCP and send `;` separated commands:
//! - `GET <key>` returns the value, or `nil` when absent
//! - `SET <key> <value>` stores a value and returns `OK`
//! - `DELETE <key>` removes a key and returns `OK`
//!
//! Features:
//! - Single store guarded by a reader/writer lock
//! - Commands routed through one dispatcher task with per-request replies
//! - Connection cap and read/write deadlines
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod router;
mod server;
mod store;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        dispatch = ?config.dispatch,
        max_connections = config.max_connections,
        workers = ?config.workers,
        "Starting nulkv server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime
        .block_on(serve(config))
        .map_err(|e| e as Box<dyn std::error::Error>)
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::bind(config).await?;
    server.run_until_ctrl_c().await?;
    info!("Server stopped");
    Ok(())
}
