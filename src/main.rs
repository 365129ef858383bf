//! chat-relay: a tiny polling chat server
//!
//! Serves a single chat page to any number of browsers. Each page polls
//! the server once per second for the shared log and posts new lines
//! back as urlencoded forms.
//!
//! Features:
//! - Fixed-size in-memory log, oldest message evicted first
//! - One connection served at a time, no keep-alive
//! - Read timeouts instead of waiting forever on slow clients
//! - Configuration via CLI arguments or TOML file

mod config;
mod form;
mod protocol;
mod render;
mod server;
mod storage;

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
        capacity = config.capacity,
        read_timeout_ms = config.read_timeout.as_millis() as u64,
        backlog = config.backlog,
        "Starting chat-relay server"
    );

    // Connections are handled strictly in sequence, so one thread is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config).await?;
    server.run().await;
    Ok(())
}
