//! Message Relay Service
//!
//! HTTP service for routing sealed MPC messages between parties.

use anyhow::Result;
use clap::Parser;
use msg_relay::MessageStore;
use msg_relay_svc::router;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, Level};

/// Message relay service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "msg-relay-svc")]
#[command(about = "Message relay service for MPC communication")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "RELAY_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Message TTL in seconds
    #[arg(long, env = "RELAY_TTL", default_value = "3600")]
    ttl: i64,

    /// Seconds between purges of expired messages
    #[arg(long, env = "RELAY_CLEANUP_INTERVAL", default_value = "60")]
    cleanup_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.ttl >= 0, "ttl must not be negative");
    anyhow::ensure!(args.cleanup_interval > 0, "cleanup interval must be positive");

    info!(
        listen = %args.listen,
        ttl = args.ttl,
        cleanup_interval = args.cleanup_interval,
        "Starting message relay service"
    );

    let store = MessageStore::new(args.ttl);

    // Spawn cleanup task
    let cleanup_store = store.clone();
    let period = Duration::from_secs(args.cleanup_interval);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = cleanup_store.cleanup();
            debug!(removed, remaining = cleanup_store.len(), "Cleanup pass");
        }
    });

    let app = router(store)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
