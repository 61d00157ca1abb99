//! # palaver-server
//!
//! Messaging backend for palaver.
//!
//! This binary provides:
//! - **REST API** (axum) for sending, paging, editing, deleting, and
//!   seen-marking messages
//! - **WebSocket push channel** that fans message mutations and typing
//!   signals out to connected participants
//! - **Presence registry** tracking which user is reachable on which
//!   connection (in-memory, single instance)
//! - **Local media storage** for image/video attachments
//! - **Per-client rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod fanout;
mod media;
mod presence;
mod rate_limit;
mod ws;

use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use palaver_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::fanout::Fanout;
use crate::media::MediaStore;
use crate::presence::PresenceRegistry;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,palaver_server=debug")),
        )
        .init();

    info!("Starting palaver server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Message store (creates the database file and runs migrations)
    let database = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(database));

    // Presence registry: the composition root owns it and hands it to
    // everything that needs reachability answers.
    let registry = Arc::new(PresenceRegistry::new(db.clone()));

    // Delivery fanout over the registry
    let fanout = Arc::new(Fanout::new(registry.clone(), db.clone()));

    // Media store (creates directory if missing)
    let media = Arc::new(
        MediaStore::new(config.media_storage_path.clone(), config.max_media_size)
            .await
            .map_err(|e| anyhow::anyhow!("media store init failed: {e}"))?,
    );

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        db,
        registry,
        fanout,
        media,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(app_state, rate_limiter, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
