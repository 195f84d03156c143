//! # Chirp Server
//!
//! Minimal chat relay: messages posted to `/sendMessage` are fanned out to
//! every client streaming `/subscribe`.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the required settings
//! PORT=8080 API_CODE=s3cret chirp
//!
//! # Override nested settings
//! PORT=8080 HISTORY__CAPACITY=100 HEARTBEAT__KEEPALIVE_INTERVAL_MS=15000 chirp
//! ```
//!
//! A `chirp.toml` in the working directory, `/etc/chirp/` or
//! `~/.config/chirp/` is read first when present.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chirp=debug,chirp_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    if config.uses_default_api_code() {
        tracing::warn!(
            "API_CODE is not set, using the default shared secret \"{}\"",
            config::DEFAULT_API_CODE
        );
    }

    tracing::info!("Starting Chirp server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
