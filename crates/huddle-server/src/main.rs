//! # Huddle Server
//!
//! Realtime presence and event fan-out for Huddle chat.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory
//! huddle
//!
//! # Run with a specific config file
//! HUDDLE_CONFIG=/path/to/huddle.toml huddle
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_AUTH__JWT_SECRET=change-me huddle
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod store;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
