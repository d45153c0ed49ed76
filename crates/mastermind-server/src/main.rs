//! # mastermind-server
//!
//! Group registry backend for Masterminds.
//!
//! This binary provides:
//! - **REST API** (axum) for groups, memberships, messages and usernames
//! - **On-chain payment verification** of creation and join fees against a
//!   Solana JSON-RPC endpoint, with single use of every payment signature
//! - **SQLite persistence** for the registry
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod rate_limit;
mod service;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mastermind_pay::RpcChainClient;
use mastermind_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::{Budget, RateLimiter, WRITE_BUDGET};
use crate::service::GroupService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mastermind_server=debug")),
        )
        .init();

    info!("Starting Masterminds backend v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let platform_address = config
        .platform_address
        .context("PLATFORM_ADDRESS must be set to a valid Solana address")?;

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("failed to open database")?;
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database ready");
    }

    let chain = RpcChainClient::new(config.solana_rpc_url.clone(), config.rpc_timeout)
        .context("failed to build Solana RPC client")?;
    info!(rpc = %config.solana_rpc_url, "Verifying payments against RPC");

    let service = GroupService::new(
        db,
        Arc::new(chain),
        platform_address,
        config.create_price,
        config.platform_fee_fraction,
    );

    let rate_limiter = RateLimiter::new(
        Budget::per_sec(config.rate_limit_per_sec, config.rate_limit_burst),
        WRITE_BUDGET,
        Budget::per_minute(config.payment_rate_limit_per_min, config.payment_rate_limit_burst),
    );

    let app_state = AppState {
        service: Arc::new(service),
        rate_limiter: rate_limiter.clone(),
        cors_allow_any: config.cors_allow_any,
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Every 5 minutes, forget clients idle for over 10 minutes
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rl.purge_stale(std::time::Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "Evicted idle rate limit allowances");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
