//! Server configuration loaded from environment variables.
//!
//! Everything except the platform address has a default so the server can
//! start with minimal configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mastermind_shared::address::normalize;
use mastermind_shared::amount::sol_to_lamports;
use mastermind_shared::constants::{
    DEFAULT_CREATE_PRICE_SOL, DEFAULT_HTTP_PORT, DEFAULT_PLATFORM_FEE_FRACTION, DEFAULT_RPC_URL,
};
use mastermind_shared::WalletAddress;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3001`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory.
    pub database_path: Option<PathBuf>,

    /// Solana JSON-RPC endpoint used to verify payments.
    /// Env: `SOLANA_RPC_URL`
    /// Default: devnet.
    pub solana_rpc_url: String,

    /// Receives creation fees and the platform leg of join fees.
    /// Env: `PLATFORM_ADDRESS` (required)
    pub platform_address: Option<WalletAddress>,

    /// Creation fee in SOL.
    /// Env: `CREATE_PRICE_SOL`
    /// Default: `6.9`
    pub create_price: f64,

    /// Platform share of every join payment, in `[0, 1]`.
    /// Env: `PLATFORM_FEE_FRACTION`
    /// Default: `0.01`
    pub platform_fee_fraction: f64,

    /// Allow any origin through CORS.
    /// Env: `CORS_ALLOW_ANY` (true/false)
    /// Default: `true`
    pub cors_allow_any: bool,

    /// Timeout for each RPC request.
    /// Env: `RPC_TIMEOUT_SECS`
    /// Default: `15`
    pub rpc_timeout: Duration,

    /// Sustained requests per second allowed per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst size per client IP.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,

    /// Group creations and joins allowed per minute per client IP.
    /// Env: `PAYMENT_RATE_LIMIT_PER_MIN`
    /// Default: `12`
    pub payment_rate_limit_per_min: f64,

    /// Payment requests a client may send back to back.
    /// Env: `PAYMENT_RATE_LIMIT_BURST`
    /// Default: `3`
    pub payment_rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            solana_rpc_url: DEFAULT_RPC_URL.to_string(),
            platform_address: None,
            create_price: DEFAULT_CREATE_PRICE_SOL,
            platform_fee_fraction: DEFAULT_PLATFORM_FEE_FRACTION,
            cors_allow_any: true,
            rpc_timeout: Duration::from_secs(15),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            payment_rate_limit_per_min: 12.0,
            payment_rate_limit_burst: 3.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(url) = var("SOLANA_RPC_URL").filter(|u| !u.is_empty()) {
            config.solana_rpc_url = url;
        }

        if let Some(addr) = var("PLATFORM_ADDRESS") {
            match normalize(&addr) {
                Ok(parsed) => config.platform_address = Some(parsed),
                Err(e) => tracing::warn!(error = %e, "Invalid PLATFORM_ADDRESS, ignoring"),
            }
        }

        if let Some(val) = var("CREATE_PRICE_SOL") {
            match val.parse::<f64>() {
                Ok(price) if sol_to_lamports(price).is_ok() => config.create_price = price,
                _ => tracing::warn!(value = %val, "Invalid CREATE_PRICE_SOL, using default"),
            }
        }

        if let Some(val) = var("PLATFORM_FEE_FRACTION") {
            match val.parse::<f64>() {
                Ok(f) if (0.0..=1.0).contains(&f) => config.platform_fee_fraction = f,
                _ => tracing::warn!(value = %val, "Invalid PLATFORM_FEE_FRACTION, using default"),
            }
        }

        if let Some(val) = var("CORS_ALLOW_ANY") {
            config.cors_allow_any = val != "false" && val != "0";
        }

        if let Some(val) = var("RPC_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.rpc_timeout = Duration::from_secs(n.max(1));
            }
        }

        if let Some(val) = var("RATE_LIMIT_PER_SEC") {
            match val.parse::<f64>() {
                Ok(n) if n > 0.0 => config.rate_limit_per_sec = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_SEC, using default"),
            }
        }

        if let Some(val) = var("RATE_LIMIT_BURST") {
            match val.parse::<f64>() {
                Ok(n) if n >= 1.0 => config.rate_limit_burst = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        if let Some(val) = var("PAYMENT_RATE_LIMIT_PER_MIN") {
            match val.parse::<f64>() {
                Ok(n) if n > 0.0 => config.payment_rate_limit_per_min = n,
                _ => tracing::warn!(value = %val, "Invalid PAYMENT_RATE_LIMIT_PER_MIN, using default"),
            }
        }

        if let Some(val) = var("PAYMENT_RATE_LIMIT_BURST") {
            match val.parse::<f64>() {
                Ok(n) if n >= 1.0 => config.payment_rate_limit_burst = n,
                _ => tracing::warn!(value = %val, "Invalid PAYMENT_RATE_LIMIT_BURST, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
