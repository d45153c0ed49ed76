//! Client configuration loaded from environment variables.

use std::time::Duration;

use mastermind_shared::address::normalize;
use mastermind_shared::amount::sol_to_lamports;
use mastermind_shared::constants::{
    DEFAULT_CLUSTER, DEFAULT_CREATE_PRICE_SOL, DEFAULT_HTTP_PORT, DEFAULT_PLATFORM_FEE_FRACTION,
    DEFAULT_RPC_URL,
};
use mastermind_shared::WalletAddress;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the group backend.
    /// Env: `API_BASE_URL`
    /// Default: `http://localhost:3001`
    pub api_base_url: String,

    /// Solana JSON-RPC endpoint used for blockhashes and confirmations.
    /// Env: `SOLANA_RPC_URL`
    pub solana_rpc_url: String,

    /// Cluster the wallet authorizes against.
    /// Env: `SOLANA_CLUSTER`
    /// Default: `devnet`
    pub cluster: String,

    /// Overrides the platform address advertised by `GET /api/config`.
    /// Env: `PLATFORM_ADDRESS`
    pub platform_address: Option<WalletAddress>,

    /// Creation fee in SOL, used until the backend advertises its own.
    /// Env: `CREATE_PRICE_SOL`
    pub create_price: f64,

    /// Platform share of join payments, used until the backend advertises its own.
    /// Env: `PLATFORM_FEE_FRACTION`
    pub platform_fee_fraction: f64,

    /// Wait before the single re-check of an unconfirmed signature.
    /// Env: `CONFIRM_RECHECK_DELAY_MS`
    /// Default: `2000`
    pub confirm_recheck_delay: Duration,

    /// Interval of the chat poller.
    /// Env: `MESSAGE_POLL_SECS`
    /// Default: `5`
    pub message_poll_interval: Duration,

    /// Timeout for each backend request.
    /// Env: `HTTP_TIMEOUT_SECS`
    /// Default: `15`
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            solana_rpc_url: DEFAULT_RPC_URL.to_string(),
            cluster: DEFAULT_CLUSTER.to_string(),
            platform_address: None,
            create_price: DEFAULT_CREATE_PRICE_SOL,
            platform_fee_fraction: DEFAULT_PLATFORM_FEE_FRACTION,
            confirm_recheck_delay: Duration::from_millis(2000),
            message_poll_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("API_BASE_URL").filter(|u| !u.is_empty()) {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(url) = var("SOLANA_RPC_URL").filter(|u| !u.is_empty()) {
            config.solana_rpc_url = url;
        }

        if let Some(cluster) = var("SOLANA_CLUSTER").filter(|c| !c.is_empty()) {
            config.cluster = cluster;
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

        if let Some(val) = var("CONFIRM_RECHECK_DELAY_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.confirm_recheck_delay = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid CONFIRM_RECHECK_DELAY_MS, using default"),
            }
        }

        if let Some(val) = var("MESSAGE_POLL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.message_poll_interval = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid MESSAGE_POLL_SECS, using default"),
            }
        }

        if let Some(val) = var("HTTP_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.http_timeout = Duration::from_secs(n.max(1));
            }
        }

        config
    }
}
