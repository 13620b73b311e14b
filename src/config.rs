use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::market::AssetId;

pub const DEFAULT_TICKER_API_URL: &str = "https://www.quidax.com/api/v1/markets/tickers";

pub const DEFAULT_ROUTES: [&str; 3] = [
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
    "https://api.codetabs.com/v1/proxy?quest=",
];

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_routes(raw: Option<String>) -> Vec<String> {
    match raw {
        None => DEFAULT_ROUTES.iter().map(|s| s.to_string()).collect(),
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Upstream
    pub ticker_api_url: String,
    pub routes: Vec<String>, // tried in order, first success wins
    pub route_timeout_secs: u64,

    // Loop timing
    pub refresh_interval_secs: u64,

    // Widget defaults
    pub default_asset: AssetId,

    // Dashboard
    pub dashboard_enabled: bool,
    pub dashboard_host: String,
    pub dashboard_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ticker_api_url: DEFAULT_TICKER_API_URL.to_string(),
            routes: parse_routes(None),
            route_timeout_secs: 10,
            refresh_interval_secs: 60,
            default_asset: AssetId::Btc,
            dashboard_enabled: true,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 8000,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let default_asset = get_env_string("DEFAULT_ASSET", "btc");
        let default_asset = AssetId::parse(&default_asset)
            .ok_or_else(|| anyhow!("DEFAULT_ASSET must be btc|eth|usdt (got {default_asset})"))?;

        let dashboard_port = get_env_u64("DASHBOARD_PORT", 8000)?;
        let dashboard_port = u16::try_from(dashboard_port)
            .map_err(|_| anyhow!("DASHBOARD_PORT out of range (got {dashboard_port})"))?;

        let s = Self {
            ticker_api_url: get_env_string("TICKER_API_URL", DEFAULT_TICKER_API_URL),
            routes: parse_routes(get_env("TICKER_ROUTES")),
            route_timeout_secs: get_env_u64("TICKER_ROUTE_TIMEOUT_SECS", 10)?,
            refresh_interval_secs: get_env_u64("REFRESH_INTERVAL_SECS", 60)?,
            default_asset,
            dashboard_enabled: get_env_bool("DASHBOARD_ENABLED", true),
            dashboard_host: get_env_string("DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.ticker_api_url.starts_with("http://") && !self.ticker_api_url.starts_with("https://") {
            return Err(anyhow!(
                "TICKER_API_URL must be an http(s) url (got {})",
                self.ticker_api_url
            ));
        }
        if self.routes.is_empty() {
            return Err(anyhow!("TICKER_ROUTES must name at least one route"));
        }
        if self.route_timeout_secs < 1 {
            return Err(anyhow!(
                "TICKER_ROUTE_TIMEOUT_SECS must be >= 1 (got {})",
                self.route_timeout_secs
            ));
        }
        if self.refresh_interval_secs < 1 {
            return Err(anyhow!(
                "REFRESH_INTERVAL_SECS must be >= 1 (got {})",
                self.refresh_interval_secs
            ));
        }
        Ok(())
    }
}
