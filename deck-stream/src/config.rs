//! Configuration for the market data stream

use std::time::Duration;

use deck_core::{DeckError, DeckResult};

/// Development fallback endpoint
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8787/stream";

/// Keep-alive ping interval
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Fixed delay before an automatic reconnect attempt
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Consecutive abnormal closes tolerated before giving up
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Capacity of the update broadcast channel
const DEFAULT_UPDATE_BUFFER: usize = 1024;

/// Configuration for `MarketStream`
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Push-update endpoint, e.g. `wss://feed.example.com/stream`
    pub url: String,
    /// Keep-alive ping interval while connected
    pub heartbeat_interval: Duration,
    /// Fixed delay between an abnormal close and the next attempt
    pub reconnect_delay: Duration,
    /// Consecutive abnormal closes tolerated before entering the failed state
    pub max_reconnect_attempts: u32,
    /// Whether abnormal closes schedule automatic reconnects
    pub auto_reconnect: bool,
    /// Capacity of the update broadcast channel
    pub update_buffer: usize,
}

impl StreamConfig {
    /// Configuration for the given endpoint with default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }

    /// Build from the environment; requires `MARKET_WS_URL`
    pub fn from_env() -> DeckResult<Self> {
        let url = std::env::var("MARKET_WS_URL")
            .map_err(|_| DeckError::config("MARKET_WS_URL is not set"))?;
        Ok(Self::new(url))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        let url = std::env::var("MARKET_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        Self::new(url)
    }
}
