use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry pacing for the catchup driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Retries after the first failure; once exhausted, catchup parks in
    /// its error state until restarted.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_retries: 5,
        }
    }
}

impl BackoffConfig {
    /// `min(initial × multiplier^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = (self.initial_delay_ms as f64) * self.multiplier.powi(attempt as i32);
        Duration::from_millis((exp as u64).min(self.max_delay_ms))
    }
}

/// Where the server lives and how the client paces itself against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// HTTP base, e.g. `https://api.example.dev`.
    pub base_url: String,
    /// Appended to `base_url` for the paged pull.
    pub catchup_path: String,
    /// WebSocket URL for the live stream.
    pub stream_url: String,
    pub backoff: BackoffConfig,
    /// Pause before the stream reconnects after a drop, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Capacity of the outbound event channel.
    pub outbound_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            base_url: "http://127.0.0.1:8080".to_owned(),
            catchup_path: "/sync/catchup".to_owned(),
            stream_url: "ws://127.0.0.1:8080/sync/stream".to_owned(),
            backoff: BackoffConfig::default(),
            reconnect_delay_ms: 1_000,
            outbound_capacity: 256,
        }
    }
}
