//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for ordinary requests (memory ops, resolution).
    pub request_timeout_ms: u64,
    /// Timeout for a single ping attempt.
    pub ping_timeout_ms: u64,
    /// How many times an unanswered ping is resent.
    pub ping_retries: u32,
    /// Consecutive failed keepalives before the device is declared gone.
    pub keepalive_failures: u32,
    /// Largest memory block moved by a single read or write request.
    pub memory_chunk_size: usize,
    /// Largest image slice sent by a single deploy request.
    pub deploy_chunk_size: usize,
    /// Timeout for each deploy chunk.
    pub deploy_timeout_ms: u64,
    /// Timeout for erasing the deployment area.
    pub erase_timeout_ms: u64,
    /// Timeout of the one extra read used to complete a truncated string.
    pub string_fetch_timeout_ms: u64,
    /// How long the read loop blocks on the transport before rechecking for shutdown.
    pub read_poll_ms: u64,
    /// Capacity of the device event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2_000,
            ping_timeout_ms: 500,
            ping_retries: 3,
            keepalive_failures: 3,
            memory_chunk_size: 1024,
            deploy_chunk_size: 1024,
            deploy_timeout_ms: 10_000,
            erase_timeout_ms: 30_000,
            string_fetch_timeout_ms: 1_000,
            read_poll_ms: 100,
            event_capacity: 100,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse engine configuration")
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    pub fn erase_timeout(&self) -> Duration {
        Duration::from_millis(self.erase_timeout_ms)
    }

    pub fn string_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.string_fetch_timeout_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "ping_retries": 7, "memory_chunk_size": 256 }"#)
            .expect("valid config");
        assert_eq!(config.ping_retries, 7);
        assert_eq!(config.memory_chunk_size, 256);
        assert_eq!(config.request_timeout_ms, EngineConfig::default().request_timeout_ms);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(EngineConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_durations() {
        let config = EngineConfig { ping_timeout_ms: 250, ..Default::default() };
        assert_eq!(config.ping_timeout(), Duration::from_millis(250));
    }
}
