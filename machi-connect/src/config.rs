//! Configuration for the wallet manager.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// Shortest gas polling period; smaller configured values are raised to it.
pub const MIN_GAS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunables for discovery, gas polling and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Period of the per-session gas polling loop, in milliseconds.
    pub gas_poll_interval_ms: u64,
    /// How long discovery reports "searching" after a provider request, in milliseconds.
    pub search_window_ms: u64,
    /// Storage key holding the JSON array of auto-reconnect rdns values.
    pub storage_key: String,
    /// Reward percentiles for the safe, average and fast priority tiers.
    pub fee_percentiles: [f64; 3],
    /// Number of blocks requested from `eth_feeHistory`.
    pub fee_history_blocks: u64,
    /// Capacity of the wallet event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            gas_poll_interval_ms: 5_000,
            search_window_ms: 3_000,
            storage_key: "connectedWallets".to_string(),
            fee_percentiles: [0.0, 50.0, 90.0],
            fee_history_blocks: 1,
            event_capacity: 64,
        }
    }
}

impl ConnectConfig {
    /// Parse a config from JSON. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid JSON for this shape.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let config = Self::from_json(&raw)?;
        debug!(path = %path.display(), "loaded connect config");
        Ok(config)
    }

    /// Gas polling period, never shorter than [`MIN_GAS_POLL_INTERVAL`].
    #[must_use]
    pub fn gas_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gas_poll_interval_ms).max(MIN_GAS_POLL_INTERVAL)
    }

    /// Discovery search window.
    #[must_use]
    pub const fn search_window(&self) -> Duration {
        Duration::from_millis(self.search_window_ms)
    }

    /// Set the gas polling period.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_gas_poll_interval(mut self, interval: Duration) -> Self {
        self.gas_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the discovery search window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_search_window(mut self, window: Duration) -> Self {
        self.search_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the storage key for the auto-reconnect set.
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}
