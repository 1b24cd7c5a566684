//! EIP-1559 fee estimation and the per-session polling loop.
//!
//! [`GasEstimator`] turns one `eth_feeHistory` call into [`GasEstimates`].
//! [`GasPollerHandle`] owns the background loop that repeats it; the handle
//! is stored inside the session it serves, so removing the session is what
//! stops the loop.

use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::config::{ConnectConfig, MIN_GAS_POLL_INTERVAL};
use crate::error::{ConnectError, Result};
use crate::provider::{Eip1193Provider, methods};
use crate::types::{GasEstimates, PriorityFees};
use crate::utils::parse_quantity;

/// Raw `eth_feeHistory` response. Only the fields we read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeHistoryResponse {
    #[serde(default)]
    base_fee_per_gas: Vec<String>,
    #[serde(default)]
    reward: Vec<Vec<String>>,
}

/// Fetches fee estimates from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GasEstimator {
    percentiles: [f64; 3],
    block_count: u64,
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::from_config(&ConnectConfig::default())
    }
}

impl GasEstimator {
    /// Build an estimator from the manager config.
    #[must_use]
    pub const fn from_config(config: &ConnectConfig) -> Self {
        Self {
            percentiles: config.fee_percentiles,
            block_count: config.fee_history_blocks,
        }
    }

    /// Request fee history for the latest block and derive the estimate.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected or the response has no
    /// parseable base fee. Missing reward entries are treated as zero.
    pub async fn fetch(&self, provider: &dyn Eip1193Provider) -> Result<GasEstimates> {
        let raw = provider
            .request(
                methods::FEE_HISTORY,
                vec![json!(self.block_count), json!("latest"), json!(self.percentiles)],
            )
            .await?;
        Self::parse(raw)
    }

    fn parse(raw: Value) -> Result<GasEstimates> {
        let history: FeeHistoryResponse = serde_json::from_value(raw)
            .map_err(|e| ConnectError::invalid_response(methods::FEE_HISTORY, e.to_string()))?;

        let base_fee = history
            .base_fee_per_gas
            .first()
            .and_then(|fee| parse_fee(fee))
            .ok_or_else(|| {
                ConnectError::invalid_response(methods::FEE_HISTORY, "missing baseFeePerGas")
            })?;

        let rewards = history.reward.first().map_or(&[][..], Vec::as_slice);
        let tier = |i: usize| rewards.get(i).and_then(|r| parse_fee(r)).unwrap_or(0);

        Ok(GasEstimates {
            base_fee,
            priority: PriorityFees {
                safe: tier(0),
                average: tier(1),
                fast: tier(2),
            },
        })
    }
}

fn parse_fee(value: &str) -> Option<u128> {
    parse_quantity(value).and_then(|v| u128::try_from(v).ok())
}

/// Handle to a running polling loop.
///
/// [`stop`](Self::stop) consumes the handle, so a loop can be stopped at most
/// once. Dropping the handle stops the loop as well.
#[derive(Debug)]
pub struct GasPollerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl GasPollerHandle {
    /// Spawn a loop that calls `tick` every `interval`.
    ///
    /// The first call happens one full interval after spawning; callers
    /// perform the initial fetch themselves. Intervals shorter than
    /// [`MIN_GAS_POLL_INTERVAL`] are raised to it. A tick already in progress
    /// when the loop is stopped is abandoned.
    pub fn spawn<F, Fut>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = interval.max(MIN_GAS_POLL_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?interval, "gas poller started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }
                trace!("gas poller tick");
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    () = tick() => {}
                }
            }

            debug!("gas poller stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Signal the loop to stop.
    pub fn stop(mut self) {
        self.signal();
    }

    /// Whether the loop task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn signal(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for GasPollerHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::MockProvider;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fetch_parses_fee_history() {
        let provider = MockProvider::wallet(&["0xAA"], "0x1");
        let gas = GasEstimator::default().fetch(&provider).await.unwrap();

        assert_eq!(gas.base_fee, 1_000_000_000);
        assert_eq!(gas.priority.safe, 1);
        assert_eq!(gas.priority.average, 1_500_000_000);
        assert_eq!(gas.priority.fast, 2_000_000_000);

        let params = &provider.calls_for("eth_feeHistory")[0];
        assert_eq!(params[0], json!(1));
        assert_eq!(params[1], json!("latest"));
        assert_eq!(params[2], json!([0.0, 50.0, 90.0]));
    }

    #[tokio::test]
    async fn test_missing_rewards_default_to_zero() {
        let provider = MockProvider::new();
        provider.respond(
            "eth_feeHistory",
            json!({"baseFeePerGas": ["0x64"], "reward": [["0x5"]]}),
        );
        let gas = GasEstimator::default().fetch(&provider).await.unwrap();
        assert_eq!(gas.base_fee, 100);
        assert_eq!(gas.priority, PriorityFees { safe: 5, average: 0, fast: 0 });

        provider.respond("eth_feeHistory", json!({"baseFeePerGas": ["0x64"]}));
        let gas = GasEstimator::default().fetch(&provider).await.unwrap();
        assert_eq!(gas.priority, PriorityFees::default());
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let provider = MockProvider::new();
        provider.respond("eth_feeHistory", json!({"baseFeePerGas": []}));
        let err = GasEstimator::default().fetch(&provider).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidResponse { .. }));

        provider.fail("eth_feeHistory", ProviderError::new("rpc down"));
        let err = GasEstimator::default().fetch(&provider).await.unwrap_err();
        assert!(matches!(err, ConnectError::ProviderRequestFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = GasPollerHandle::spawn(Duration::from_secs(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        handle.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_polls() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = GasPollerHandle::spawn(Duration::ZERO, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(MIN_GAS_POLL_INTERVAL * 3 + Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_poller() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = GasPollerHandle::spawn(Duration::from_secs(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(handle);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
