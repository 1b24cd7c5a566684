//! EIP-1559 fee estimates.

use serde::{Deserialize, Serialize};

/// Priority fee tiers, in wei.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFees {
    /// Low percentile tip.
    pub safe: u128,
    /// Median tip.
    pub average: u128,
    /// High percentile tip.
    pub fast: u128,
}

/// Base fee plus priority tiers for the latest block, in wei.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimates {
    /// Base fee per gas of the latest block.
    pub base_fee: u128,
    /// Priority fee tiers.
    pub priority: PriorityFees,
}

impl GasEstimates {
    /// Suggested `maxFeePerGas` for a tier: twice the base fee plus the tip.
    #[must_use]
    pub const fn max_fee(&self, tip: u128) -> u128 {
        self.base_fee.saturating_mul(2).saturating_add(tip)
    }
}
