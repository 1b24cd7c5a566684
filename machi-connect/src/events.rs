//! Change notifications for UI consumers.
//!
//! Every mutation of the wallet manager's state publishes a [`WalletEvent`]
//! on a broadcast channel. Subscribers re-read whatever state they render;
//! the events carry just enough to decide whether that is needed.

use alloy::primitives::U256;

use crate::error::WalletError;
use crate::types::GasEstimates;

/// A change to discovery or session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// A new wallet was announced.
    Discovered {
        /// Per-load announcement id.
        uuid: String,
        /// Wallet identity.
        rdns: String,
    },
    /// A connect attempt started and its session is now visible.
    Connecting {
        /// Session id.
        id: String,
    },
    /// A connect attempt succeeded.
    Connected {
        /// Session id.
        id: String,
    },
    /// A connect attempt failed; the session keeps the error.
    ConnectFailed {
        /// Session id.
        id: String,
        /// Why it failed.
        error: WalletError,
    },
    /// The wallet exposed a different account list.
    AccountsChanged {
        /// Session id.
        id: String,
        /// New account list.
        addresses: Vec<String>,
    },
    /// The wallet switched networks.
    ChainChanged {
        /// Session id.
        id: String,
        /// New chain id.
        chain_id: u64,
    },
    /// A fresh balance was fetched.
    BalanceUpdated {
        /// Session id.
        id: String,
        /// Balance in wei.
        balance: U256,
    },
    /// A fresh fee estimate was fetched.
    GasUpdated {
        /// Session id.
        id: String,
        /// New estimate.
        gas: GasEstimates,
    },
    /// The active wallet pointer moved.
    ActiveChanged {
        /// New active session id, if any.
        id: Option<String>,
    },
    /// A session was removed.
    Disconnected {
        /// Session id.
        id: String,
    },
}

impl WalletEvent {
    /// The session this event concerns, if it concerns one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Connecting { id }
            | Self::Connected { id }
            | Self::ConnectFailed { id, .. }
            | Self::AccountsChanged { id, .. }
            | Self::ChainChanged { id, .. }
            | Self::BalanceUpdated { id, .. }
            | Self::GasUpdated { id, .. }
            | Self::Disconnected { id } => Some(id),
            Self::ActiveChanged { id } => id.as_deref(),
            Self::Discovered { .. } => None,
        }
    }
}
