//! Unified error types for machi-connect.
//!
//! Errors are split by concern: [`ProviderError`] is what an injected
//! provider rejects a request with, [`StorageError`] covers the persistence
//! backend, and [`ConnectError`] is the crate-level error every public
//! operation returns. [`WalletError`] is the serializable snapshot of a
//! failed connect that stays attached to the session.

use serde::{Deserialize, Serialize};

/// Result type alias for machi-connect operations.
pub type Result<T> = std::result::Result<T, ConnectError>;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for wallet connection operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The provider answered `eth_requestAccounts` with an empty list.
    #[error("No accounts found in the selected wallet.")]
    NoAccountsReturned,

    /// An underlying provider request was rejected.
    ///
    /// Covers user rejection, provider disconnects and RPC errors alike.
    #[error("{0}")]
    ProviderRequestFailed(#[from] ProviderError),

    /// Signing or sending was attempted without a ready active wallet.
    #[error("Wallet not connected or no account available.")]
    NotReady,

    /// Discovery was attempted without an announcement bus.
    #[error("wallet discovery requires an announcement bus")]
    UnsupportedEnvironment,

    /// The provider answered with a payload of the wrong shape.
    #[error("invalid response to {method}: {reason}")]
    InvalidResponse {
        /// The JSON-RPC method that produced the response.
        method: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Persistence backend error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    /// Create an invalid response error for the given method.
    #[inline]
    pub fn invalid_response(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Numeric error code, if the provider supplied one.
    #[must_use]
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::ProviderRequestFailed(e) => e.code,
            _ => None,
        }
    }
}

// ============================================================================
// Provider Errors
// ============================================================================

/// A rejected EIP-1193 request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Human readable reason.
    pub message: String,
    /// EIP-1193 / JSON-RPC error code (e.g. 4001 for user rejection).
    pub code: Option<i64>,
}

impl ProviderError {
    /// EIP-1193 code for a request the user rejected.
    pub const USER_REJECTED: i64 = 4001;
    /// EIP-1193 code for an unauthorized method or account.
    pub const UNAUTHORIZED: i64 = 4100;
    /// EIP-1193 code for a provider that is disconnected from all chains.
    pub const DISCONNECTED: i64 = 4900;

    /// Create an error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error with a code.
    pub fn with_code(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    /// The error a wallet returns when the user dismisses its prompt.
    #[must_use]
    pub fn user_rejected() -> Self {
        Self::with_code("User rejected the request.", Self::USER_REJECTED)
    }
}

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Session Error Snapshot
// ============================================================================

/// Error details recorded on a session whose connect attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletError {
    /// Human readable reason.
    pub message: String,
    /// Provider error code, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl From<&ConnectError> for WalletError {
    fn from(err: &ConnectError) -> Self {
        Self {
            message: err.to_string(),
            code: err.code(),
        }
    }
}
