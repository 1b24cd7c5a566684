//! EIP-6963 provider announcements.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::provider::Eip1193Provider;

/// Metadata a wallet announces about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Per-page-load RFC 4122 v4 identifier.
    pub uuid: String,
    /// Display name, e.g. "MetaMask".
    pub name: String,
    /// Icon as a data URI or https URL.
    pub icon: String,
    /// Reverse DNS identity, e.g. `io.metamask`. Stable across page loads.
    pub rdns: String,
}

impl ProviderInfo {
    /// Create provider info.
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        icon: impl Into<String>,
        rdns: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            icon: icon.into(),
            rdns: rdns.into(),
        }
    }
}

/// A provider announcement: wallet metadata plus its EIP-1193 handle.
#[derive(Clone)]
pub struct ProviderDetail {
    /// Wallet metadata.
    pub info: ProviderInfo,
    /// The wallet's request/event handle.
    pub provider: Arc<dyn Eip1193Provider>,
}

impl std::fmt::Debug for ProviderDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDetail")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl ProviderDetail {
    /// Pair wallet metadata with its provider handle.
    pub fn new(info: ProviderInfo, provider: Arc<dyn Eip1193Provider>) -> Self {
        Self { info, provider }
    }

    /// The durable session key.
    #[must_use]
    pub fn rdns(&self) -> &str {
        &self.info.rdns
    }

    /// The per-load dedup key.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.info.uuid
    }
}
