//! Registry of wallets announced through discovery.

use crate::types::ProviderDetail;

/// Append-only list of announced wallets, deduplicated by `uuid`.
///
/// Lives for the whole page and is independent of session lifecycle:
/// disconnecting a wallet does not remove it from here.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDetail>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement.
    ///
    /// Returns `false` if a provider with the same `uuid` is already known.
    pub fn announce(&mut self, detail: ProviderDetail) -> bool {
        if self.find_by_uuid(detail.uuid()).is_some() {
            return false;
        }
        self.providers.push(detail);
        true
    }

    /// All announced wallets, in announcement order.
    #[must_use]
    pub fn list(&self) -> &[ProviderDetail] {
        &self.providers
    }

    /// Look up an announcement by `uuid`.
    #[must_use]
    pub fn find_by_uuid(&self, uuid: &str) -> Option<&ProviderDetail> {
        self.providers.iter().find(|p| p.uuid() == uuid)
    }

    /// Look up the first announcement for a wallet identity.
    #[must_use]
    pub fn find_by_rdns(&self, rdns: &str) -> Option<&ProviderDetail> {
        self.providers.iter().find(|p| p.rdns() == rdns)
    }

    /// Number of announced wallets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether nothing has been announced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
