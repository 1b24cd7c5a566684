//! Per-wallet session state and the session store.
//!
//! A [`Session`] is the live connection to one wallet. It owns the wallet's
//! provider handle, its listener registrations and its gas polling loop, so
//! tearing the session down releases all three. [`WalletState`] is the plain
//! data view of a session handed out to callers.

use alloy::primitives::U256;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::{ChainInfo, chain_info};
use crate::error::WalletError;
use crate::gas::GasPollerHandle;
use crate::provider::{Eip1193Provider, ListenerGuard};
use crate::types::{GasEstimates, ProviderDetail, ProviderInfo};

/// Snapshot of one wallet's connection state.
///
/// `is_connected == false` with no `error` means the connect attempt is
/// still in flight; with an `error` it means the attempt failed.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    /// Wallet metadata captured at connect time.
    pub info: ProviderInfo,
    /// The wallet's request handle.
    #[serde(skip)]
    pub provider: Option<Arc<dyn Eip1193Provider>>,
    /// Exposed accounts; the first one is the current account.
    pub addresses: Vec<String>,
    /// Current chain id, 0 until known.
    pub chain_id: u64,
    /// Balance of the current account in wei.
    pub balance: U256,
    /// Latest fee estimate.
    pub gas: GasEstimates,
    /// Whether the connect attempt completed successfully.
    pub is_connected: bool,
    /// Why the connect attempt failed, if it did.
    pub error: Option<WalletError>,
}

impl std::fmt::Debug for WalletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletState")
            .field("info", &self.info)
            .field("addresses", &self.addresses)
            .field("chain_id", &self.chain_id)
            .field("balance", &self.balance)
            .field("gas", &self.gas)
            .field("is_connected", &self.is_connected)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl WalletState {
    /// A zero-value state for a wallet about to be connected.
    #[must_use]
    pub fn connecting(detail: &ProviderDetail) -> Self {
        Self {
            info: detail.info.clone(),
            provider: Some(Arc::clone(&detail.provider)),
            ..Self::default()
        }
    }

    /// The session id (the wallet's rdns).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.rdns
    }

    /// The current account.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }

    /// Whether signing and sending can target this wallet.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_connected && self.provider.is_some() && !self.addresses.is_empty()
    }

    /// Whether the connect attempt is still in flight.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        !self.is_connected && self.error.is_none() && self.provider.is_some()
    }

    /// Display metadata for the current chain.
    #[must_use]
    pub fn chain(&self) -> ChainInfo {
        chain_info(self.chain_id)
    }
}

/// A live session in the store.
///
/// The generation distinguishes this session from any later session for the
/// same wallet, so background work started for one never writes into the other.
#[derive(Debug)]
pub struct Session {
    pub(crate) state: WalletState,
    generation: u64,
    poller: Option<GasPollerHandle>,
    listeners: Option<ListenerGuard>,
}

impl Session {
    /// Wrap a state snapshot with the given generation.
    #[must_use]
    pub const fn new(state: WalletState, generation: u64) -> Self {
        Self {
            state,
            generation,
            poller: None,
            listeners: None,
        }
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> &WalletState {
        &self.state
    }

    /// The generation this session was created with.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a gas polling loop is attached.
    #[must_use]
    pub const fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Whether provider listeners are attached.
    #[must_use]
    pub const fn has_listeners(&self) -> bool {
        self.listeners.is_some()
    }

    pub(crate) fn attach(&mut self, poller: GasPollerHandle, listeners: ListenerGuard) {
        self.teardown();
        self.poller = Some(poller);
        self.listeners = Some(listeners);
    }

    /// Stop the gas poller and detach provider listeners.
    pub fn teardown(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(listeners) = self.listeners.take() {
            listeners.detach();
        }
    }
}

/// Sessions keyed by wallet id, plus the active wallet pointer.
///
/// Iteration follows insertion order. The active id always names a present
/// session or is `None`.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    order: Vec<String>,
    active: Option<String>,
    next_generation: u64,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh generation number.
    pub const fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Look up a session for mutation.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Look up a session only if it is still the given generation.
    pub fn get_current(&mut self, id: &str, generation: u64) -> Option<&mut Session> {
        self.sessions
            .get_mut(id)
            .filter(|session| session.generation == generation)
    }

    /// Whether a session exists for `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Session ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Sessions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The active wallet id.
    #[must_use]
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The active session.
    #[must_use]
    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|id| self.sessions.get(id))
    }

    /// Point the active wallet at `id`.
    ///
    /// Returns `false` and leaves the pointer unchanged if `id` is not present.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.sessions.contains_key(id) {
            return false;
        }
        self.active = Some(id.to_string());
        true
    }

    /// Insert or replace the session for `id`, keeping its position.
    ///
    /// Returns the replaced session, which the caller must tear down.
    pub fn upsert(&mut self, id: &str, session: Session) -> Option<Session> {
        let previous = self.sessions.insert(id.to_string(), session);
        if previous.is_none() {
            self.order.push(id.to_string());
        }
        previous
    }

    /// Remove a session.
    ///
    /// If it was active, the first remaining session in insertion order
    /// becomes active, or `None` if the store is now empty.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.order.retain(|existing| existing != id);
        if self.active.as_deref() == Some(id) {
            self.active = self.order.first().cloned();
        }
        Some(session)
    }

    /// Remove every session and clear the active pointer.
    pub fn drain(&mut self) -> Vec<Session> {
        self.active = None;
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }
}
