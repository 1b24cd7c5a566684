//! Connect, disconnect and the per-session background work.

use alloy::primitives::U256;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::WalletManager;
use crate::error::{ConnectError, Result, WalletError};
use crate::events::WalletEvent;
use crate::gas::GasPollerHandle;
use crate::provider::{Eip1193Provider, ListenerGuard, ProviderEvent, methods};
use crate::session::{Session, WalletState};
use crate::types::{GasEstimates, ProviderDetail};
use crate::utils::{parse_chain_id, parse_quantity};

/// What a [`WalletManager::connect`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Another connect was in flight; nothing changed.
    Busy,
    /// The wallet already had a session, which is now active.
    Switched,
    /// The wallet connected and is now active.
    Connected,
    /// The connect failed; the session keeps the error and is active.
    Failed(WalletError),
    /// The session was disconnected before the connect finished.
    Cancelled,
}

impl ConnectOutcome {
    /// Whether the wallet ended up connected and active.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Switched)
    }
}

/// Which sessions [`WalletManager::disconnect`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectTarget {
    /// The active wallet, if any.
    Active,
    /// One wallet by id.
    Wallet(String),
    /// Every wallet.
    All,
}

impl From<&str> for DisconnectTarget {
    fn from(id: &str) -> Self {
        Self::Wallet(id.to_string())
    }
}

impl From<String> for DisconnectTarget {
    fn from(id: String) -> Self {
        Self::Wallet(id)
    }
}

/// Holds the manager-wide connecting flag for one attempt.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl<'a> ConnectingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything learned from the wallet during connect.
struct Handshake {
    addresses: Vec<String>,
    chain_id: u64,
    balance: U256,
    gas: Option<GasEstimates>,
}

impl WalletManager {
    // ========================================================================
    // Connect
    // ========================================================================

    /// Connect a wallet and make it active.
    ///
    /// Only one connect runs at a time across all wallets; a call made while
    /// another is in flight returns [`ConnectOutcome::Busy`] immediately. If
    /// the wallet already has a session it is only made active.
    ///
    /// The session is visible (as connecting) from the start of the attempt.
    /// On failure it stays in the store with its error set.
    pub async fn connect(&self, detail: ProviderDetail) -> ConnectOutcome {
        let Some(_connecting) = ConnectingGuard::acquire(&self.inner.connecting) else {
            debug!(wallet = %detail.info.rdns, "connect already in progress, ignoring");
            return ConnectOutcome::Busy;
        };
        let id = detail.info.rdns.clone();

        let generation = {
            let mut store = self.inner.store.write().await;
            if store.contains(&id) {
                store.set_active(&id);
                drop(store);
                debug!(wallet = %id, "wallet already has a session, switching to it");
                self.emit(WalletEvent::ActiveChanged { id: Some(id) });
                return ConnectOutcome::Switched;
            }
            let generation = store.next_generation();
            store.upsert(&id, Session::new(WalletState::connecting(&detail), generation));
            generation
        };

        info!(wallet = %id, name = %detail.info.name, "connecting wallet");
        self.emit(WalletEvent::Connecting { id: id.clone() });

        let result = self.handshake(&id, detail.provider.as_ref()).await;
        match result {
            Ok(handshake) => {
                self.finish_connect(&id, generation, detail.provider, handshake)
                    .await
            }
            Err(e) => self.fail_connect(&id, generation, &e).await,
        }
    }

    async fn handshake(&self, id: &str, provider: &dyn Eip1193Provider) -> Result<Handshake> {
        let accounts = provider.request(methods::REQUEST_ACCOUNTS, vec![]).await?;
        let addresses: Vec<String> = serde_json::from_value(accounts).map_err(|e| {
            ConnectError::invalid_response(methods::REQUEST_ACCOUNTS, e.to_string())
        })?;
        let Some(address) = addresses.first() else {
            return Err(ConnectError::NoAccountsReturned);
        };

        let raw_chain = provider.request(methods::CHAIN_ID, vec![]).await?;
        let chain_id = chain_id_from(&raw_chain).ok_or_else(|| {
            ConnectError::invalid_response(methods::CHAIN_ID, format!("not a chain id: {raw_chain}"))
        })?;

        let balance = fetch_balance(provider, address).await?;

        let gas = match self.inner.gas.fetch(provider).await {
            Ok(gas) => Some(gas),
            Err(e) => {
                warn!(wallet = %id, error = %e, "initial gas estimate failed, continuing without it");
                None
            }
        };

        debug!(wallet = %id, accounts = addresses.len(), chain_id, "wallet handshake complete");
        Ok(Handshake {
            addresses,
            chain_id,
            balance,
            gas,
        })
    }

    async fn finish_connect(
        &self,
        id: &str,
        generation: u64,
        provider: Arc<dyn Eip1193Provider>,
        handshake: Handshake,
    ) -> ConnectOutcome {
        {
            let mut store = self.inner.store.write().await;
            let Some(session) = store.get_current(id, generation) else {
                info!(wallet = %id, "wallet disconnected while connecting, discarding result");
                return ConnectOutcome::Cancelled;
            };

            let state = &mut session.state;
            state.addresses = handshake.addresses;
            state.chain_id = handshake.chain_id;
            state.balance = handshake.balance;
            if let Some(gas) = handshake.gas {
                state.gas = gas;
            }
            state.is_connected = true;

            let poller = self.spawn_gas_poller(id, generation);
            let listeners = self.attach_listeners(id, generation, provider);
            session.attach(poller, listeners);
            store.set_active(id);
        }

        if let Err(e) = self.inner.persisted.add(id).await {
            warn!(wallet = %id, error = %e, "failed to persist connected wallet");
        }
        // A disconnect may have run while we were persisting.
        if !self.is_current(id, generation).await {
            if let Err(e) = self.inner.persisted.remove(id).await {
                warn!(wallet = %id, error = %e, "failed to forget disconnected wallet");
            }
            return ConnectOutcome::Cancelled;
        }

        info!(wallet = %id, "wallet connected");
        self.emit(WalletEvent::Connected { id: id.to_string() });
        self.emit(WalletEvent::ActiveChanged {
            id: Some(id.to_string()),
        });
        ConnectOutcome::Connected
    }

    async fn fail_connect(&self, id: &str, generation: u64, err: &ConnectError) -> ConnectOutcome {
        let error = WalletError::from(err);
        warn!(wallet = %id, error = %err, code = ?err.code(), "wallet connection failed");
        {
            let mut store = self.inner.store.write().await;
            let Some(session) = store.get_current(id, generation) else {
                return ConnectOutcome::Cancelled;
            };
            session.state.error = Some(error.clone());
            store.set_active(id);
        }

        self.emit(WalletEvent::ConnectFailed {
            id: id.to_string(),
            error: error.clone(),
        });
        self.emit(WalletEvent::ActiveChanged {
            id: Some(id.to_string()),
        });
        ConnectOutcome::Failed(error)
    }

    // ========================================================================
    // Background work
    // ========================================================================

    fn spawn_gas_poller(&self, id: &str, generation: u64) -> GasPollerHandle {
        let weak = self.downgrade();
        let id = id.to_string();
        GasPollerHandle::spawn(self.inner.config.gas_poll_interval(), move || {
            let weak = weak.clone();
            let id = id.clone();
            async move {
                if let Some(manager) = Self::from_weak(&weak) {
                    manager.refresh_gas(&id, generation).await;
                }
            }
        })
    }

    /// Subscribe to the provider's events and feed them to a pump task.
    ///
    /// Events are handled one at a time in arrival order. The pump ends once
    /// the returned guard is detached or the session is gone.
    fn attach_listeners(
        &self,
        id: &str,
        generation: u64,
        provider: Arc<dyn Eip1193Provider>,
    ) -> ListenerGuard {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProviderEvent>();
        let guard = ListenerGuard::attach(provider, move |event| {
            let _ = tx.send(event);
        });

        let weak = self.downgrade();
        let id = id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(manager) = Self::from_weak(&weak) else {
                    break;
                };
                if !manager.is_current(&id, generation).await {
                    break;
                }
                trace!(wallet = %id, ?event, "provider event");
                manager.handle_provider_event(&id, generation, event).await;
            }
            trace!(wallet = %id, "provider event pump stopped");
        });

        guard
    }

    async fn handle_provider_event(&self, id: &str, generation: u64, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                self.on_accounts_changed(id, generation, accounts).await;
            }
            ProviderEvent::ChainChanged(chain) => {
                self.on_chain_changed(id, generation, &chain).await;
            }
            ProviderEvent::Block => self.refresh_gas(id, generation).await,
        }
    }

    async fn generation_of(&self, id: &str) -> Option<u64> {
        self.inner.store.read().await.get(id).map(Session::generation)
    }

    async fn is_current(&self, id: &str, generation: u64) -> bool {
        self.generation_of(id).await == Some(generation)
    }

    async fn provider_of(&self, id: &str, generation: u64) -> Option<Arc<dyn Eip1193Provider>> {
        self.inner
            .store
            .read()
            .await
            .get(id)
            .filter(|session| session.generation() == generation)
            .and_then(|session| session.state().provider.clone())
    }

    // ========================================================================
    // Provider event handling
    // ========================================================================

    /// Apply an `accountsChanged` notification to a session.
    ///
    /// An empty list disconnects the session. Otherwise the account list is
    /// replaced and the balance of the new current account is fetched.
    pub async fn accounts_changed(&self, id: &str, accounts: Vec<String>) {
        if let Some(generation) = self.generation_of(id).await {
            self.on_accounts_changed(id, generation, accounts).await;
        }
    }

    /// Apply a `chainChanged` notification to a session.
    ///
    /// Refreshes the balance and the fee estimate for the new chain.
    pub async fn chain_changed(&self, id: &str, chain_id: &str) {
        if let Some(generation) = self.generation_of(id).await {
            self.on_chain_changed(id, generation, chain_id).await;
        }
    }

    /// Apply a new block head notification to a session.
    pub async fn block_head_observed(&self, id: &str) {
        if let Some(generation) = self.generation_of(id).await {
            self.refresh_gas(id, generation).await;
        }
    }

    async fn on_accounts_changed(&self, id: &str, generation: u64, accounts: Vec<String>) {
        if accounts.is_empty() {
            info!(wallet = %id, "wallet exposed no accounts, disconnecting");
            self.disconnect_session(id, Some(generation)).await;
            return;
        }

        {
            let mut store = self.inner.store.write().await;
            let Some(session) = store.get_current(id, generation) else {
                return;
            };
            session.state.addresses.clone_from(&accounts);
        }
        debug!(wallet = %id, accounts = accounts.len(), "accounts changed");
        self.emit(WalletEvent::AccountsChanged {
            id: id.to_string(),
            addresses: accounts,
        });

        self.refresh_balance(id, generation).await;
    }

    async fn on_chain_changed(&self, id: &str, generation: u64, chain: &str) {
        let Some(chain_id) = parse_chain_id(chain) else {
            warn!(wallet = %id, chain, "ignoring unparseable chain id");
            return;
        };

        {
            let mut store = self.inner.store.write().await;
            let Some(session) = store.get_current(id, generation) else {
                return;
            };
            session.state.chain_id = chain_id;
        }
        debug!(wallet = %id, chain_id, "chain changed");
        self.emit(WalletEvent::ChainChanged {
            id: id.to_string(),
            chain_id,
        });

        self.refresh_balance(id, generation).await;
        self.refresh_gas(id, generation).await;
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Fetch a fresh fee estimate for a wallet, or for the active wallet.
    ///
    /// A failed fetch keeps the previous estimate.
    pub async fn refresh_gas_fees(&self, id: Option<&str>) {
        let target = {
            let store = self.inner.store.read().await;
            id.map_or_else(|| store.active(), |id| store.get(id))
                .map(|session| (session.id().to_string(), session.generation()))
        };
        if let Some((id, generation)) = target {
            self.refresh_gas(&id, generation).await;
        }
    }

    async fn refresh_gas(&self, id: &str, generation: u64) {
        let Some(provider) = self.provider_of(id, generation).await else {
            return;
        };

        let gas = match self.inner.gas.fetch(provider.as_ref()).await {
            Ok(gas) => gas,
            Err(e) => {
                warn!(wallet = %id, error = %e, "gas estimate failed, keeping previous");
                return;
            }
        };

        {
            let mut store = self.inner.store.write().await;
            let Some(session) = store.get_current(id, generation) else {
                return;
            };
            session.state.gas = gas;
        }
        trace!(wallet = %id, base_fee = gas.base_fee, "gas estimate updated");
        self.emit(WalletEvent::GasUpdated {
            id: id.to_string(),
            gas,
        });
    }

    async fn refresh_balance(&self, id: &str, generation: u64) {
        let target = {
            let store = self.inner.store.read().await;
            store
                .get(id)
                .filter(|session| session.generation() == generation)
                .and_then(|session| {
                    let state = session.state();
                    Some((state.provider.clone()?, state.address()?.to_string()))
                })
        };
        let Some((provider, address)) = target else {
            return;
        };

        let balance = match fetch_balance(provider.as_ref(), &address).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(wallet = %id, %address, error = %e, "balance refresh failed");
                return;
            }
        };

        {
            let mut store = self.inner.store.write().await;
            let Some(session) = store.get_current(id, generation) else {
                return;
            };
            // The account may have changed again while we were fetching.
            if session.state.address() != Some(address.as_str()) {
                debug!(wallet = %id, %address, "discarding balance for previous account");
                return;
            }
            session.state.balance = balance;
        }
        debug!(wallet = %id, %address, %balance, "balance updated");
        self.emit(WalletEvent::BalanceUpdated {
            id: id.to_string(),
            balance,
        });
    }

    // ========================================================================
    // Disconnect
    // ========================================================================

    /// Remove one wallet, the active wallet, or every wallet.
    ///
    /// Removed wallets are torn down and forgotten by auto-reconnect. If the
    /// active wallet is removed, the first remaining session becomes active.
    /// Disconnecting an unknown id is a no-op.
    pub async fn disconnect(&self, target: impl Into<DisconnectTarget>) {
        match target.into() {
            DisconnectTarget::Active => {
                if let Some(id) = self.active_wallet_id().await {
                    self.disconnect_session(&id, None).await;
                }
            }
            DisconnectTarget::Wallet(id) => {
                self.disconnect_session(&id, None).await;
            }
            DisconnectTarget::All => self.disconnect_all().await,
        }
    }

    /// Remove every wallet and clear the auto-reconnect set.
    pub async fn disconnect_all(&self) {
        let sessions = self.inner.store.write().await.drain();
        let count = sessions.len();
        for mut session in sessions {
            session.teardown();
            self.emit(WalletEvent::Disconnected {
                id: session.id().to_string(),
            });
        }

        if let Err(e) = self.inner.persisted.clear().await {
            warn!(error = %e, "failed to clear connected wallets");
        }
        if count > 0 {
            self.emit(WalletEvent::ActiveChanged { id: None });
        }
        info!(count, "all wallets disconnected");
    }

    /// Remove one session, optionally only if it is still `generation`.
    async fn disconnect_session(&self, id: &str, generation: Option<u64>) -> bool {
        let (was_active, new_active) = {
            let mut store = self.inner.store.write().await;
            let current = store.get(id).map(Session::generation);
            if generation.is_some_and(|generation| current != Some(generation)) {
                return false;
            }
            let was_active = store.active_id() == Some(id);
            let Some(mut session) = store.remove(id) else {
                debug!(wallet = %id, "disconnect for unknown wallet ignored");
                return false;
            };
            session.teardown();
            (was_active, store.active_id().map(str::to_string))
        };

        if let Err(e) = self.inner.persisted.remove(id).await {
            warn!(wallet = %id, error = %e, "failed to forget disconnected wallet");
        }

        info!(wallet = %id, "wallet disconnected");
        self.emit(WalletEvent::Disconnected { id: id.to_string() });
        if was_active {
            self.emit(WalletEvent::ActiveChanged { id: new_active });
        }
        true
    }
}

/// Accept the chain id as a hex or decimal string, or as a JSON number.
fn chain_id_from(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => parse_chain_id(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

async fn fetch_balance(provider: &dyn Eip1193Provider, address: &str) -> Result<U256> {
    let raw = provider
        .request(methods::GET_BALANCE, vec![json!(address), json!("latest")])
        .await?;
    raw.as_str().and_then(parse_quantity).ok_or_else(|| {
        ConnectError::invalid_response(methods::GET_BALANCE, format!("not a quantity: {raw}"))
    })
}
