//! The wallet manager.
//!
//! [`WalletManager`] is the single owner of discovery state, the session
//! store and the auto-reconnect set. It is cheap to clone; every clone
//! shares the same state.
//!
//! # Architecture
//!
//! ```text
//! WalletManager (Arc<Shared>)
//!   ├── listen_to_provider_events() → AnnouncementBus → announce()
//!   ├── connect()        → handshake → Session { poller, listeners }
//!   ├── provider events  → per-session pump → accounts/chain/block handlers
//!   ├── disconnect()     → teardown → SessionStore::remove → storage
//!   └── sign_message() / sign_typed_data() / send_transaction()
//! ```
//!
//! All state lives behind one lock that is never held across a provider or
//! storage request, so no operation observes another one mid-mutation.
//! Background work (gas polling, event pumps) holds only a weak reference
//! and re-checks the session generation before every write.

mod connect;
mod signing;
#[cfg(test)]
mod tests;

pub use connect::{ConnectOutcome, DisconnectTarget};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::ConnectConfig;
use crate::discovery::{AnnouncementBus, DiscoveryHandle};
use crate::error::{ConnectError, Result};
use crate::events::WalletEvent;
use crate::gas::GasEstimator;
use crate::registry::ProviderRegistry;
use crate::session::{SessionStore, WalletState};
use crate::storage::{ConnectedWallets, KeyValueStorage, MemoryStorage};
use crate::types::ProviderDetail;

struct Shared {
    config: ConnectConfig,
    store: RwLock<SessionStore>,
    registry: RwLock<ProviderRegistry>,
    persisted: ConnectedWallets,
    bus: Option<Arc<dyn AnnouncementBus>>,
    gas: GasEstimator,
    /// Claimed for the duration of one connect attempt, across all wallets.
    connecting: AtomicBool,
    searching: Arc<AtomicBool>,
    events: broadcast::Sender<WalletEvent>,
}

/// Builder for constructing a [`WalletManager`].
///
/// Created by [`WalletManager::builder`].
///
/// # Examples
///
/// ```rust,ignore
/// let manager = WalletManager::builder()
///     .storage(FileStorage::new("./state"))
///     .announcement_bus(bus)
///     .build();
/// ```
#[derive(Default)]
pub struct WalletManagerBuilder {
    config: Option<ConnectConfig>,
    storage: Option<Arc<dyn KeyValueStorage>>,
    bus: Option<Arc<dyn AnnouncementBus>>,
}

impl std::fmt::Debug for WalletManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManagerBuilder")
            .field("config", &self.config)
            .field("has_storage", &self.storage.is_some())
            .field("has_bus", &self.bus.is_some())
            .finish()
    }
}

impl WalletManagerBuilder {
    /// Set the manager config.
    #[must_use]
    pub fn config(mut self, config: ConnectConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the persistence backend (default: [`MemoryStorage`]).
    #[must_use]
    pub fn storage(mut self, storage: impl KeyValueStorage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Set a persistence backend that is shared with other owners.
    #[must_use]
    pub fn shared_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the discovery medium. Without one, discovery is unsupported.
    #[must_use]
    pub fn announcement_bus(mut self, bus: Arc<dyn AnnouncementBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the [`WalletManager`].
    #[must_use]
    pub fn build(self) -> WalletManager {
        let config = self.config.unwrap_or_default();
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        WalletManager {
            inner: Arc::new(Shared {
                persisted: ConnectedWallets::new(storage, config.storage_key.clone()),
                gas: GasEstimator::from_config(&config),
                config,
                store: RwLock::new(SessionStore::new()),
                registry: RwLock::new(ProviderRegistry::new()),
                bus: self.bus,
                connecting: AtomicBool::new(false),
                searching: Arc::new(AtomicBool::new(false)),
                events,
            }),
        }
    }
}

/// Discovers, connects and tracks any number of injected wallets.
#[derive(Clone)]
pub struct WalletManager {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("config", &self.inner.config)
            .field("connecting", &self.is_connecting())
            .field("searching", &self.is_searching())
            .finish_non_exhaustive()
    }
}

impl Default for WalletManager {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WalletManager {
    /// Create a builder for constructing a [`WalletManager`].
    #[must_use]
    pub fn builder() -> WalletManagerBuilder {
        WalletManagerBuilder::default()
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn emit(&self, event: WalletEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Subscribe to state change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.inner.events.subscribe()
    }

    /// The manager config.
    #[must_use]
    pub fn config(&self) -> &ConnectConfig {
        &self.inner.config
    }

    /// The persisted auto-reconnect set.
    #[must_use]
    pub fn persisted_wallets(&self) -> &ConnectedWallets {
        &self.inner.persisted
    }

    /// Whether a connect attempt is in flight.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::Acquire)
    }

    /// Whether discovery is inside its search window.
    #[must_use]
    pub fn is_searching(&self) -> bool {
        self.inner.searching.load(Ordering::Acquire)
    }

    // ========================================================================
    // State surface
    // ========================================================================

    /// The active wallet, or an empty state if none is active.
    pub async fn active_wallet(&self) -> WalletState {
        self.inner
            .store
            .read()
            .await
            .active()
            .map(|session| session.state().clone())
            .unwrap_or_default()
    }

    /// The active wallet id.
    pub async fn active_wallet_id(&self) -> Option<String> {
        self.inner.store.read().await.active_id().map(str::to_string)
    }

    /// A wallet's state by id.
    pub async fn wallet(&self, id: &str) -> Option<WalletState> {
        self.inner
            .store
            .read()
            .await
            .get(id)
            .map(|session| session.state().clone())
    }

    /// Every session's state, in connect order.
    pub async fn wallets(&self) -> Vec<WalletState> {
        self.inner
            .store
            .read()
            .await
            .iter()
            .map(|session| session.state().clone())
            .collect()
    }

    /// Ids of every session, in connect order.
    pub async fn connected_wallet_ids(&self) -> Vec<String> {
        self.inner.store.read().await.ids().to_vec()
    }

    /// Make `id` the active wallet.
    ///
    /// Returns `false` if there is no session for `id`.
    pub async fn switch_wallet(&self, id: &str) -> bool {
        let switched = self.inner.store.write().await.set_active(id);
        if switched {
            debug!(wallet = %id, "active wallet switched");
            self.emit(WalletEvent::ActiveChanged {
                id: Some(id.to_string()),
            });
        }
        switched
    }

    /// Every wallet announced so far.
    pub async fn available_wallets(&self) -> Vec<ProviderDetail> {
        self.inner.registry.read().await.list().to_vec()
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Handle a provider announcement.
    ///
    /// Adds the wallet to the registry unless its `uuid` is known, and
    /// reconnects it if it was connected before and has no session yet.
    ///
    /// A wallet that already has a session is left alone: connecting it
    /// again would only make it active, and wallets re-announce whenever
    /// discovery is requested, so that would override the user's last
    /// [`switch_wallet`](Self::switch_wallet) or [`connect`](Self::connect).
    /// Use [`reconnect`](Self::reconnect) to bring a known wallet back
    /// explicitly.
    pub async fn announce(&self, detail: ProviderDetail) {
        let added = self.inner.registry.write().await.announce(detail.clone());
        if added {
            debug!(wallet = %detail.info.rdns, uuid = %detail.info.uuid, "wallet discovered");
            self.emit(WalletEvent::Discovered {
                uuid: detail.info.uuid.clone(),
                rdns: detail.info.rdns.clone(),
            });
        }

        if self.inner.store.read().await.contains(detail.rdns()) {
            return;
        }

        match self.inner.persisted.contains(detail.rdns()).await {
            Ok(true) => {
                info!(wallet = %detail.info.rdns, "reconnecting previously connected wallet");
                self.connect(detail).await;
            }
            Ok(false) => {}
            Err(e) => warn!(
                wallet = %detail.info.rdns,
                error = %e,
                "failed to read connected wallets, skipping auto-reconnect",
            ),
        }
    }

    /// Connect the first announced wallet with this identity.
    ///
    /// Returns `None` when no wallet with `rdns` has been announced yet.
    pub async fn reconnect(&self, rdns: &str) -> Option<ConnectOutcome> {
        let detail = self.inner.registry.read().await.find_by_rdns(rdns).cloned();
        let Some(detail) = detail else {
            debug!(wallet = rdns, "reconnect requested for unknown wallet");
            return None;
        };
        Some(self.connect(detail).await)
    }

    /// Start listening for wallet announcements and ask wallets to announce.
    ///
    /// [`is_searching`](Self::is_searching) reports `true` for the configured
    /// search window. Announcements are handled one at a time, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::UnsupportedEnvironment`] if the manager was
    /// built without an announcement bus.
    pub fn listen_to_provider_events(&self) -> Result<DiscoveryHandle> {
        let bus = self
            .inner
            .bus
            .clone()
            .ok_or(ConnectError::UnsupportedEnvironment)?;

        let mut announcements = bus.subscribe();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        self.inner.searching.store(true, Ordering::Release);
        info!("listening for wallet announcements");

        let weak = self.downgrade();
        let listener = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    received = announcements.recv() => received,
                };
                let detail = match received {
                    Ok(detail) => detail,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed wallet announcements");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = Self::from_weak(&weak) else {
                    break;
                };
                manager.announce(detail).await;
            }
            debug!("announcement listener stopped");
        });

        let searching = Arc::clone(&self.inner.searching);
        let window = self.inner.config.search_window();
        let search_timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            searching.store(false, Ordering::Release);
            debug!("wallet search window closed");
        });

        bus.request_providers();

        Ok(DiscoveryHandle::new(
            shutdown_tx,
            listener,
            search_timer,
            Arc::clone(&self.inner.searching),
        ))
    }

    /// Tear down every session without forgetting them.
    ///
    /// Pollers and listeners are released, but the auto-reconnect set is
    /// left intact so the wallets come back on the next load.
    pub async fn shutdown(&self) {
        let sessions = self.inner.store.write().await.drain();
        let count = sessions.len();
        for mut session in sessions {
            session.teardown();
        }
        if count > 0 {
            self.emit(WalletEvent::ActiveChanged { id: None });
        }
        info!(count, "wallet manager shut down");
    }
}
