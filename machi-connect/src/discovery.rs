//! EIP-6963 discovery plumbing.
//!
//! In a browser, wallets announce themselves with an `eip6963:announceProvider`
//! window event and re-announce whenever the page dispatches
//! `eip6963:requestProvider`. [`AnnouncementBus`] is that broadcast medium;
//! [`LocalAnnouncementBus`] is an in-process implementation that wallets (or
//! tests) register with directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::types::ProviderDetail;

/// Default capacity for the announcement channel.
const DEFAULT_ANNOUNCE_CAPACITY: usize = 64;

/// The announce/request broadcast medium.
pub trait AnnouncementBus: Send + Sync {
    /// Subscribe to provider announcements.
    fn subscribe(&self) -> broadcast::Receiver<ProviderDetail>;

    /// Ask every wallet to (re-)announce itself.
    fn request_providers(&self);
}

/// In-process announcement bus.
///
/// Registered wallets announce once on registration and again on every
/// provider request, matching the EIP-6963 handshake.
#[derive(Debug)]
pub struct LocalAnnouncementBus {
    announce_tx: broadcast::Sender<ProviderDetail>,
    wallets: Mutex<Vec<ProviderDetail>>,
}

impl Default for LocalAnnouncementBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAnnouncementBus {
    /// Create a new bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ANNOUNCE_CAPACITY)
    }

    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (announce_tx, _) = broadcast::channel(capacity);
        Self {
            announce_tx,
            wallets: Mutex::new(Vec::new()),
        }
    }

    /// Register a wallet and announce it immediately.
    pub fn register(&self, detail: ProviderDetail) {
        debug!(rdns = %detail.info.rdns, uuid = %detail.info.uuid, "wallet registered on bus");
        self.wallets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(detail.clone());
        self.announce(detail);
    }

    /// Broadcast a single announcement.
    pub fn announce(&self, detail: ProviderDetail) {
        trace!(rdns = %detail.info.rdns, "announcing provider");
        // No subscribers is fine: nobody is listening yet.
        let _ = self.announce_tx.send(detail);
    }
}

impl AnnouncementBus for LocalAnnouncementBus {
    fn subscribe(&self) -> broadcast::Receiver<ProviderDetail> {
        self.announce_tx.subscribe()
    }

    fn request_providers(&self) {
        let wallets = self
            .wallets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        trace!(count = wallets.len(), "provider request received");
        for detail in wallets {
            self.announce(detail);
        }
    }
}

/// Handle for an active discovery listener.
///
/// [`stop`](Self::stop) removes the announcement listener, cancels the
/// search timer and clears the searching flag. An announcement already being
/// handled is allowed to finish. Dropping the handle stops it as well.
#[derive(Debug)]
pub struct DiscoveryHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    listener: JoinHandle<()>,
    search_timer: JoinHandle<()>,
    searching: Arc<AtomicBool>,
}

impl DiscoveryHandle {
    pub(crate) const fn new(
        shutdown_tx: oneshot::Sender<()>,
        listener: JoinHandle<()>,
        search_timer: JoinHandle<()>,
        searching: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shutdown_tx: Some(shutdown_tx),
            listener,
            search_timer,
            searching,
        }
    }

    /// Stop listening for announcements.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Whether the announcement listener has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.listener.is_finished()
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            self.search_timer.abort();
            self.searching.store(false, Ordering::Release);
            debug!("discovery stopped");
        }
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
