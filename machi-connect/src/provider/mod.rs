//! The EIP-1193 provider contract.
//!
//! Wallet extensions expose an object with an async `request` method for
//! JSON-RPC calls and `on` / `removeListener` for push events. This module
//! models that contract as the [`Eip1193Provider`] trait and wraps listener
//! registration in a [`ListenerGuard`], so every listener attached at connect
//! time is detached exactly once.
//!
//! # Implementing a Custom Provider
//!
//! ```rust,ignore
//! use machi_connect::provider::{Eip1193Provider, Listener, ListenerId, ProviderEventKind};
//!
//! struct BridgeProvider { /* ... */ }
//!
//! #[async_trait::async_trait]
//! impl Eip1193Provider for BridgeProvider {
//!     async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
//!         self.bridge.call(method, params).await
//!     }
//!     fn on(&self, event: ProviderEventKind, listener: Listener) -> ListenerId { /* ... */ }
//!     fn remove_listener(&self, event: ProviderEventKind, id: ListenerId) { /* ... */ }
//! }
//! ```

mod mock;

pub use mock::MockProvider;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::ProviderError;

/// JSON-RPC method names used by the wallet manager.
pub mod methods {
    /// Prompt the user to expose accounts.
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    /// Current chain id as a hex quantity.
    pub const CHAIN_ID: &str = "eth_chainId";
    /// Balance of an account.
    pub const GET_BALANCE: &str = "eth_getBalance";
    /// Historical base fees and reward percentiles.
    pub const FEE_HISTORY: &str = "eth_feeHistory";
    /// EIP-191 message signature.
    pub const PERSONAL_SIGN: &str = "personal_sign";
    /// EIP-712 typed data signature.
    pub const SIGN_TYPED_DATA_V4: &str = "eth_signTypedData_v4";
    /// Sign and broadcast a transaction.
    pub const SEND_TRANSACTION: &str = "eth_sendTransaction";
}

/// Push events a provider emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    /// The exposed account list changed.
    AccountsChanged,
    /// The wallet switched networks.
    ChainChanged,
    /// A new block head was observed.
    Block,
}

impl ProviderEventKind {
    /// Every event the wallet manager subscribes to.
    pub const ALL: [Self; 3] = [Self::AccountsChanged, Self::ChainChanged, Self::Block];

    /// The event name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
            Self::Block => "block",
        }
    }
}

impl std::fmt::Display for ProviderEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// New account list; empty means the wallet revoked access.
    AccountsChanged(Vec<String>),
    /// New chain id as a hex quantity.
    ChainChanged(String),
    /// A new block head.
    Block,
}

impl ProviderEvent {
    /// Decode a raw event payload.
    ///
    /// Returns `None` if the payload does not have the expected shape.
    #[must_use]
    pub fn decode(kind: ProviderEventKind, payload: &Value) -> Option<Self> {
        match kind {
            ProviderEventKind::AccountsChanged => {
                serde_json::from_value(payload.clone()).ok().map(Self::AccountsChanged)
            }
            ProviderEventKind::ChainChanged => {
                payload.as_str().map(|chain| Self::ChainChanged(chain.to_string()))
            }
            ProviderEventKind::Block => Some(Self::Block),
        }
    }
}

/// A raw event callback.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one listener registration on a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// An injected wallet's request/event handle.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Issue a JSON-RPC request.
    ///
    /// # Errors
    ///
    /// Returns the provider's rejection, e.g. code 4001 when the user
    /// dismisses the prompt.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError>;

    /// Register a listener for a push event.
    fn on(&self, event: ProviderEventKind, listener: Listener) -> ListenerId;

    /// Remove a listener registered with [`on`](Self::on).
    fn remove_listener(&self, event: ProviderEventKind, id: ListenerId);
}

/// Listener registrations on one provider.
///
/// Created by [`attach`](Self::attach) and consumed by
/// [`detach`](Self::detach). Dropping the guard detaches as well, so a
/// registration can never outlive its guard.
#[must_use = "dropping the guard immediately detaches the listeners"]
pub struct ListenerGuard {
    provider: Arc<dyn Eip1193Provider>,
    registrations: Vec<(ProviderEventKind, ListenerId)>,
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

impl ListenerGuard {
    /// Subscribe `sink` to every [`ProviderEventKind`].
    ///
    /// Payloads that fail to decode are logged and dropped.
    pub fn attach<F>(provider: Arc<dyn Eip1193Provider>, sink: F) -> Self
    where
        F: Fn(ProviderEvent) + Send + Sync + 'static,
    {
        let sink = Arc::new(sink);
        let registrations = ProviderEventKind::ALL
            .into_iter()
            .map(|kind| {
                let sink = Arc::clone(&sink);
                let listener: Listener = Arc::new(move |payload: &Value| {
                    match ProviderEvent::decode(kind, payload) {
                        Some(event) => sink(event),
                        None => warn!(event = %kind, %payload, "ignoring malformed provider event"),
                    }
                });
                (kind, provider.on(kind, listener))
            })
            .collect();

        Self {
            provider,
            registrations,
        }
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether every registration has been removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Remove every registration from the provider.
    pub fn detach(mut self) {
        self.remove_all();
    }

    fn remove_all(&mut self) {
        for (kind, id) in self.registrations.drain(..) {
            trace!(event = %kind, id = id.0, "removing provider listener");
            self.provider.remove_listener(kind, id);
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.remove_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_decode_events() {
        assert_eq!(
            ProviderEvent::decode(ProviderEventKind::AccountsChanged, &json!(["0xAA"])),
            Some(ProviderEvent::AccountsChanged(vec!["0xAA".into()]))
        );
        assert_eq!(
            ProviderEvent::decode(ProviderEventKind::ChainChanged, &json!("0x89")),
            Some(ProviderEvent::ChainChanged("0x89".into()))
        );
        assert_eq!(
            ProviderEvent::decode(ProviderEventKind::Block, &json!({"number": "0x1"})),
            Some(ProviderEvent::Block)
        );
        assert_eq!(
            ProviderEvent::decode(ProviderEventKind::ChainChanged, &json!(137)),
            None
        );
        assert_eq!(
            ProviderEvent::decode(ProviderEventKind::AccountsChanged, &json!("0xAA")),
            None
        );
    }

    #[test]
    fn test_listener_guard_is_symmetric() {
        let provider = Arc::new(MockProvider::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let guard = ListenerGuard::attach(provider.clone(), move |event| {
            sink.lock().unwrap().push(event);
        });
        assert_eq!(guard.len(), 3);
        for kind in ProviderEventKind::ALL {
            assert_eq!(provider.listener_count(kind), 1);
        }

        provider.emit(ProviderEventKind::ChainChanged, json!("0x1"));
        provider.emit(ProviderEventKind::ChainChanged, json!(1));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProviderEvent::ChainChanged("0x1".into())]
        );

        guard.detach();
        for kind in ProviderEventKind::ALL {
            assert_eq!(provider.listener_count(kind), 0);
        }
    }

    #[test]
    fn test_listener_guard_detaches_on_drop() {
        let provider = Arc::new(MockProvider::new());
        {
            let _guard = ListenerGuard::attach(provider.clone(), |_| {});
            assert_eq!(provider.listener_count(ProviderEventKind::Block), 1);
        }
        assert_eq!(provider.listener_count(ProviderEventKind::Block), 0);
    }
}
