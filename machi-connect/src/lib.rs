//! Machi Connect - multi-wallet discovery and connection management.
//!
//! This crate discovers injected Ethereum wallets through EIP-6963
//! announcements, connects any number of them at once over EIP-1193, keeps
//! their accounts, chain, balance and fee estimates current, and remembers
//! which wallets to reconnect on the next load.
//!
//! # Architecture
//!
//! - **Manager** ([`manager`]) - Connect/disconnect orchestration and the state surface
//! - **Discovery** ([`discovery`]) - Announcement bus and the search window
//! - **Provider** ([`provider`]) - The EIP-1193 request/event interface
//! - **Session** ([`session`]) - Per-wallet state, gas poller and listeners
//! - **Gas** ([`gas`]) - `eth_feeHistory` estimation and the polling loop
//! - **Storage** ([`storage`]) - Key-value persistence of the auto-reconnect set
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use machi_connect::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = Arc::new(LocalAnnouncementBus::new());
//!     let manager = WalletManager::builder().announcement_bus(bus).build();
//!     let _discovery = manager.listen_to_provider_events()?;
//!
//!     if let Some(wallet) = manager.available_wallets().await.into_iter().next() {
//!         manager.connect(wallet).await;
//!     }
//!     let signature = manager.sign_message("hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `demo` - Build the `machi-connect-demo` binary

// Core modules
pub mod discovery;
pub mod error;
pub mod events;
pub mod manager;
pub mod provider;
pub mod session;
pub mod storage;
pub mod types;

// Supporting modules
pub mod chain;
pub mod config;
pub mod gas;
pub mod registry;
pub mod utils;

pub use error::{ConnectError, Result};
pub use manager::{ConnectOutcome, DisconnectTarget, WalletManager, WalletManagerBuilder};

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types (centralized)
    pub use crate::error::{
        ConnectError, ProviderError, Result, StorageError, StorageResult, WalletError,
    };

    // Manager
    pub use crate::manager::{ConnectOutcome, DisconnectTarget, WalletManager, WalletManagerBuilder};

    // Discovery
    pub use crate::discovery::{AnnouncementBus, DiscoveryHandle, LocalAnnouncementBus};
    pub use crate::registry::ProviderRegistry;

    // Provider
    pub use crate::provider::{
        Eip1193Provider, Listener, ListenerGuard, ListenerId, MockProvider, ProviderEvent,
        ProviderEventKind,
    };

    // Session
    pub use crate::session::{Session, SessionStore, WalletState};

    // Storage
    pub use crate::storage::{ConnectedWallets, FileStorage, KeyValueStorage, MemoryStorage};

    // Types
    pub use crate::types::{
        EthereumTransaction, GasEstimates, PriorityFees, ProviderDetail, ProviderInfo, TypedData,
        TypedDataDomain, TypedDataField,
    };

    // Config, events and gas
    pub use crate::config::ConnectConfig;
    pub use crate::events::WalletEvent;
    pub use crate::gas::{GasEstimator, GasPollerHandle};

    // Utilities
    pub use crate::chain::{ChainInfo, chain_info};
    pub use crate::utils::{format_balance, format_eth, format_gwei, shorten, to_hex};

    pub use std::sync::Arc;
}
