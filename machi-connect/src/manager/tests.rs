use alloy::primitives::U256;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

use super::*;
use crate::discovery::LocalAnnouncementBus;
use crate::error::{ConnectError, ProviderError};
use crate::provider::{MockProvider, ProviderEventKind};
use crate::error::StorageResult;
use crate::storage::MemoryStorage;
use crate::types::{EthereumTransaction, GasEstimates, ProviderInfo, TypedData, TypedDataField};

const A: &str = "io.test.a";
const B: &str = "io.test.b";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn detail(rdns: &str, provider: &Arc<MockProvider>) -> ProviderDetail {
    ProviderDetail::new(
        ProviderInfo::new(format!("uuid-{rdns}"), rdns, "data:,", rdns),
        Arc::clone(provider) as Arc<dyn crate::provider::Eip1193Provider>,
    )
}

fn wallet(address: &str, chain: &str) -> Arc<MockProvider> {
    Arc::new(MockProvider::wallet(&[address], chain))
}

fn manager_with(storage: &Arc<MemoryStorage>) -> WalletManager {
    WalletManager::builder()
        .shared_storage(Arc::clone(storage) as Arc<dyn KeyValueStorage>)
        .build()
}

/// Memory storage whose reads take a while, so overlapping updates interleave.
#[derive(Debug, Default)]
struct SlowStorage {
    inner: MemoryStorage,
}

#[async_trait::async_trait]
impl KeyValueStorage for SlowStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key).await
    }
}

async fn wait_for(
    rx: &mut broadcast::Receiver<WalletEvent>,
    matches: impl Fn(&WalletEvent) -> bool,
) -> WalletEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for wallet event")
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_success() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager_with(&storage);
    let provider = wallet("0xAA", "0x1");

    let outcome = manager.connect(detail(A, &provider)).await;
    assert_eq!(outcome, ConnectOutcome::Connected);
    assert!(!manager.is_connecting());

    let active = manager.active_wallet().await;
    assert_eq!(active.id(), A);
    assert!(active.is_connected);
    assert!(active.error.is_none());
    assert_eq!(active.addresses, ["0xAA"]);
    assert_eq!(active.chain_id, 1);
    assert_eq!(active.chain().name, "Ethereum Mainnet");
    assert_eq!(active.balance, U256::from(1_000_000_000_000_000_000_u128));
    assert_eq!(active.gas.base_fee, 1_000_000_000);

    assert_eq!(manager.persisted_wallets().load().await.unwrap(), [A]);
    assert_eq!(
        storage.get("connectedWallets").await.unwrap().as_deref(),
        Some(r#"["io.test.a"]"#)
    );
    for kind in ProviderEventKind::ALL {
        assert_eq!(provider.listener_count(kind), 1);
    }

    let store = manager.inner.store.read().await;
    let session = store.get(A).unwrap();
    assert!(session.is_polling());
    assert!(session.has_listeners());
}

#[tokio::test]
async fn test_connect_rejected_keeps_errored_session() {
    let manager = WalletManager::default();
    let provider = Arc::new(MockProvider::new());
    provider.fail("eth_requestAccounts", ProviderError::user_rejected());

    let outcome = manager.connect(detail(A, &provider)).await;
    let ConnectOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.code, Some(4001));

    let active = manager.active_wallet().await;
    assert_eq!(active.id(), A);
    assert!(!active.is_connected);
    assert_eq!(active.error, Some(error));
    assert!(manager.persisted_wallets().load().await.unwrap().is_empty());
    assert_eq!(provider.listener_count(ProviderEventKind::AccountsChanged), 0);
    assert!(!manager.is_connecting());
}

#[tokio::test]
async fn test_connect_without_accounts_fails() {
    let manager = WalletManager::default();
    let provider = Arc::new(MockProvider::wallet(&[], "0x1"));

    let outcome = manager.connect(detail(A, &provider)).await;
    let ConnectOutcome::Failed(error) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error.message, "No accounts found in the selected wallet.");
    assert!(provider.calls_for("eth_chainId").is_empty());
}

#[tokio::test]
async fn test_connect_survives_initial_gas_failure() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    provider.fail("eth_feeHistory", ProviderError::new("not supported"));

    assert_eq!(
        manager.connect(detail(A, &provider)).await,
        ConnectOutcome::Connected
    );
    assert_eq!(manager.active_wallet().await.gas, GasEstimates::default());
}

#[tokio::test]
async fn test_connect_existing_session_switches() {
    let manager = WalletManager::default();
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x2105");

    manager.connect(detail(A, &a)).await;
    manager.connect(detail(B, &b)).await;
    assert_eq!(manager.active_wallet_id().await.as_deref(), Some(B));
    assert_eq!(manager.connected_wallet_ids().await, [A, B]);

    assert_eq!(manager.connect(detail(A, &a)).await, ConnectOutcome::Switched);
    assert_eq!(manager.active_wallet_id().await.as_deref(), Some(A));
    assert_eq!(a.calls_for("eth_requestAccounts").len(), 1);
    assert_eq!(manager.wallets().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connect_is_busy() {
    let manager = WalletManager::default();
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x1");
    a.delay("eth_requestAccounts", Duration::from_secs(1));

    let first = tokio::spawn({
        let manager = manager.clone();
        let detail = detail(A, &a);
        async move { manager.connect(detail).await }
    });
    while !manager.is_connecting() {
        tokio::task::yield_now().await;
    }

    assert_eq!(manager.connect(detail(B, &b)).await, ConnectOutcome::Busy);
    assert!(b.calls().is_empty());
    assert!(manager.wallet(B).await.is_none());

    // The in-flight session is visible while connecting.
    assert!(manager.wallet(A).await.unwrap().is_connecting());

    assert_eq!(first.await.unwrap(), ConnectOutcome::Connected);
    assert!(!manager.is_connecting());
    assert_eq!(manager.connect(detail(B, &b)).await, ConnectOutcome::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_connect_cancels() {
    let manager = WalletManager::default();
    let mut events = manager.subscribe();
    let provider = wallet("0xAA", "0x1");
    provider.delay("eth_getBalance", Duration::from_secs(1));

    let pending = tokio::spawn({
        let manager = manager.clone();
        let detail = detail(A, &provider);
        async move { manager.connect(detail).await }
    });
    wait_for(&mut events, |e| matches!(e, WalletEvent::Connecting { .. })).await;

    manager.disconnect(A).await;
    assert_eq!(pending.await.unwrap(), ConnectOutcome::Cancelled);

    assert!(manager.wallet(A).await.is_none());
    assert!(manager.active_wallet_id().await.is_none());
    assert!(manager.persisted_wallets().load().await.unwrap().is_empty());
    assert_eq!(provider.listener_count(ProviderEventKind::Block), 0);
}

// ============================================================================
// Provider events
// ============================================================================

#[tokio::test]
async fn test_empty_accounts_disconnects_and_repicks_active() {
    let manager = WalletManager::default();
    let mut events = manager.subscribe();
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x1");
    manager.connect(detail(A, &a)).await;
    manager.connect(detail(B, &b)).await;

    b.emit(ProviderEventKind::AccountsChanged, json!([]));
    wait_for(&mut events, |e| *e == WalletEvent::Disconnected { id: B.into() }).await;

    assert_eq!(manager.active_wallet_id().await.as_deref(), Some(A));
    assert_eq!(manager.connected_wallet_ids().await, [A]);
    assert_eq!(manager.persisted_wallets().load().await.unwrap(), [A]);
    assert_eq!(b.listener_count(ProviderEventKind::AccountsChanged), 0);
}

#[tokio::test]
async fn test_accounts_changed_refreshes_balance() {
    let manager = WalletManager::default();
    let mut events = manager.subscribe();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    provider.respond("eth_getBalance", json!("0x2"));
    provider.emit(ProviderEventKind::AccountsChanged, json!(["0xBB", "0xAA"]));
    wait_for(&mut events, |e| matches!(e, WalletEvent::BalanceUpdated { .. })).await;

    let state = manager.wallet(A).await.unwrap();
    assert_eq!(state.addresses, ["0xBB", "0xAA"]);
    assert_eq!(state.balance, U256::from(2));
    let last = provider.calls_for("eth_getBalance").pop().unwrap();
    assert_eq!(last, [json!("0xBB"), json!("latest")]);
}

#[tokio::test]
async fn test_chain_changed_updates_chain_and_balance() {
    let manager = WalletManager::default();
    let mut events = manager.subscribe();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;
    assert_eq!(manager.active_wallet().await.chain_id, 1);

    provider.emit(ProviderEventKind::ChainChanged, json!("0x89"));
    let event = wait_for(&mut events, |e| matches!(e, WalletEvent::ChainChanged { .. })).await;
    assert_eq!(
        event,
        WalletEvent::ChainChanged {
            id: A.into(),
            chain_id: 137
        }
    );
    wait_for(&mut events, |e| matches!(e, WalletEvent::BalanceUpdated { .. })).await;

    assert_eq!(manager.active_wallet().await.chain_id, 137);
    let balance_calls = provider.calls_for("eth_getBalance");
    assert_eq!(balance_calls.len(), 2);
    assert_eq!(balance_calls[1][0], json!("0xAA"));
}

#[tokio::test]
async fn test_public_event_handlers() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    manager.chain_changed(A, "0x2105").await;
    assert_eq!(manager.active_wallet().await.chain_id, 8453);

    manager.chain_changed(A, "not a chain").await;
    assert_eq!(manager.active_wallet().await.chain_id, 8453);

    // Unknown ids are ignored.
    manager.accounts_changed("io.test.missing", vec![]).await;
    manager.accounts_changed(A, vec![]).await;
    assert!(manager.wallet(A).await.is_none());
}

#[tokio::test]
async fn test_block_event_refreshes_gas() {
    let manager = WalletManager::default();
    let mut events = manager.subscribe();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    provider.respond("eth_feeHistory", json!({"baseFeePerGas": ["0x64"], "reward": [["0x1", "0x2", "0x3"]]}));
    provider.emit(ProviderEventKind::Block, json!("0x11"));
    wait_for(&mut events, |e| matches!(e, WalletEvent::GasUpdated { .. })).await;

    let gas = manager.active_wallet().await.gas;
    assert_eq!(gas.base_fee, 100);
    assert_eq!(gas.priority.fast, 3);
}

#[tokio::test]
async fn test_gas_failure_keeps_previous_estimate() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;
    let before = manager.active_wallet().await.gas;

    provider.fail("eth_feeHistory", ProviderError::new("rpc down"));
    manager.refresh_gas_fees(None).await;
    assert_eq!(manager.active_wallet().await.gas, before);

    provider.respond("eth_feeHistory", json!({"baseFeePerGas": ["0x2a"]}));
    manager.refresh_gas_fees(Some(A)).await;
    assert_eq!(manager.active_wallet().await.gas.base_fee, 42);
}

#[tokio::test(start_paused = true)]
async fn test_poller_stops_after_disconnect() {
    let manager = WalletManager::builder()
        .config(ConnectConfig::default().with_gas_poll_interval(Duration::from_secs(5)))
        .build();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;
    assert_eq!(provider.calls_for("eth_feeHistory").len(), 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(provider.calls_for("eth_feeHistory").len(), 3);

    manager.disconnect(DisconnectTarget::Active).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(provider.calls_for("eth_feeHistory").len(), 3);
}

#[tokio::test]
async fn test_listeners_are_symmetric_across_reconnect() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");

    for _ in 0..3 {
        manager.connect(detail(A, &provider)).await;
        for kind in ProviderEventKind::ALL {
            assert_eq!(provider.listener_count(kind), 1);
        }
        manager.disconnect(A).await;
        for kind in ProviderEventKind::ALL {
            assert_eq!(provider.listener_count(kind), 0);
        }
    }

    // Nothing is listening anymore.
    provider.emit(ProviderEventKind::AccountsChanged, json!([]));
    assert!(manager.wallets().await.is_empty());
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_all_clears_storage() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager_with(&storage);
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x1");
    manager.connect(detail(A, &a)).await;
    manager.connect(detail(B, &b)).await;

    manager.disconnect(DisconnectTarget::All).await;
    assert!(manager.wallets().await.is_empty());
    assert!(manager.active_wallet_id().await.is_none());
    assert_eq!(manager.active_wallet().await.addresses, Vec::<String>::new());
    assert!(storage.get("connectedWallets").await.unwrap().is_none());
    assert_eq!(a.listener_count(ProviderEventKind::Block), 0);
    assert_eq!(b.listener_count(ProviderEventKind::Block), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_disconnects_forget_both_wallets() {
    let storage = Arc::new(SlowStorage::default());
    let manager = WalletManager::builder()
        .shared_storage(Arc::clone(&storage) as Arc<dyn KeyValueStorage>)
        .build();
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x1");

    assert_eq!(manager.connect(detail(A, &a)).await, ConnectOutcome::Connected);
    assert_eq!(manager.connect(detail(B, &b)).await, ConnectOutcome::Connected);
    assert_eq!(manager.persisted_wallets().load().await.unwrap(), [A, B]);

    tokio::join!(manager.disconnect(A), manager.disconnect(B));

    assert!(manager.wallets().await.is_empty());
    assert!(manager.persisted_wallets().load().await.unwrap().is_empty());
    assert_eq!(storage.get("connectedWallets").await.unwrap(), None);
}

#[tokio::test]
async fn test_disconnect_unknown_is_noop() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    manager.disconnect("io.test.missing").await;
    assert_eq!(manager.active_wallet_id().await.as_deref(), Some(A));
    assert!(!manager.switch_wallet("io.test.missing").await);
}

#[tokio::test]
async fn test_shutdown_keeps_persisted_wallets() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    manager.shutdown().await;
    assert!(manager.wallets().await.is_empty());
    assert_eq!(provider.listener_count(ProviderEventKind::ChainChanged), 0);
    assert_eq!(manager.persisted_wallets().load().await.unwrap(), [A]);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_announce_dedups_and_reconnects_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set("connectedWallets", r#"["io.test.a"]"#)
        .await
        .unwrap();
    let manager = manager_with(&storage);
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x1");

    manager.announce(detail(A, &a)).await;
    manager.announce(detail(A, &a)).await;
    manager.announce(detail(B, &b)).await;

    assert_eq!(manager.available_wallets().await.len(), 2);
    assert_eq!(manager.connected_wallet_ids().await, [A]);
    assert!(manager.active_wallet().await.is_connected);
    assert_eq!(a.calls_for("eth_requestAccounts").len(), 1);
    assert!(b.calls().is_empty());
}

#[tokio::test]
async fn test_reannounce_keeps_active_wallet() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager_with(&storage);
    let a = wallet("0xAA", "0x1");
    let b = wallet("0xBB", "0x1");

    manager.announce(detail(A, &a)).await;
    manager.announce(detail(B, &b)).await;
    assert_eq!(manager.connect(detail(A, &a)).await, ConnectOutcome::Connected);
    assert_eq!(manager.connect(detail(B, &b)).await, ConnectOutcome::Connected);
    assert_eq!(manager.active_wallet_id().await.as_deref(), Some(B));

    manager.announce(detail(A, &a)).await;
    assert_eq!(manager.active_wallet_id().await.as_deref(), Some(B));
    assert_eq!(a.calls_for("eth_requestAccounts").len(), 1);
}

#[tokio::test]
async fn test_reconnect_by_rdns() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager_with(&storage);
    let a = wallet("0xAA", "0x1");

    assert!(manager.reconnect(A).await.is_none());

    manager.announce(detail(A, &a)).await;
    assert_eq!(manager.reconnect(A).await, Some(ConnectOutcome::Connected));
    assert_eq!(manager.connected_wallet_ids().await, [A]);

    manager.disconnect(A).await;
    assert!(manager.wallets().await.is_empty());
    assert_eq!(manager.reconnect(A).await, Some(ConnectOutcome::Connected));
    assert_eq!(a.calls_for("eth_requestAccounts").len(), 2);
    assert_eq!(manager.persisted_wallets().load().await.unwrap(), [A]);
}

#[tokio::test]
async fn test_listen_without_bus_is_unsupported() {
    let manager = WalletManager::default();
    let err = manager.listen_to_provider_events().unwrap_err();
    assert!(matches!(err, ConnectError::UnsupportedEnvironment));
    assert!(!manager.is_searching());
}

#[tokio::test(start_paused = true)]
async fn test_listen_discovers_and_closes_search_window() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set("connectedWallets", r#"["io.test.a"]"#)
        .await
        .unwrap();
    let bus = Arc::new(LocalAnnouncementBus::new());
    let manager = WalletManager::builder()
        .shared_storage(Arc::clone(&storage) as Arc<dyn KeyValueStorage>)
        .announcement_bus(Arc::clone(&bus) as Arc<dyn AnnouncementBus>)
        .build();
    let mut events = manager.subscribe();

    // Registered before anyone listens: reached through the provider request.
    let a = wallet("0xAA", "0x1");
    bus.register(detail(A, &a));

    let handle = manager.listen_to_provider_events().unwrap();
    assert!(manager.is_searching());
    wait_for(&mut events, |e| *e == WalletEvent::Connected { id: A.into() }).await;

    let b = wallet("0xBB", "0x1");
    bus.register(detail(B, &b));
    wait_for(&mut events, |e| matches!(e, WalletEvent::Discovered { rdns, .. } if rdns == B)).await;
    assert_eq!(manager.available_wallets().await.len(), 2);
    assert!(manager.wallet(B).await.is_none());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!manager.is_searching());

    handle.stop();
    tokio::task::yield_now().await;
    bus.register(detail("io.test.c", &wallet("0xCC", "0x1")));
    tokio::task::yield_now().await;
    assert_eq!(manager.available_wallets().await.len(), 2);
}

// ============================================================================
// Signing
// ============================================================================

#[tokio::test]
async fn test_signing_requires_ready_wallet() {
    let manager = WalletManager::default();
    assert!(matches!(
        manager.sign_message("hi").await,
        Err(ConnectError::NotReady)
    ));

    let provider = Arc::new(MockProvider::new());
    provider.fail("eth_requestAccounts", ProviderError::user_rejected());
    manager.connect(detail(A, &provider)).await;
    assert!(matches!(
        manager
            .send_transaction(EthereumTransaction::transfer("0xBB", U256::from(1)))
            .await,
        Err(ConnectError::NotReady)
    ));
}

#[tokio::test]
async fn test_sign_message() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    let signature = assert_ok!(manager.sign_message("hello").await);
    assert_eq!(signature, format!("0x{}", "11".repeat(65)));
    assert_eq!(
        provider.calls_for("personal_sign"),
        [vec![json!("hello"), json!("0xAA")]]
    );

    provider.fail("personal_sign", ProviderError::user_rejected());
    let err = assert_err!(manager.sign_message("hello").await);
    assert_eq!(err.code(), Some(4001));
}

#[tokio::test]
async fn test_sign_typed_data_sends_json_string() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    let mut typed = TypedData {
        primary_type: "Mail".into(),
        ..TypedData::default()
    };
    typed
        .types
        .insert("Mail".into(), vec![TypedDataField::new("contents", "string")]);
    typed.message.insert("contents".into(), json!("hi"));

    let signature = manager.sign_typed_data(&typed).await.unwrap();
    assert!(signature.starts_with("0x22"));

    let params = provider.calls_for("eth_signTypedData_v4").pop().unwrap();
    assert_eq!(params[0], json!("0xAA"));
    let payload: TypedData = serde_json::from_str(params[1].as_str().unwrap()).unwrap();
    assert_eq!(payload, typed);
}

#[tokio::test]
async fn test_send_transaction_sets_from() {
    let manager = WalletManager::default();
    let provider = wallet("0xAA", "0x1");
    manager.connect(detail(A, &provider)).await;

    let mut tx = EthereumTransaction::transfer("0xBB", U256::from(10));
    tx.from = Some("0xEVIL".into());
    let hash = assert_ok!(manager.send_transaction(tx).await);
    assert_eq!(hash, format!("0x{}", "33".repeat(32)));

    let params = provider.calls_for("eth_sendTransaction").pop().unwrap();
    assert_eq!(params[0]["from"], json!("0xAA"));
    assert_eq!(params[0]["to"], json!("0xBB"));
    assert_eq!(params[0]["value"], json!("0xa"));

    provider.respond("eth_sendTransaction", Value::Null);
    let err = manager
        .send_transaction(EthereumTransaction::transfer("0xBB", U256::from(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::InvalidResponse { .. }));
}
