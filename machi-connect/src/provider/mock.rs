//! Scripted in-process provider for tests and demos.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Eip1193Provider, Listener, ListenerId, ProviderEventKind};
use crate::error::ProviderError;

type Response = Result<Value, ProviderError>;

#[derive(Default)]
struct MockState {
    /// Answers used whenever no one-shot answer is queued.
    responses: HashMap<String, Response>,
    /// One-shot answers, consumed front to back.
    queued: HashMap<String, VecDeque<Response>>,
    delays: HashMap<String, Duration>,
    calls: Vec<(String, Vec<Value>)>,
    listeners: HashMap<ProviderEventKind, Vec<(ListenerId, Listener)>>,
}

/// A provider that answers from a script and records every call.
///
/// Methods without a scripted answer fail with code 4200
/// (unsupported method), like a real wallet would.
pub struct MockProvider {
    state: Mutex<MockState>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockProvider")
            .field("calls", &state.calls.len())
            .finish_non_exhaustive()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a provider with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Create a provider that behaves like an unlocked wallet.
    ///
    /// Answers account, chain, balance and fee history requests, and
    /// echoes deterministic values for the signing methods.
    #[must_use]
    pub fn wallet(accounts: &[&str], chain_id: &str) -> Self {
        let provider = Self::new();
        provider.respond("eth_requestAccounts", json!(accounts));
        provider.respond("eth_chainId", json!(chain_id));
        provider.respond("eth_getBalance", json!("0xde0b6b3a7640000"));
        provider.respond(
            "eth_feeHistory",
            json!({
                "oldestBlock": "0x10",
                "baseFeePerGas": ["0x3b9aca00", "0x3b9aca00"],
                "gasUsedRatio": [0.5],
                "reward": [["0x1", "0x59682f00", "0x77359400"]]
            }),
        );
        provider.respond("personal_sign", json!(format!("0x{}", "11".repeat(65))));
        provider.respond("eth_signTypedData_v4", json!(format!("0x{}", "22".repeat(65))));
        provider.respond("eth_sendTransaction", json!(format!("0x{}", "33".repeat(32))));
        provider
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `method` with `value` from now on.
    pub fn respond(&self, method: &str, value: Value) {
        self.lock().responses.insert(method.to_string(), Ok(value));
    }

    /// Reject `method` with `error` from now on.
    pub fn fail(&self, method: &str, error: ProviderError) {
        self.lock().responses.insert(method.to_string(), Err(error));
    }

    /// Answer the next call to `method` with `response`, then fall back to the script.
    pub fn respond_once(&self, method: &str, response: Result<Value, ProviderError>) {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Make calls to `method` take `delay` before answering.
    pub fn delay(&self, method: &str, delay: Duration) {
        self.lock().delays.insert(method.to_string(), delay);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.lock().calls.clone()
    }

    /// Parameters of every call to `method`, in order.
    #[must_use]
    pub fn calls_for(&self, method: &str) -> Vec<Vec<Value>> {
        self.lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: ProviderEventKind) -> usize {
        self.lock().listeners.get(&event).map_or(0, Vec::len)
    }

    /// Push an event to every registered listener.
    pub fn emit(&self, event: ProviderEventKind, payload: Value) {
        let listeners: Vec<Listener> = self
            .lock()
            .listeners
            .get(&event)
            .map(|registered| registered.iter().map(|(_, l)| Listener::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(&payload);
        }
    }
}

#[async_trait]
impl Eip1193Provider for MockProvider {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
        let (delay, response) = {
            let mut state = self.lock();
            state.calls.push((method.to_string(), params));
            let queued = state.queued.get_mut(method).and_then(VecDeque::pop_front);
            let response = queued.or_else(|| state.responses.get(method).cloned());
            (state.delays.get(method).copied(), response)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        response.unwrap_or_else(|| {
            Err(ProviderError::with_code(
                format!("The method \"{method}\" is not supported."),
                4200,
            ))
        })
    }

    fn on(&self, event: ProviderEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .listeners
            .entry(event)
            .or_default()
            .push((id, listener));
        id
    }

    fn remove_listener(&self, event: ProviderEventKind, id: ListenerId) {
        if let Some(registered) = self.lock().listeners.get_mut(&event) {
            registered.retain(|(existing, _)| *existing != id);
        }
    }
}
