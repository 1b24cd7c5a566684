//! Signing and sending through the active wallet.

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use super::WalletManager;
use crate::error::{ConnectError, Result};
use crate::provider::{Eip1193Provider, methods};
use crate::types::{EthereumTransaction, TypedData};

impl WalletManager {
    /// The active wallet's provider and current account, if it is ready.
    async fn signer(&self) -> Result<(Arc<dyn Eip1193Provider>, String)> {
        let store = self.inner.store.read().await;
        let state = store
            .active()
            .map(|session| session.state())
            .filter(|state| state.is_ready())
            .ok_or(ConnectError::NotReady)?;

        match (&state.provider, state.address()) {
            (Some(provider), Some(address)) => Ok((Arc::clone(provider), address.to_string())),
            _ => Err(ConnectError::NotReady),
        }
    }

    /// Ask the active wallet to sign a plain message (`personal_sign`).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::NotReady`] if no connected wallet with an
    /// account is active, or the provider's rejection.
    pub async fn sign_message(&self, message: &str) -> Result<String> {
        let (provider, from) = self.signer().await?;
        debug!(%from, len = message.len(), "requesting message signature");
        let raw = provider
            .request(methods::PERSONAL_SIGN, vec![json!(message), json!(from)])
            .await?;
        expect_string(methods::PERSONAL_SIGN, raw)
    }

    /// Ask the active wallet to sign EIP-712 typed data (`eth_signTypedData_v4`).
    ///
    /// The payload is sent as a JSON string, as wallets expect for v4.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::NotReady`] if no connected wallet with an
    /// account is active, or the provider's rejection.
    pub async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<String> {
        let (provider, from) = self.signer().await?;
        let payload = serde_json::to_string(typed_data)?;
        debug!(%from, primary_type = %typed_data.primary_type, "requesting typed data signature");
        let raw = provider
            .request(methods::SIGN_TYPED_DATA_V4, vec![json!(from), json!(payload)])
            .await?;
        expect_string(methods::SIGN_TYPED_DATA_V4, raw)
    }

    /// Ask the active wallet to send a transaction.
    ///
    /// `from` is always the active account, whatever the caller set.
    /// Returns the transaction hash.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::NotReady`] if no connected wallet with an
    /// account is active, or the provider's rejection.
    pub async fn send_transaction(&self, mut transaction: EthereumTransaction) -> Result<String> {
        let (provider, from) = self.signer().await?;
        transaction.from = Some(from);
        let params = serde_json::to_value(&transaction)?;
        let raw = provider
            .request(methods::SEND_TRANSACTION, vec![params])
            .await?;
        let hash = expect_string(methods::SEND_TRANSACTION, raw)?;
        info!(tx_hash = %hash, "transaction submitted");
        Ok(hash)
    }
}

fn expect_string(method: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ConnectError::invalid_response(
            method,
            format!("expected a string, got {other}"),
        )),
    }
}
