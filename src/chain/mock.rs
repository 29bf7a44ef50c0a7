//! Scripted in-process chain for tests and dry runs.
//!
//! Signatures are really verified: `attach_signature` checks the DER
//! signature against the public key that built the unsigned envelope, so a
//! forge wired to this mock exercises the full signing path.

use super::error::RpcError;
use super::{ChainRpc, TxResult, TxStatus};
use crate::forge::signer;
use crate::money::Money;
use crate::network::Currency;
use async_trait::async_trait;
use secp256k1::{PublicKey, ecdsa::Signature};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A transaction accepted by [`MockChainRpc::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub endpoint: String,
    pub tx_hash: String,
}

#[derive(Default)]
pub struct MockChainRpc {
    nonces: Mutex<HashMap<String, u64>>,
    /// unsigned envelope -> public key that requested it
    envelopes: Mutex<HashMap<String, String>>,
    submitted: Mutex<Vec<Submitted>>,
    /// Endpoints whose every submit fails with the given error
    broken_endpoints: Mutex<HashMap<String, RpcError>>,
    /// One-shot submit failures consumed in order
    transient_failures: Mutex<VecDeque<RpcError>>,
    statuses: Mutex<HashMap<String, TxResult>>,
    status_error: Mutex<Option<RpcError>>,
    status_limit: Mutex<Option<usize>>,
    balances: Mutex<HashMap<String, Money>>,
    balance_errors: Mutex<HashMap<String, RpcError>>,
    submit_count: AtomicUsize,
    status_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: &str, amount: Money) {
        guard(&self.balances).insert(address.to_ascii_lowercase(), amount);
    }

    pub fn fail_balance(&self, address: &str, error: RpcError) {
        guard(&self.balance_errors).insert(address.to_ascii_lowercase(), error);
    }

    /// Every submit to `endpoint` fails with `error`
    pub fn break_endpoint(&self, endpoint: &str, error: RpcError) {
        guard(&self.broken_endpoints).insert(endpoint.to_string(), error);
    }

    /// The next submit (to any endpoint) fails with `error`
    pub fn push_submit_failure(&self, error: RpcError) {
        guard(&self.transient_failures).push_back(error);
    }

    pub fn set_status(&self, tx_hash: &str, result: TxResult) {
        guard(&self.statuses).insert(tx_hash.to_string(), result);
    }

    pub fn set_status_error(&self, error: Option<RpcError>) {
        *guard(&self.status_error) = error;
    }

    /// Answer status queries with at most `limit` entries
    pub fn set_status_limit(&self, limit: Option<usize>) {
        *guard(&self.status_limit) = limit;
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        guard(&self.submitted).clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn verify(&self, unsigned: &str, signature: &str) -> Result<(), RpcError> {
        let public_key = guard(&self.envelopes)
            .get(unsigned)
            .cloned()
            .ok_or_else(|| RpcError::Graphql("unknown unsigned transaction".to_string()))?;
        let key = hex::decode(&public_key)
            .ok()
            .and_then(|raw| PublicKey::from_slice(&raw).ok())
            .ok_or_else(|| RpcError::Graphql("invalid public key".to_string()))?;
        let sig = hex::decode(signature)
            .ok()
            .and_then(|raw| Signature::from_der(&raw).ok())
            .ok_or_else(|| RpcError::Graphql("invalid signature encoding".to_string()))?;
        let message = signer::message_for(unsigned).map_err(|e| RpcError::Graphql(e.to_string()))?;
        signer::context()
            .verify_ecdsa(&message, &sig, &key)
            .map_err(|_| RpcError::Graphql("signature does not match".to_string()))
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn next_sequence(&self, _endpoint: &str, address: &str) -> Result<u64, RpcError> {
        let mut nonces = guard(&self.nonces);
        let slot = nonces.entry(address.to_ascii_lowercase()).or_default();
        let nonce = *slot;
        *slot += 1;
        Ok(nonce)
    }

    async fn build_unsigned(
        &self,
        _endpoint: &str,
        public_key: &str,
        action: &str,
        nonce: u64,
    ) -> Result<String, RpcError> {
        let unsigned = hex::encode(format!("{public_key}:{action}:{nonce}"));
        guard(&self.envelopes).insert(unsigned.clone(), public_key.to_string());
        Ok(unsigned)
    }

    async fn attach_signature(
        &self,
        _endpoint: &str,
        unsigned: &str,
        signature: &str,
    ) -> Result<String, RpcError> {
        self.verify(unsigned, signature)?;
        Ok(format!("{unsigned}{signature}"))
    }

    async fn submit(&self, endpoint: &str, payload: &str) -> Result<String, RpcError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = guard(&self.broken_endpoints).get(endpoint) {
            return Err(error.clone());
        }
        if let Some(error) = guard(&self.transient_failures).pop_front() {
            return Err(error);
        }

        let tx_hash = hex::encode(Sha256::digest(payload.as_bytes()));
        guard(&self.submitted).push(Submitted {
            endpoint: endpoint.to_string(),
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }

    async fn balance(
        &self,
        _endpoint: &str,
        address: &str,
        _currency: &Currency,
    ) -> Result<Money, RpcError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let key = address.to_ascii_lowercase();
        if let Some(error) = guard(&self.balance_errors).get(&key) {
            return Err(error.clone());
        }
        Ok(guard(&self.balances).get(&key).copied().unwrap_or(Money::ZERO))
    }

    async fn status_batch(
        &self,
        _endpoint: &str,
        tx_hashes: &[String],
    ) -> Result<Vec<TxResult>, RpcError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = guard(&self.status_error).clone() {
            return Err(error);
        }
        let statuses = guard(&self.statuses);
        let limit = guard(&self.status_limit).unwrap_or(tx_hashes.len());
        Ok(tx_hashes
            .iter()
            .take(limit)
            .map(|h| {
                statuses
                    .get(h)
                    .cloned()
                    .unwrap_or_else(|| TxResult::new(TxStatus::Staging))
            })
            .collect())
    }
}
