//! Account Module
//!
//! Probe accounts, their per-network ledger state, and the single-owner
//! pool that hands out sender/receiver pairs.
//!
//! ## Components
//! - `pool`: synchronous [`AccountPool`] (selection rules, balances, liveness)
//! - `actor`: tokio task owning the pool, reached through [`AccountPoolHandle`]
//! - `refresher`: periodic [`BalanceRefresher`]

pub mod actor;
pub mod pool;
pub mod refresher;

use crate::core_types::{AccountId, Address};
use crate::forge::SigningKey;
use crate::money::Money;
use std::sync::Arc;

pub use actor::{AccountPoolHandle, PoolError, spawn_pool};
pub use pool::AccountPool;
pub use refresher::{BalanceRefresher, RefreshReport};

/// Immutable identity of a probe account
#[derive(Debug)]
pub struct AccountIdentity {
    pub id: AccountId,
    pub name: String,
    pub address: Address,
    pub key: SigningKey,
}

/// Sender and receiver chosen for one dispatch; never the same account
#[derive(Debug, Clone)]
pub struct Pairing {
    pub sender: Arc<AccountIdentity>,
    pub receiver: Arc<AccountIdentity>,
}

/// How one dispatch ended, as far as the sender's liveness is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Transport or node-side failure observed at `endpoint`
    EndpointFailure { endpoint: String },
    /// Failure that follows the account to any endpoint (e.g. its key cannot sign)
    AccountFailure,
}

/// Read-only view of one account's state in one network group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountView {
    pub id: AccountId,
    pub address: Address,
    pub balance: Option<Money>,
    pub active: bool,
    pub failure_streak: u32,
    pub used_this_cycle: bool,
}
