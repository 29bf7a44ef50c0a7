//! Chain Access Module
//!
//! Narrow interfaces to the external collaborators the engine consumes:
//! - [`ChainRpc`]: per-endpoint transaction and state calls
//! - [`EndpointDirectory`]: which nodes exist for a network group
//!
//! Every `ChainRpc` method takes the endpoint URL explicitly, so one client
//! (and one keep-alive connection pool) serves every node of both networks.

pub mod directory;
pub mod error;
pub mod graphql;
#[cfg(feature = "mock-rpc")]
pub mod mock;

use async_trait::async_trait;
use std::fmt;

use crate::money::Money;
use crate::network::{Currency, NetworkGroup};

pub use directory::{EndpointDirectory, PlanetDirectory, StaticDirectory};
pub use error::{ErrorCause, RpcError};
pub use graphql::{GraphqlChainRpc, RpcTimeouts};
#[cfg(feature = "mock-rpc")]
pub use mock::MockChainRpc;

/// A node of a monitored network
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub url: String,
    pub group: NetworkGroup,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, group: NetworkGroup) -> Self {
        Self {
            url: url.into(),
            group,
        }
    }
}

/// Transaction status as reported by a checking node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Staging,
    Included,
    Invalid,
    Failure,
    /// Any value this engine does not recognize
    Other(String),
}

impl TxStatus {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "SUCCESS" => TxStatus::Success,
            "STAGING" => TxStatus::Staging,
            "INCLUDED" => TxStatus::Included,
            "INVALID" => TxStatus::Invalid,
            "FAILURE" => TxStatus::Failure,
            other => TxStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TxStatus::Success => "SUCCESS",
            TxStatus::Staging => "STAGING",
            TxStatus::Included => "INCLUDED",
            TxStatus::Invalid => "INVALID",
            TxStatus::Failure => "FAILURE",
            TxStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a batched status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub status: TxStatus,
    /// Exception names reported by the chain (empty unless rejected)
    pub exceptions: Vec<String>,
}

impl TxResult {
    pub fn new(status: TxStatus) -> Self {
        Self {
            status,
            exceptions: Vec::new(),
        }
    }
}

/// Chain RPC calls used by dispatch, reconciliation and balance refresh
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Next sequence number (nonce) for `address`
    async fn next_sequence(&self, endpoint: &str, address: &str) -> Result<u64, RpcError>;

    /// Build the unsigned transaction envelope (hex) for an encoded action
    async fn build_unsigned(
        &self,
        endpoint: &str,
        public_key: &str,
        action: &str,
        nonce: u64,
    ) -> Result<String, RpcError>;

    /// Attach a hex signature to an unsigned envelope, returning the stageable payload
    async fn attach_signature(
        &self,
        endpoint: &str,
        unsigned: &str,
        signature: &str,
    ) -> Result<String, RpcError>;

    /// Stage the payload for inclusion, returning the transaction hash
    async fn submit(&self, endpoint: &str, payload: &str) -> Result<String, RpcError>;

    async fn balance(
        &self,
        endpoint: &str,
        address: &str,
        currency: &Currency,
    ) -> Result<Money, RpcError>;

    /// Statuses in the same order as `tx_hashes`
    async fn status_batch(
        &self,
        endpoint: &str,
        tx_hashes: &[String],
    ) -> Result<Vec<TxResult>, RpcError>;
}
