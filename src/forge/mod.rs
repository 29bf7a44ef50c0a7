//! Transaction Forge
//!
//! Builds, signs and stages one transfer against one endpoint:
//!
//! ```text
//! action (bencodex) -> nextTxNonce -> unsignedTransaction
//!     -> sha256 + pad32 -> secp256k1 DER -> signTransaction -> stageTransaction
//! ```
//!
//! The forge performs a single attempt; retrying is the dispatcher's job.

pub mod action;
pub mod bencodex;
pub mod error;
pub mod signer;

use crate::account::AccountIdentity;
use crate::chain::{ChainRpc, Endpoint};
use crate::core_types::Address;
use crate::network::Networks;
use std::sync::Arc;
use tracing::debug;

pub use action::{TRANSFER_TYPE_ID, TransferAction};
pub use error::{ForgeError, SubmitStep};
pub use signer::SigningKey;

pub struct TransactionForge {
    rpc: Arc<dyn ChainRpc>,
    networks: Arc<Networks>,
    /// Transfer quantity in smallest units
    units: i64,
}

impl TransactionForge {
    pub fn new(rpc: Arc<dyn ChainRpc>, networks: Arc<Networks>, units: i64) -> Self {
        Self {
            rpc,
            networks,
            units,
        }
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn build_action(&self, endpoint: &Endpoint, sender: Address, recipient: Address) -> TransferAction {
        TransferAction {
            currency: self.networks.profile(endpoint.group).currency(),
            sender,
            recipient,
            units: self.units,
        }
    }

    /// Submit one transfer from `sender` to `recipient`, returning the tx hash
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        sender: &AccountIdentity,
        recipient: Address,
    ) -> Result<String, ForgeError> {
        let action = self.build_action(endpoint, sender.address, recipient).encode_hex();
        let url = endpoint.url.as_str();

        let nonce = self
            .rpc
            .next_sequence(url, &sender.address.to_string())
            .await
            .map_err(ForgeError::nonce)?;

        let unsigned = self
            .rpc
            .build_unsigned(url, sender.key.public_key_hex(), &action, nonce)
            .await
            .map_err(|e| ForgeError::submission(SubmitStep::BuildUnsigned, e))?;

        let signature = sender.key.sign_unsigned(&unsigned)?;

        let payload = self
            .rpc
            .attach_signature(url, &unsigned, &signature)
            .await
            .map_err(|e| ForgeError::submission(SubmitStep::AttachSignature, e))?;

        let tx_hash = self
            .rpc
            .submit(url, &payload)
            .await
            .map_err(|e| ForgeError::submission(SubmitStep::Stage, e))?;

        debug!(
            endpoint = url,
            sender = %sender.address,
            recipient = %recipient,
            nonce,
            tx_hash = %tx_hash,
            "Transaction staged"
        );
        Ok(tx_hash)
    }
}

#[cfg(all(test, feature = "mock-rpc"))]
mod tests {
    use super::*;
    use crate::chain::{MockChainRpc, RpcError};
    use crate::network::NetworkGroup;
    use crate::test_support::{identity, test_networks};

    fn forge(rpc: Arc<MockChainRpc>) -> TransactionForge {
        TransactionForge::new(rpc, Arc::new(test_networks()), 1)
    }

    #[tokio::test]
    async fn test_send_signs_and_stages() {
        let rpc = Arc::new(MockChainRpc::new());
        let forge = forge(rpc.clone());
        let endpoint = Endpoint::new("https://a.odin/graphql", NetworkGroup::Odin);
        let sender = identity(0);
        let receiver = identity(1);

        let tx_hash = forge.send(&endpoint, &sender, receiver.address).await.unwrap();
        let submitted = rpc.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].tx_hash, tx_hash);
        assert_eq!(submitted[0].endpoint, endpoint.url);
    }

    #[tokio::test]
    async fn test_stage_failure_is_classified() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.push_submit_failure(RpcError::transport("socket hang up"));
        let forge = forge(rpc.clone());
        let endpoint = Endpoint::new("https://a.heimdall/graphql", NetworkGroup::Heimdall);

        let err = forge
            .send(&endpoint, &identity(0), identity(1).address)
            .await
            .unwrap_err();
        match err {
            ForgeError::SubmissionFailed { cause, step, .. } => {
                assert_eq!(cause, crate::chain::ErrorCause::SocketReset);
                assert_eq!(step, SubmitStep::Stage);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_actions_differ_only_in_minters() {
        let rpc = Arc::new(MockChainRpc::new());
        let forge = forge(rpc);
        let sender = identity(0).address;
        let recipient = identity(1).address;
        let odin = forge.build_action(&Endpoint::new("o", NetworkGroup::Odin), sender, recipient);
        let heimdall = forge.build_action(&Endpoint::new("h", NetworkGroup::Heimdall), sender, recipient);
        assert_eq!(odin.currency.minters.len(), 1);
        assert!(heimdall.currency.minters.is_empty());

        let mut odin_plain = odin.clone();
        odin_plain.currency.minters.clear();
        assert_eq!(odin_plain.encode_hex(), heimdall.encode_hex());
    }
}
