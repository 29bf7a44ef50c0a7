//! GraphQL implementation of [`ChainRpc`].
//!
//! One `reqwest::Client` with keep-alive pooling is shared by every
//! endpoint. Timeouts are applied per request: send-path calls and status
//! checks use 20s, balance reads 10s (configurable).

use super::error::{ErrorCause, RpcError};
use super::{ChainRpc, TxResult, TxStatus};
use crate::money::Money;
use crate::network::Currency;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Per-call-class request timeouts
#[derive(Debug, Clone, Copy)]
pub struct RpcTimeouts {
    pub send: Duration,
    pub check: Duration,
    pub balance: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            send: Duration::from_secs(20),
            check: Duration::from_secs(20),
            balance: Duration::from_secs(10),
        }
    }
}

const NEXT_NONCE_QUERY: &str = r#"
query getNextTxNonce($address: Address!) {
  transaction { nextTxNonce(address: $address) }
}"#;

const UNSIGNED_TX_QUERY: &str = r#"
query unsignedTx($publicKey: String!, $plainValue: String!, $nonce: Long, $maxGasPrice: FungibleAssetValueInputType) {
  transaction {
    unsignedTransaction(publicKey: $publicKey, plainValue: $plainValue, nonce: $nonce, maxGasPrice: $maxGasPrice)
  }
}"#;

const ATTACH_SIGNATURE_QUERY: &str = r#"
query attachSignature($unsignedTx: String!, $signature: String!) {
  transaction { signTransaction(unsignedTransaction: $unsignedTx, signature: $signature) }
}"#;

const STAGE_MUTATION: &str = r#"
mutation stage($payload: String!) {
  stageTransaction(payload: $payload)
}"#;

const BALANCE_QUERY: &str = r#"
query getBalance($address: Address!, $ticker: String!, $decimalPlaces: Byte!, $minters: [Address!]) {
  stateQuery {
    balance(address: $address, currency: { ticker: $ticker, decimalPlaces: $decimalPlaces, minters: $minters }) {
      quantity
    }
  }
}"#;

/// Gas price cap attached to every unsigned transaction
const MAX_GAS_TICKER: &str = "Mead";
const MAX_GAS_DECIMALS: u8 = 18;

#[derive(Serialize)]
struct GraphqlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

#[derive(Deserialize)]
struct GraphqlResponse<R> {
    data: Option<R>,
    #[serde(default)]
    errors: Option<Vec<GraphqlErrorEntry>>,
}

#[derive(Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionField<T> {
    transaction: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextNonce {
    next_tx_nonce: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnsignedTransaction {
    unsigned_transaction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignTransaction {
    sign_transaction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageTransaction {
    stage_transaction: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResults {
    transaction_results: Vec<RawTxResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTxResult {
    tx_status: String,
    #[serde(default)]
    exception_names: Option<Vec<Option<String>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateQuery {
    state_query: BalanceField,
}

#[derive(Deserialize)]
struct BalanceField {
    balance: Quantity,
}

#[derive(Deserialize)]
struct Quantity {
    quantity: String,
}

impl From<RawTxResult> for TxResult {
    fn from(raw: RawTxResult) -> Self {
        TxResult {
            status: TxStatus::from_wire(&raw.tx_status),
            exceptions: raw
                .exception_names
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect(),
        }
    }
}

/// Chain RPC over the nodes' GraphQL interface
pub struct GraphqlChainRpc {
    client: reqwest::Client,
    timeouts: RpcTimeouts,
}

impl GraphqlChainRpc {
    pub fn new(timeouts: RpcTimeouts) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| RpcError::transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeouts })
    }

    /// Post one GraphQL document and decode its `data` field
    async fn query<V, R>(
        &self,
        endpoint: &str,
        document: &str,
        variables: V,
        timeout: Duration,
    ) -> Result<R, RpcError>
    where
        V: Serialize,
        R: DeserializeOwned,
    {
        let request = GraphqlRequest {
            query: document,
            variables,
        };

        let response = self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(endpoint, %status, "GraphQL call rejected");
            return Err(RpcError::Transport {
                cause: ErrorCause::classify(&body),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let parsed: GraphqlResponse<R> = serde_json::from_str(&body)
            .map_err(|e| RpcError::Decode(format!("{}: {}", e, body)))?;

        if let Some(errors) = parsed.errors.filter(|errs| !errs.is_empty()) {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RpcError::Graphql(joined));
        }

        parsed
            .data
            .ok_or_else(|| RpcError::Decode("No data in GraphQL response".to_string()))
    }
}

/// Status query with the hash list inlined as a literal
fn status_document(tx_hashes: &[String]) -> Result<String, RpcError> {
    let ids = serde_json::to_string(tx_hashes).map_err(|e| RpcError::Decode(e.to_string()))?;
    Ok(format!(
        "query getTx {{ transaction {{ transactionResults(txIds: {ids}) {{ txStatus exceptionNames }} }} }}"
    ))
}

#[async_trait]
impl ChainRpc for GraphqlChainRpc {
    async fn next_sequence(&self, endpoint: &str, address: &str) -> Result<u64, RpcError> {
        let data: TransactionField<NextNonce> = self
            .query(
                endpoint,
                NEXT_NONCE_QUERY,
                json!({ "address": address }),
                self.timeouts.send,
            )
            .await?;
        Ok(data.transaction.next_tx_nonce)
    }

    async fn build_unsigned(
        &self,
        endpoint: &str,
        public_key: &str,
        action: &str,
        nonce: u64,
    ) -> Result<String, RpcError> {
        let variables = json!({
            "publicKey": public_key,
            "plainValue": action,
            "nonce": nonce,
            "maxGasPrice": {
                "quantity": 1,
                "ticker": MAX_GAS_TICKER,
                "decimalPlaces": MAX_GAS_DECIMALS,
            },
        });
        let data: TransactionField<UnsignedTransaction> = self
            .query(endpoint, UNSIGNED_TX_QUERY, variables, self.timeouts.send)
            .await?;
        Ok(data.transaction.unsigned_transaction)
    }

    async fn attach_signature(
        &self,
        endpoint: &str,
        unsigned: &str,
        signature: &str,
    ) -> Result<String, RpcError> {
        let data: TransactionField<SignTransaction> = self
            .query(
                endpoint,
                ATTACH_SIGNATURE_QUERY,
                json!({ "unsignedTx": unsigned, "signature": signature }),
                self.timeouts.send,
            )
            .await?;
        Ok(data.transaction.sign_transaction)
    }

    async fn submit(&self, endpoint: &str, payload: &str) -> Result<String, RpcError> {
        let data: StageTransaction = self
            .query(
                endpoint,
                STAGE_MUTATION,
                json!({ "payload": payload }),
                self.timeouts.send,
            )
            .await?;
        Ok(data.stage_transaction)
    }

    async fn balance(
        &self,
        endpoint: &str,
        address: &str,
        currency: &Currency,
    ) -> Result<Money, RpcError> {
        let minters: Vec<String> = currency.minters.iter().map(|m| m.to_string()).collect();
        let variables = json!({
            "address": address,
            "ticker": currency.ticker,
            "decimalPlaces": currency.decimal_places,
            "minters": minters,
        });
        let data: StateQuery = self
            .query(endpoint, BALANCE_QUERY, variables, self.timeouts.balance)
            .await?;
        Money::from_str(&data.state_query.balance.quantity)
            .map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn status_batch(
        &self,
        endpoint: &str,
        tx_hashes: &[String],
    ) -> Result<Vec<TxResult>, RpcError> {
        if tx_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let document = status_document(tx_hashes)?;
        let data: TransactionField<TransactionResults> = self
            .query(endpoint, &document, Value::Null, self.timeouts.check)
            .await?;
        Ok(data
            .transaction
            .transaction_results
            .into_iter()
            .map(TxResult::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_document_inlines_ids() {
        let doc = status_document(&["ab".to_string(), "cd".to_string()]).unwrap();
        assert!(doc.contains(r#"transactionResults(txIds: ["ab","cd"])"#));
        assert!(doc.contains("txStatus exceptionNames"));
    }

    #[test]
    fn test_decode_transaction_results() {
        let body = r#"{"data":{"transaction":{"transactionResults":[
            {"txStatus":"SUCCESS","exceptionNames":null},
            {"txStatus":"FAILURE","exceptionNames":["InsufficientBalanceException", null]}
        ]}}}"#;
        let parsed: GraphqlResponse<TransactionField<TransactionResults>> =
            serde_json::from_str(body).unwrap();
        let results: Vec<TxResult> = parsed
            .data
            .unwrap()
            .transaction
            .transaction_results
            .into_iter()
            .map(TxResult::from)
            .collect();
        assert_eq!(results[0].status, TxStatus::Success);
        assert!(results[0].exceptions.is_empty());
        assert_eq!(results[1].status, TxStatus::Failure);
        assert_eq!(results[1].exceptions, vec!["InsufficientBalanceException"]);
    }

    #[test]
    fn test_decode_balance() {
        let body = r#"{"data":{"stateQuery":{"balance":{"quantity":"12.34"}}}}"#;
        let parsed: GraphqlResponse<StateQuery> = serde_json::from_str(body).unwrap();
        let quantity = parsed.data.unwrap().state_query.balance.quantity;
        assert_eq!(Money::from_str(&quantity).unwrap(), Money::from_units(1234));
    }

    #[test]
    fn test_decode_graphql_errors() {
        let body = r#"{"data":null,"errors":[{"message":"nonce too low"}]}"#;
        let parsed: GraphqlResponse<StageTransaction> = serde_json::from_str(body).unwrap();
        assert!(parsed.data.is_none());
        assert_eq!(parsed.errors.unwrap()[0].message, "nonce too low");
    }

    #[test]
    fn test_default_timeouts() {
        let t = RpcTimeouts::default();
        assert_eq!(t.send, Duration::from_secs(20));
        assert_eq!(t.check, Duration::from_secs(20));
        assert_eq!(t.balance, Duration::from_secs(10));
    }
}
