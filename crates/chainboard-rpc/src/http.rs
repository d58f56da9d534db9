use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::RpcError;
use crate::node::NodeApi;
use crate::quantity;
use crate::types::{Address, Block, TransactionRequest};

/// Default HTTP endpoint of a local geth node.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Connection settings for [`JsonRpcNode`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub rpc_url: String,
    /// Upper bound on a single request, so a stalled node surfaces as an
    /// error instead of hanging the scan.
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl NodeConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

/// Decode a JSON-RPC response body into the expected result type.
///
/// A missing or `null` result is handed to `R` as `null`, so `Option<_>`
/// results come back as `None` and everything else fails to decode.
pub fn parse_response<R: DeserializeOwned>(body: &[u8]) -> Result<R, RpcError> {
    let response: JsonRpcResponse = serde_json::from_slice(body)?;

    if let Some(err) = response.error {
        return Err(RpcError::Node {
            code: err.code,
            message: err.message,
        });
    }

    Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
}

/// [`NodeApi`] over JSON-RPC/HTTP.
pub struct JsonRpcNode {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcNode {
    pub fn new(config: &NodeConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(%method, id, "rpc call");

        let body = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_response(&body)
    }
}

#[async_trait]
impl NodeApi for JsonRpcNode {
    #[instrument(skip(self, passphrase))]
    async fn unlock_account(
        &self,
        account: &Address,
        passphrase: &str,
        duration_secs: Option<u64>,
    ) -> Result<bool, RpcError> {
        self.call(
            "personal_unlockAccount",
            json!([account, passphrase, duration_secs]),
        )
        .await
    }

    #[instrument(skip(self, passphrase))]
    async fn new_account(&self, passphrase: &str) -> Result<Address, RpcError> {
        self.call("personal_newAccount", json!([passphrase])).await
    }

    async fn list_accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.call("personal_listAccounts", json!([])).await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        quantity::parse(&raw)
    }

    async fn block_with_transactions(&self, height: u64) -> Result<Option<Block>, RpcError> {
        self.call(
            "eth_getBlockByNumber",
            json!([quantity::format(height), true]),
        )
        .await
    }

    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to))]
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<String, RpcError> {
        self.call("eth_sendTransaction", json!([request])).await
    }

    async fn new_block_filter(&self) -> Result<String, RpcError> {
        self.call("eth_newBlockFilter", json!([])).await
    }

    async fn block_filter_changes(&self, filter_id: &str) -> Result<Vec<String>, RpcError> {
        self.call("eth_getFilterChanges", json!([filter_id])).await
    }

    async fn uninstall_filter(&self, filter_id: &str) -> Result<bool, RpcError> {
        self.call("eth_uninstallFilter", json!([filter_id])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_values() {
        let hash: String =
            parse_response(br#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#).unwrap();
        assert_eq!(hash, "0xabc");

        let ok: bool = parse_response(br#"{"jsonrpc":"2.0","id":1,"result":true}"#).unwrap();
        assert!(ok);
    }

    #[test]
    fn null_result_is_an_absent_block() {
        let block: Option<Block> =
            parse_response(br#"{"jsonrpc":"2.0","id":4,"result":null}"#).unwrap();
        assert!(block.is_none());
    }

    #[test]
    fn error_object_becomes_node_error() {
        let err = parse_response::<bool>(
            br#"{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"could not decrypt key with given password"}}"#,
        )
        .unwrap_err();

        assert!(err.is_node_rejection());
        match err {
            RpcError::Node { code, message } => {
                assert_eq!(code, -32000);
                assert!(message.contains("decrypt"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_result_for_non_optional_type_is_decode_error() {
        let err = parse_response::<bool>(br#"{"jsonrpc":"2.0","id":3}"#).unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[test]
    fn request_body_shape() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "eth_getBlockByNumber",
            params: json!([quantity::format(16), true]),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc":"2.0","id":7,"method":"eth_getBlockByNumber","params":["0x10",true]})
        );
    }

    #[test]
    fn client_keeps_configured_url() {
        let node = JsonRpcNode::new(&NodeConfig::new("http://localhost:8545")).unwrap();
        assert_eq!(node.url(), "http://localhost:8545");
    }
}
