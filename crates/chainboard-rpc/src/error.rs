use thiserror::Error;

/// Errors raised while talking to the node.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with a JSON-RPC error object.
    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid hex quantity: {0:?}")]
    InvalidQuantity(String),
}

impl RpcError {
    /// True when the node itself refused the call, as opposed to the call
    /// never reaching it or the answer being unreadable.
    pub fn is_node_rejection(&self) -> bool {
        matches!(self, RpcError::Node { .. })
    }
}
