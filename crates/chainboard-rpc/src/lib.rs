//! Chainboard RPC layer: node types, the message payload codec and the
//! JSON-RPC client used to talk to an Ethereum node.
//!
//! The codec and extraction functions are pure:
//! - `memo` turns message text into transaction `data` and back,
//! - `scanner` decides whether a node transaction carries a message.
//!
//! Everything that needs the network goes through the [`NodeApi`] trait.
//! [`JsonRpcNode`] is the HTTP implementation.

pub mod error;
pub mod http;
pub mod memo;
pub mod node;
pub mod quantity;
pub mod scanner;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::RpcError;
pub use http::{JsonRpcNode, NodeConfig};
pub use memo::{encode_message_data, encode_message_payload, Rejection};
pub use node::NodeApi;
pub use scanner::{
    extract_message_from_transaction, scan_block_for_messages, transaction_to_message,
    BlockMessages,
};
pub use types::{Address, AddressParseError, Block, Message, Transaction, TransactionRequest};
