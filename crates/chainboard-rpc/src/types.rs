use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::quantity;

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte account address.
///
/// Parsing accepts any hex casing (checksummed or not), with or without the
/// `0x` prefix. Display is always lowercase with the prefix, so two addresses
/// compare equal whenever their bytes do.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AddressParseError {
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),

    #[error("address is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let bytes = hex::decode(digits)?;
        let arr: [u8; ADDRESS_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::InvalidLength(bytes.len()))?;

        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A transaction as returned inside `eth_getBlockByNumber(.., true)`.
///
/// Addresses are kept as the raw strings the node sent. Validation happens
/// in [`crate::scanner::extract_message_from_transaction`] so one odd
/// transaction cannot make a whole block undecodable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub hash: Option<String>,

    #[serde(default, with = "quantity::option")]
    pub block_number: Option<u64>,

    #[serde(default)]
    pub from: Option<String>,

    /// Absent for contract creations.
    #[serde(default)]
    pub to: Option<String>,

    /// Hex-encoded payload bytes.
    #[serde(default)]
    pub input: Option<String>,

    #[serde(default)]
    pub value: Option<String>,
}

/// A block with full transaction bodies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(with = "quantity")]
    pub number: u64,

    #[serde(default)]
    pub hash: Option<String>,

    /// `None` when the node answered without a transaction list.
    #[serde(default)]
    pub transactions: Option<Vec<Transaction>>,
}

/// Parameters for `eth_sendTransaction`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    /// Hex quantity, `0x0` for board messages.
    pub value: String,
    /// `0x`-prefixed hex payload.
    pub data: String,
}

impl TransactionRequest {
    /// A zero-value transaction carrying `data`.
    pub fn zero_value(from: Address, to: Address, data: String) -> Self {
        Self {
            from,
            to,
            value: quantity::format(0),
            data,
        }
    }
}

/// A board message recovered from a transaction.
///
/// Never persisted; rebuilt from the chain on every scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: Address,
    pub to: Address,
    pub content: String,

    /// Height of the block that included the transaction, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl Message {
    /// A message is relevant to `account` when it sent or received it.
    pub fn is_relevant_to(&self, account: &Address) -> bool {
        self.from == *account || self.to == *account
    }
}
