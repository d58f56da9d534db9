//! `0x`-prefixed hex quantities as used by the Ethereum JSON-RPC API.
//!
//! Usable directly or as a serde `with` module for `u64` fields.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

use crate::error::RpcError;

/// Render a quantity: no leading zeros, `0x0` for zero.
pub fn format(value: u64) -> String {
    format!("0x{value:x}")
}

/// Parse a quantity. The `0x` prefix is required.
pub fn parse(raw: &str) -> Result<u64, RpcError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| RpcError::InvalidQuantity(raw.to_string()))?;

    if digits.is_empty() {
        return Err(RpcError::InvalidQuantity(raw.to_string()));
    }

    u64::from_str_radix(digits, 16).map_err(|_| RpcError::InvalidQuantity(raw.to_string()))
}

pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(*value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(D::Error::custom)
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&format(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|r| parse(&r).map_err(D::Error::custom)).transpose()
    }
}
