use serde_json::Value;
use thiserror::Error;

/// JSON key holding the message text.
///
/// Public part of the payload format: `{"message":"<text>"}`.
/// Changing it breaks interoperability with every other board client.
pub const MESSAGE_FIELD: &str = "message";

/// Why a transaction is not a board message.
///
/// Most transactions on a shared chain are not messages, so these are
/// filter outcomes rather than failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("transaction has no recipient")]
    MissingTo,

    #[error("transaction has no sender")]
    MissingFrom,

    #[error("transaction has no input data")]
    MissingInput,

    #[error("sender or recipient is not a valid address")]
    MalformedAddress,

    #[error("input is not valid hex")]
    InvalidHex,

    #[error("input is not valid UTF-8 text")]
    NotUtf8,

    #[error("input text is not JSON")]
    NotJson,

    #[error("payload has no `message` field")]
    MissingMessageField,

    #[error("payload `message` field is not a string")]
    MessageNotString,
}

/// Encode message text into payload bytes.
///
/// Layout: compact JSON `{"message":<content>}` as UTF-8. No escaping beyond
/// JSON's own and no size limit; the node decides what it accepts.
pub fn encode_message_payload(content: &str) -> Vec<u8> {
    let payload = serde_json::json!({ "message": content });
    payload.to_string().into_bytes()
}

/// Encode message text into the `data` field of a transaction request
/// (`0x`-prefixed lowercase hex of [`encode_message_payload`]).
pub fn encode_message_data(content: &str) -> String {
    format!("0x{}", hex::encode(encode_message_payload(content)))
}

/// Decode the hex `input` field of a transaction into raw bytes.
///
/// An empty payload (`0x`) counts as missing input.
pub fn decode_input_hex(input: &str) -> Result<Vec<u8>, Rejection> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if digits.is_empty() {
        return Err(Rejection::MissingInput);
    }

    hex::decode(digits).map_err(|_| Rejection::InvalidHex)
}

/// Decode payload bytes back into message text.
pub fn decode_message_payload(bytes: &[u8]) -> Result<String, Rejection> {
    let text = std::str::from_utf8(bytes).map_err(|_| Rejection::NotUtf8)?;
    let value: Value = serde_json::from_str(text).map_err(|_| Rejection::NotJson)?;

    match value.get(MESSAGE_FIELD) {
        Some(Value::String(content)) => Ok(content.clone()),
        Some(_) => Err(Rejection::MessageNotString),
        None => Err(Rejection::MissingMessageField),
    }
}
