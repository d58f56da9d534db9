use tracing::trace;

use crate::memo::{decode_input_hex, decode_message_payload, Rejection};
use crate::types::{Address, Block, Message, Transaction};

/// Messages found in one block for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMessages {
    pub height: u64,
    /// Relevant messages, in transaction order.
    pub messages: Vec<Message>,
    /// Transactions that were not board messages at all.
    pub rejected: usize,
    /// Board messages between other accounts.
    pub irrelevant: usize,
}

/// Decode a transaction into a board message.
///
/// Returns:
/// - `Ok(Message)` if the transaction carries a well-formed payload,
/// - `Err(Rejection)` naming the first check that failed.
///
/// Checks run in a fixed order: recipient, sender, input presence, address
/// syntax, hex, UTF-8, JSON, `message` field.
pub fn extract_message_from_transaction(tx: &Transaction) -> Result<Message, Rejection> {
    let to = tx.to.as_deref().ok_or(Rejection::MissingTo)?;
    let from = tx.from.as_deref().ok_or(Rejection::MissingFrom)?;
    let input = tx.input.as_deref().ok_or(Rejection::MissingInput)?;

    let to: Address = to.parse().map_err(|_| Rejection::MalformedAddress)?;
    let from: Address = from.parse().map_err(|_| Rejection::MalformedAddress)?;

    let bytes = decode_input_hex(input)?;
    let content = decode_message_payload(&bytes)?;

    Ok(Message {
        from,
        to,
        content,
        block_number: tx.block_number,
        tx_hash: tx.hash.clone(),
    })
}

/// Lossy variant of [`extract_message_from_transaction`] for callers that
/// only filter.
pub fn transaction_to_message(tx: &Transaction) -> Option<Message> {
    extract_message_from_transaction(tx).ok()
}

/// Collect the messages in `block` that are relevant to `account`.
///
/// The block height is stamped onto messages whose transaction did not
/// carry its own `blockNumber`.
pub fn scan_block_for_messages(block: &Block, account: &Address) -> BlockMessages {
    let mut out = BlockMessages {
        height: block.number,
        ..BlockMessages::default()
    };

    let txs = match &block.transactions {
        Some(txs) => txs,
        None => return out,
    };

    for tx in txs {
        let mut message = match extract_message_from_transaction(tx) {
            Ok(m) => m,
            Err(reason) => {
                trace!(height = block.number, tx = ?tx.hash, %reason, "not a board message");
                out.rejected += 1;
                continue;
            }
        };

        if !message.is_relevant_to(account) {
            out.irrelevant += 1;
            continue;
        }

        message.block_number.get_or_insert(block.number);
        out.messages.push(message);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::encode_message_data;

    const A: &str = "0x00000000000000000000000000000000000000aa";
    const B: &str = "0x00000000000000000000000000000000000000bb";
    const C: &str = "0x00000000000000000000000000000000000000cc";

    fn message_tx(from: &str, to: &str, content: &str) -> Transaction {
        Transaction {
            hash: Some("0x01".into()),
            block_number: Some(7),
            from: Some(from.into()),
            to: Some(to.into()),
            input: Some(encode_message_data(content)),
            value: Some("0x0".into()),
        }
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn decodes_a_message_transaction() {
        let msg = extract_message_from_transaction(&message_tx(A, B, "hi")).unwrap();
        assert_eq!(msg.from, addr(A));
        assert_eq!(msg.to, addr(B));
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.block_number, Some(7));
        assert_eq!(msg.tx_hash.as_deref(), Some("0x01"));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut tx = message_tx(A, B, "hi");
        tx.to = None;
        assert_eq!(extract_message_from_transaction(&tx), Err(Rejection::MissingTo));

        let mut tx = message_tx(A, B, "hi");
        tx.from = None;
        assert_eq!(extract_message_from_transaction(&tx), Err(Rejection::MissingFrom));

        let mut tx = message_tx(A, B, "hi");
        tx.input = None;
        assert_eq!(extract_message_from_transaction(&tx), Err(Rejection::MissingInput));

        let mut tx = message_tx(A, B, "hi");
        tx.input = Some("0x".into());
        assert_eq!(extract_message_from_transaction(&tx), Err(Rejection::MissingInput));
    }

    #[test]
    fn rejects_malformed_payloads() {
        let mut tx = message_tx(A, B, "hi");
        tx.input = Some("0xfffe".into());
        assert_eq!(extract_message_from_transaction(&tx), Err(Rejection::NotUtf8));

        let mut tx = message_tx(A, B, "hi");
        tx.input = Some(format!("0x{}", hex::encode("hello")));
        assert_eq!(extract_message_from_transaction(&tx), Err(Rejection::NotJson));

        let mut tx = message_tx(A, B, "hi");
        tx.input = Some(format!("0x{}", hex::encode(r#"{"msg":"hi"}"#)));
        assert_eq!(
            extract_message_from_transaction(&tx),
            Err(Rejection::MissingMessageField)
        );

        let mut tx = message_tx(A, B, "hi");
        tx.to = Some("0x1234".into());
        assert_eq!(
            extract_message_from_transaction(&tx),
            Err(Rejection::MalformedAddress)
        );

        assert!(transaction_to_message(&tx).is_none());
    }

    #[test]
    fn block_scan_keeps_only_relevant_messages() {
        let mut plain_transfer = message_tx(C, B, "");
        plain_transfer.input = Some("0x".into());

        let block = Block {
            number: 9,
            hash: None,
            transactions: Some(vec![
                message_tx(A, B, "to b"),
                message_tx(B, C, "b to c"),
                message_tx(C, A, "to a"),
                plain_transfer,
            ]),
        };

        let found = scan_block_for_messages(&block, &addr(A));
        let contents: Vec<_> = found.messages.iter().map(|m| m.content.as_str()).collect();

        assert_eq!(found.height, 9);
        assert_eq!(contents, vec!["to b", "to a"]);
        assert_eq!(found.irrelevant, 1);
        assert_eq!(found.rejected, 1);
    }

    #[test]
    fn block_height_fills_missing_transaction_height() {
        let mut tx = message_tx(A, B, "hi");
        tx.block_number = None;
        let block = Block {
            number: 3,
            hash: None,
            transactions: Some(vec![tx]),
        };

        let found = scan_block_for_messages(&block, &addr(B));
        assert_eq!(found.messages[0].block_number, Some(3));
    }
}
