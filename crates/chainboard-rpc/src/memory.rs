//! In-memory [`NodeApi`] for tests.
//!
//! Behaves like a single-node development chain: every accepted
//! `eth_sendTransaction` is sealed into its own block immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::node::NodeApi;
use crate::types::{Address, Block, Transaction, TransactionRequest};

const ERR_GENERIC: i64 = -32000;

fn unwrap_poison<T>(lock: std::sync::LockResult<T>) -> T {
    match lock {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn node_error(message: &str) -> RpcError {
    RpcError::Node {
        code: ERR_GENERIC,
        message: message.to_string(),
    }
}

fn block_hash(height: u64) -> String {
    format!("0x{height:064x}")
}

#[derive(Default)]
struct Chain {
    blocks: Vec<Block>,
    passphrases: BTreeMap<Address, String>,
    unlocked: BTreeSet<Address>,
    /// Remaining fetches for which a height answers `null`.
    withheld: BTreeMap<u64, u32>,
    /// Filter id -> number of blocks already reported.
    filters: BTreeMap<String, usize>,
    fetch_log: Vec<u64>,
    next_account: u64,
    next_tx: u64,
    next_filter: u64,
    fail_head: bool,
}

/// Development-chain stand-in for a real node.
pub struct MemoryNode {
    chain: Mutex<Chain>,
}

impl Default for MemoryNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNode {
    /// A chain holding only an empty genesis block.
    pub fn new() -> Self {
        let node = Self {
            chain: Mutex::new(Chain::default()),
        };
        node.push_block(Vec::new());
        node
    }

    /// Register an account with the given passphrase.
    pub fn add_account(&self, passphrase: &str) -> Address {
        let mut chain = unwrap_poison(self.chain.lock());
        Self::create_account(&mut chain, passphrase)
    }

    fn create_account(chain: &mut Chain, passphrase: &str) -> Address {
        chain.next_account += 1;
        let mut bytes = [0u8; 20];
        bytes[0] = 0xcb;
        bytes[12..].copy_from_slice(&chain.next_account.to_be_bytes());
        let address = Address(bytes);
        chain.passphrases.insert(address, passphrase.to_string());
        address
    }

    /// Seal a block with the given transactions; returns its height.
    pub fn push_block(&self, transactions: Vec<Transaction>) -> u64 {
        let mut chain = unwrap_poison(self.chain.lock());
        Self::seal(&mut chain, transactions)
    }

    fn seal(chain: &mut Chain, mut transactions: Vec<Transaction>) -> u64 {
        let height = chain.blocks.len() as u64;
        for tx in &mut transactions {
            tx.block_number = Some(height);
            if tx.hash.is_none() {
                chain.next_tx += 1;
                tx.hash = Some(format!("0x{:064x}", chain.next_tx));
            }
        }
        chain.blocks.push(Block {
            number: height,
            hash: Some(block_hash(height)),
            transactions: Some(transactions),
        });
        height
    }

    /// Seal `count` empty blocks; returns the new head.
    pub fn push_empty_blocks(&self, count: u64) -> u64 {
        let mut head = self.head();
        for _ in 0..count {
            head = self.push_block(Vec::new());
        }
        head
    }

    /// Make `height` answer `null` for the next `fetches` requests.
    pub fn withhold_block(&self, height: u64, fetches: u32) {
        let mut chain = unwrap_poison(self.chain.lock());
        chain.withheld.insert(height, fetches);
    }

    /// Make `eth_blockNumber` fail until called again with `false`.
    pub fn fail_block_number(&self, fail: bool) {
        unwrap_poison(self.chain.lock()).fail_head = fail;
    }

    /// Height of the latest block.
    pub fn head(&self) -> u64 {
        let chain = unwrap_poison(self.chain.lock());
        chain.blocks.len() as u64 - 1
    }

    /// Every height requested through `eth_getBlockByNumber`, in order.
    pub fn fetched_heights(&self) -> Vec<u64> {
        unwrap_poison(self.chain.lock()).fetch_log.clone()
    }

    pub fn clear_fetch_log(&self) {
        unwrap_poison(self.chain.lock()).fetch_log.clear();
    }

    /// Drop an unlock, as if its duration ran out.
    pub fn lock_account(&self, account: &Address) {
        unwrap_poison(self.chain.lock()).unlocked.remove(account);
    }

    pub fn is_unlocked(&self, account: &Address) -> bool {
        unwrap_poison(self.chain.lock()).unlocked.contains(account)
    }
}

#[async_trait]
impl NodeApi for MemoryNode {
    async fn unlock_account(
        &self,
        account: &Address,
        passphrase: &str,
        _duration_secs: Option<u64>,
    ) -> Result<bool, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        match chain.passphrases.get(account) {
            None => Err(node_error("no key for given address or file")),
            Some(expected) if expected != passphrase => {
                Err(node_error("could not decrypt key with given password"))
            }
            Some(_) => {
                chain.unlocked.insert(*account);
                Ok(true)
            }
        }
    }

    async fn new_account(&self, passphrase: &str) -> Result<Address, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        Ok(Self::create_account(&mut chain, passphrase))
    }

    async fn list_accounts(&self) -> Result<Vec<Address>, RpcError> {
        let chain = unwrap_poison(self.chain.lock());
        Ok(chain.passphrases.keys().copied().collect())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let chain = unwrap_poison(self.chain.lock());
        if chain.fail_head {
            return Err(node_error("head unavailable"));
        }
        Ok(chain.blocks.len() as u64 - 1)
    }

    async fn block_with_transactions(&self, height: u64) -> Result<Option<Block>, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        chain.fetch_log.push(height);

        if let Some(remaining) = chain.withheld.get_mut(&height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }

        Ok(chain.blocks.get(height as usize).cloned())
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<String, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        if !chain.unlocked.contains(&request.from) {
            return Err(node_error("authentication needed: password or unlock"));
        }

        chain.next_tx += 1;
        let hash = format!("0x{:064x}", chain.next_tx);
        let tx = Transaction {
            hash: Some(hash.clone()),
            block_number: None,
            from: Some(request.from.to_string()),
            to: Some(request.to.to_string()),
            input: Some(request.data.clone()),
            value: Some(request.value.clone()),
        };
        Self::seal(&mut chain, vec![tx]);
        Ok(hash)
    }

    async fn new_block_filter(&self) -> Result<String, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        chain.next_filter += 1;
        let id = format!("0x{:x}", chain.next_filter);
        let seen = chain.blocks.len();
        chain.filters.insert(id.clone(), seen);
        Ok(id)
    }

    async fn block_filter_changes(&self, filter_id: &str) -> Result<Vec<String>, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        let total = chain.blocks.len();
        let seen = chain
            .filters
            .get_mut(filter_id)
            .ok_or_else(|| node_error("filter not found"))?;

        let start = *seen;
        *seen = total;
        Ok((start..total).map(|h| block_hash(h as u64)).collect())
    }

    async fn uninstall_filter(&self, filter_id: &str) -> Result<bool, RpcError> {
        let mut chain = unwrap_poison(self.chain.lock());
        Ok(chain.filters.remove(filter_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn withheld_block_reappears() {
        let node = MemoryNode::new();
        let h = node.push_empty_blocks(2);
        node.withhold_block(h, 1);

        assert!(node.block_with_transactions(h).await.unwrap().is_none());
        assert!(node.block_with_transactions(h).await.unwrap().is_some());
        assert_eq!(node.fetched_heights(), vec![h, h]);
    }

    #[tokio::test]
    async fn block_filter_reports_each_block_once() {
        let node = MemoryNode::new();
        let id = node.new_block_filter().await.unwrap();

        node.push_empty_blocks(2);
        assert_eq!(node.block_filter_changes(&id).await.unwrap().len(), 2);
        assert!(node.block_filter_changes(&id).await.unwrap().is_empty());

        assert!(node.uninstall_filter(&id).await.unwrap());
        assert!(node.block_filter_changes(&id).await.is_err());
    }

    #[tokio::test]
    async fn send_requires_unlock() {
        let node = MemoryNode::new();
        let a = node.add_account("pw");
        let b = node.add_account("pw");
        let req = TransactionRequest::zero_value(a, b, "0x".into());

        assert!(node.send_transaction(&req).await.is_err());
        assert!(node.unlock_account(&a, "pw", None).await.unwrap());
        node.send_transaction(&req).await.unwrap();
        assert_eq!(node.head(), 1);
    }
}
