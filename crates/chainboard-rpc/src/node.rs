use async_trait::async_trait;

use crate::error::RpcError;
use crate::types::{Address, Block, TransactionRequest};

/// The subset of the node API chainboard relies on.
///
/// Account unlocking, key storage, signing and broadcast all happen inside
/// the node; this trait only names the calls.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// `personal_unlockAccount`. `Ok(false)` means the node refused.
    async fn unlock_account(
        &self,
        account: &Address,
        passphrase: &str,
        duration_secs: Option<u64>,
    ) -> Result<bool, RpcError>;

    /// `personal_newAccount`.
    async fn new_account(&self, passphrase: &str) -> Result<Address, RpcError>;

    /// `personal_listAccounts`.
    async fn list_accounts(&self) -> Result<Vec<Address>, RpcError>;

    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// `eth_getBlockByNumber(height, true)`. `Ok(None)` if the node does not
    /// have the block (yet).
    async fn block_with_transactions(&self, height: u64) -> Result<Option<Block>, RpcError>;

    /// `eth_sendTransaction`, returning the transaction hash.
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<String, RpcError>;

    /// `eth_newBlockFilter`, returning the filter id.
    async fn new_block_filter(&self) -> Result<String, RpcError>;

    /// `eth_getFilterChanges` for a block filter: hashes of blocks added
    /// since the previous poll.
    async fn block_filter_changes(&self, filter_id: &str) -> Result<Vec<String>, RpcError>;

    /// `eth_uninstallFilter`.
    async fn uninstall_filter(&self, filter_id: &str) -> Result<bool, RpcError>;
}
