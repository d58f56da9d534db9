use std::sync::Arc;

use chainboard_rpc::{scan_block_for_messages, Address, Block, Message, NodeApi, RpcError};
use chainboard_storage::BoardStorage;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::ScannerConfig;

/// Blocks advanced between storage flushes within one long catch-up.
const FLUSH_EVERY: u64 = 256;

/// Height up to which every block has been processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Cursor(Option<u64>);

impl Cursor {
    /// No block read yet; the next scan starts at genesis.
    pub const BEFORE_GENESIS: Cursor = Cursor(None);

    /// Every block up to and including `height` has been read.
    pub fn at(height: u64) -> Self {
        Cursor(Some(height))
    }

    pub fn last_block_read(&self) -> Option<u64> {
        self.0
    }

    /// First height the next scan will request.
    pub fn next_height(&self) -> u64 {
        self.0.map_or(0, |h| h.saturating_add(1))
    }

    fn advance_to(&mut self, height: u64) -> bool {
        match self.0 {
            Some(current) if current >= height => false,
            _ => {
                self.0 = Some(height);
                true
            }
        }
    }
}

impl From<Option<u64>> for Cursor {
    fn from(value: Option<u64>) -> Self {
        Cursor(value)
    }
}

/// Why a scan stopped before the chain head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// The node answered `null` (or a block without transactions).
    BlockUnavailable,
    /// The request itself failed.
    Node { error: String },
}

/// The height a scan could not get past.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanHalt {
    pub height: u64,
    pub attempts: u32,
    pub reason: HaltReason,
}

/// Outcome of one catch-up run.
#[derive(Debug, Clone, Serialize)]
pub struct CatchUpReport {
    pub account: Address,
    /// First height requested.
    pub start: u64,
    /// Upper bound of the run (chain head, or a caller-supplied limit).
    pub head: u64,
    /// Cursor after the run.
    pub cursor: Cursor,
    pub blocks_scanned: u64,
    /// Relevant messages, ordered by block height then transaction index.
    pub messages: Vec<Message>,
    /// Set when the run stopped at an unconfirmed height.
    pub halted: Option<ScanHalt>,
}

impl CatchUpReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("could not read chain head: {0}")]
    Head(#[from] RpcError),
}

/// Incremental, resumable scanner for one account.
///
/// The cursor sits behind an async mutex held for the whole of a catch-up
/// run, so overlapping triggers queue up instead of racing.
pub struct BlockScanner {
    node: Arc<dyn NodeApi>,
    storage: Option<Arc<dyn BoardStorage>>,
    account: Address,
    config: ScannerConfig,
    cursor: Mutex<Cursor>,
}

impl BlockScanner {
    /// A scanner that starts before genesis.
    pub fn new(node: Arc<dyn NodeApi>, account: Address, config: ScannerConfig) -> Self {
        Self {
            node,
            storage: None,
            account,
            config,
            cursor: Mutex::new(Cursor::BEFORE_GENESIS),
        }
    }

    /// Resume from the cursor stored for this account and write every
    /// advance back to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn BoardStorage>) -> Self {
        let stored = Cursor::from(storage.cursor(&self.account));
        self.cursor = Mutex::new(stored);
        self.storage = Some(storage);
        self
    }

    /// Override the starting cursor.
    pub fn starting_at(mut self, cursor: Cursor) -> Self {
        self.cursor = Mutex::new(cursor);
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn node(&self) -> &Arc<dyn NodeApi> {
        &self.node
    }

    pub async fn cursor(&self) -> Cursor {
        *self.cursor.lock().await
    }

    /// Scan every unread block up to the current chain head.
    pub async fn catch_up(&self) -> Result<CatchUpReport, ScanError> {
        self.catch_up_until(None).await
    }

    /// Scan unread blocks up to `min(limit, chain head)`.
    ///
    /// Blocks are fetched one at a time in ascending order. A height the
    /// node cannot deliver after `fetch_attempts` tries halts the run there;
    /// the cursor stays on the last confirmed height and the next run starts
    /// at the halted one.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn catch_up_until(&self, limit: Option<u64>) -> Result<CatchUpReport, ScanError> {
        let mut cursor = self.cursor.lock().await;

        let chain_head = self.node.block_number().await?;
        let head = limit.map_or(chain_head, |l| l.min(chain_head));
        let start = cursor.next_height();

        let mut report = CatchUpReport {
            account: self.account,
            start,
            head,
            cursor: *cursor,
            blocks_scanned: 0,
            messages: Vec::new(),
            halted: None,
        };

        if start > head {
            debug!(start, head, "nothing to scan");
            return Ok(report);
        }

        for height in start..=head {
            let block = match self.fetch_block(height).await {
                Ok(block) => block,
                Err(halt) => {
                    warn!(height, reason = ?halt.reason, "halting scan at unconfirmed height");
                    report.halted = Some(halt);
                    break;
                }
            };

            let found = scan_block_for_messages(&block, &self.account);
            debug!(
                height,
                messages = found.messages.len(),
                rejected = found.rejected,
                irrelevant = found.irrelevant,
                "block scanned"
            );

            report.messages.extend(found.messages);
            report.blocks_scanned += 1;

            if cursor.advance_to(height) {
                self.persist(height, block.hash);
                if report.blocks_scanned % FLUSH_EVERY == 0 {
                    self.flush_storage().await;
                }
            }
        }

        self.flush_storage().await;
        report.cursor = *cursor;

        info!(
            start,
            head,
            blocks = report.blocks_scanned,
            messages = report.messages.len(),
            complete = report.is_complete(),
            "catch-up finished"
        );

        Ok(report)
    }

    async fn fetch_block(&self, height: u64) -> Result<Block, ScanHalt> {
        let attempts = self.config.fetch_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let reason = match self.node.block_with_transactions(height).await {
                Ok(Some(block)) if block.number == height && block.transactions.is_some() => {
                    return Ok(block)
                }
                Ok(_) => HaltReason::BlockUnavailable,
                Err(err) => HaltReason::Node {
                    error: err.to_string(),
                },
            };

            if attempt >= attempts {
                return Err(ScanHalt {
                    height,
                    attempts: attempt,
                    reason,
                });
            }

            debug!(height, attempt, ?reason, "block not available, retrying");
            sleep(self.config.retry_delay).await;
        }
    }

    fn persist(&self, height: u64, block_hash: Option<String>) {
        let Some(storage) = &self.storage else {
            return;
        };

        // The in-memory cursor stays authoritative for this process.
        if let Err(err) = storage.update_cursor(&self.account, height, block_hash) {
            warn!(height, %err, "failed to persist scan cursor");
        }
    }

    async fn flush_storage(&self) {
        let Some(storage) = self.storage.clone() else {
            return;
        };

        match tokio::task::spawn_blocking(move || storage.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "failed to flush scan state"),
            Err(err) => warn!(%err, "scan state flush task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_starts_before_genesis() {
        assert_eq!(Cursor::BEFORE_GENESIS.next_height(), 0);
        assert_eq!(Cursor::BEFORE_GENESIS.last_block_read(), None);
        assert_eq!(Cursor::at(4).next_height(), 5);
    }

    #[test]
    fn cursor_never_moves_back() {
        let mut cursor = Cursor::at(10);
        assert!(!cursor.advance_to(9));
        assert!(!cursor.advance_to(10));
        assert!(cursor.advance_to(11));
        assert_eq!(cursor, Cursor::at(11));
    }

    #[test]
    fn cursor_serializes_as_plain_height() {
        assert_eq!(serde_json::to_string(&Cursor::at(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&Cursor::BEFORE_GENESIS).unwrap(),
            "null"
        );
    }
}
