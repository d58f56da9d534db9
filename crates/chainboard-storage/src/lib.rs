//! Scan-state persistence.
//!
//! Messages themselves are never stored; the chain is the store. What is kept
//! between runs is how far each account's scan has confirmed, so a restart
//! resumes at the next unread height instead of genesis.

use chainboard_rpc::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Current on-disk layout version.
pub const STATE_VERSION: u8 = 1;

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors emitted by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Progress marker for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    /// Highest height whose block was fully processed. `None` means no
    /// block has been read yet.
    pub last_block_read: Option<u64>,
    pub last_block_hash: Option<String>,
}

/// Complete snapshot of persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub version: u8,
    pub accounts: BTreeMap<Address, ScanState>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            accounts: BTreeMap::new(),
        }
    }
}

impl BoardState {
    /// Deterministic serialization to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Storage interface decoupled from the RPC layer.
pub trait BoardStorage: Send + Sync {
    fn load_state(&self) -> BoardState;

    /// Last confirmed height for `account`.
    fn cursor(&self, account: &Address) -> Option<u64>;

    /// Record that `account` has processed every block up to `height`.
    ///
    /// Cursors only move forward: a height at or below the stored one is
    /// ignored and `Ok(false)` is returned.
    fn update_cursor(&self, account: &Address, height: u64, block_hash: Option<String>)
        -> Result<bool>;

    /// Forget the cursor of `account` so the next scan starts at genesis.
    fn reset_cursor(&self, account: &Address) -> Result<bool>;

    /// Make buffered cursor updates durable. Backends without a durable
    /// layer have nothing to do.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn unwrap_poison<T>(lock: std::sync::LockResult<T>) -> T {
    match lock {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory backend.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<BoardState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: BoardState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    fn with_write<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut BoardState) -> T,
    {
        let mut guard = unwrap_poison(self.state.write());
        f(&mut guard)
    }
}

impl BoardStorage for InMemoryStorage {
    fn load_state(&self) -> BoardState {
        unwrap_poison(self.state.read()).clone()
    }

    fn cursor(&self, account: &Address) -> Option<u64> {
        unwrap_poison(self.state.read())
            .accounts
            .get(account)
            .and_then(|s| s.last_block_read)
    }

    fn update_cursor(
        &self,
        account: &Address,
        height: u64,
        block_hash: Option<String>,
    ) -> Result<bool> {
        let moved = self.with_write(|state| {
            let entry = state.accounts.entry(*account).or_default();
            match entry.last_block_read {
                Some(current) if current >= height => false,
                _ => {
                    entry.last_block_read = Some(height);
                    entry.last_block_hash = block_hash;
                    true
                }
            }
        });
        Ok(moved)
    }

    fn reset_cursor(&self, account: &Address) -> Result<bool> {
        Ok(self.with_write(|state| state.accounts.remove(account).is_some()))
    }
}

/// Disk-backed JSON storage with atomic writes.
///
/// Cursor updates land in memory and reach the file on [`BoardStorage::flush`];
/// resets are written immediately.
pub struct JsonFileStorage {
    path: PathBuf,
    inner: InMemoryStorage,
    dirty: AtomicBool,
}

impl JsonFileStorage {
    /// Load state from disk, or start empty if the file is missing or
    /// unreadable.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let state = if path.exists() {
            let bytes = fs::read(&path)?;
            match BoardState::from_bytes(&bytes) {
                Ok(s) => s,
                Err(_e) => {
                    #[cfg(feature = "logging")]
                    warn!("failed to parse state file {:?} ({}), starting fresh", path, _e);
                    BoardState::default()
                }
            }
        } else {
            BoardState::default()
        };

        Ok(Self {
            path,
            inner: InMemoryStorage::from_state(state),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are cursor updates not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn write_snapshot(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        self.write_file().map_err(|err| {
            self.dirty.store(true, Ordering::Release);
            err
        })
    }

    fn write_file(&self) -> Result<()> {
        let snapshot = self.inner.load_state();
        let bytes = snapshot.to_bytes()?;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        #[cfg(feature = "logging")]
        debug!("persisted scan state to {:?}", self.path);

        Ok(())
    }
}

impl BoardStorage for JsonFileStorage {
    fn load_state(&self) -> BoardState {
        self.inner.load_state()
    }

    fn cursor(&self, account: &Address) -> Option<u64> {
        self.inner.cursor(account)
    }

    fn update_cursor(
        &self,
        account: &Address,
        height: u64,
        block_hash: Option<String>,
    ) -> Result<bool> {
        let moved = self.inner.update_cursor(account, height, block_hash)?;
        if moved {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(moved)
    }

    fn reset_cursor(&self, account: &Address) -> Result<bool> {
        let removed = self.inner.reset_cursor(account)?;
        if removed {
            self.write_snapshot()?;
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<()> {
        if self.is_dirty() {
            self.write_snapshot()?;
        }
        Ok(())
    }
}
