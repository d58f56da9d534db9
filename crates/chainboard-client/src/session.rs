use std::sync::Arc;

use chainboard_rpc::{encode_message_data, Address, NodeApi, RpcError, TransactionRequest};
use chainboard_storage::BoardStorage;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::SessionConfig;
use crate::scanner::{BlockScanner, CatchUpReport, ScanError};
use crate::subscription::NewBlockSubscription;

/// Public error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Empty address or passphrase input, treated like a cancelled prompt.
    #[error("no {0} given")]
    MissingInput(&'static str),

    #[error("incorrect credentials")]
    IncorrectCredentials,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("node error: {0}")]
    Node(#[from] RpcError),

    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Unlocked { account: Address },
}

/// One logged-in (or not yet logged-in) user of the board.
///
/// Owns the node handle, the active account and that account's scanner.
pub struct Session {
    node: Arc<dyn NodeApi>,
    storage: Option<Arc<dyn BoardStorage>>,
    config: SessionConfig,
    state: SessionState,
    scanner: Option<Arc<BlockScanner>>,
}

impl Session {
    pub fn new(node: Arc<dyn NodeApi>, config: SessionConfig) -> Self {
        Self {
            node,
            storage: None,
            config,
            state: SessionState::Locked,
            scanner: None,
        }
    }

    /// Persist scan progress of whichever account logs in.
    pub fn with_storage(mut self, storage: Arc<dyn BoardStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn account(&self) -> Option<Address> {
        match self.state {
            SessionState::Unlocked { account } => Some(account),
            SessionState::Locked => None,
        }
    }

    pub fn scanner(&self) -> Option<Arc<BlockScanner>> {
        self.scanner.clone()
    }

    /// Unlock `account` on the node, then run the initial catch-up.
    ///
    /// A refusal from the node (either `false` or a JSON-RPC error) is
    /// `IncorrectCredentials`; the session stays locked. Transport failures
    /// are reported as `Node`.
    #[instrument(skip(self, passphrase))]
    pub async fn log_in(
        &mut self,
        account: Address,
        passphrase: &str,
    ) -> Result<CatchUpReport, SessionError> {
        if passphrase.is_empty() {
            return Err(SessionError::MissingInput("passphrase"));
        }

        self.unlock(account, passphrase).await?;
        self.start(account).await
    }

    /// Create an account on the node, unlock it and run the initial
    /// catch-up. Returns the new address alongside the report.
    #[instrument(skip(self, passphrase))]
    pub async fn create_account(
        &mut self,
        passphrase: &str,
    ) -> Result<(Address, CatchUpReport), SessionError> {
        if passphrase.is_empty() {
            return Err(SessionError::MissingInput("passphrase"));
        }

        let account = self.node.new_account(passphrase).await?;
        info!(%account, "account created");

        self.unlock(account, passphrase).await?;
        let report = self.start(account).await?;
        Ok((account, report))
    }

    /// Return to the locked state and drop the scanner.
    pub fn log_out(&mut self) {
        self.state = SessionState::Locked;
        self.scanner = None;
    }

    /// Accounts known to the node, offered as message recipients.
    pub async fn recipients(&self) -> Result<Vec<Address>, SessionError> {
        Ok(self.node.list_accounts().await?)
    }

    /// Broadcast a zero-value transaction carrying `content` to `to`.
    ///
    /// Broadcast failures are returned unchanged; nothing is retried.
    #[instrument(skip(self, content), fields(len = content.len()))]
    pub async fn send_message(&self, to: &Address, content: &str) -> Result<String, SessionError> {
        let from = self.account().ok_or(SessionError::NotLoggedIn)?;
        let request = TransactionRequest::zero_value(from, *to, encode_message_data(content));

        let hash = self.node.send_transaction(&request).await?;
        info!(%from, %to, tx = %hash, "message sent");
        Ok(hash)
    }

    /// Subscription that keeps scanning as blocks arrive.
    pub fn subscribe(&self) -> Result<NewBlockSubscription, SessionError> {
        let scanner = self.scanner.clone().ok_or(SessionError::NotLoggedIn)?;
        Ok(NewBlockSubscription::new(scanner))
    }

    async fn unlock(&self, account: Address, passphrase: &str) -> Result<(), SessionError> {
        match self
            .node
            .unlock_account(&account, passphrase, self.config.unlock_duration_secs)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(SessionError::IncorrectCredentials),
            Err(err) if err.is_node_rejection() => {
                warn!(%account, %err, "node refused unlock");
                Err(SessionError::IncorrectCredentials)
            }
            Err(err) => Err(SessionError::Node(err)),
        }
    }

    async fn start(&mut self, account: Address) -> Result<CatchUpReport, SessionError> {
        let mut scanner =
            BlockScanner::new(self.node.clone(), account, self.config.scanner.clone());
        if let Some(storage) = &self.storage {
            scanner = scanner.with_storage(storage.clone());
        }
        let scanner = Arc::new(scanner);

        self.state = SessionState::Unlocked { account };
        self.scanner = Some(scanner.clone());
        info!(%account, "session unlocked");

        Ok(scanner.catch_up().await?)
    }
}
