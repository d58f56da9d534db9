//! Chainboard client: the block scanner, the new-block subscription and the
//! account session that ties them to a node.

pub mod config;
pub mod scanner;
pub mod session;
pub mod subscription;

pub use config::{BoardConfig, ScannerConfig, SessionConfig};
pub use scanner::{BlockScanner, CatchUpReport, Cursor, HaltReason, ScanError, ScanHalt};
pub use session::{Session, SessionError, SessionState};
pub use subscription::NewBlockSubscription;

#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Stderr keeps stdout free for `--json` output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
