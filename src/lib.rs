//! Chainboard: a message board whose posts are zero-value Ethereum
//! transactions carrying a small JSON payload.
//!
//! The workspace is split the same way at runtime:
//! - [`rpc`] speaks JSON-RPC to the node and decodes message payloads
//! - [`storage`] keeps the per-account scan cursor between runs
//! - [`client`] scans blocks, follows the chain and drives a login session

pub use chainboard_client as client;
pub use chainboard_rpc as rpc;
pub use chainboard_storage as storage;

// -----------------------------------------------------------------------------
// Version Macro
// -----------------------------------------------------------------------------

/// Returns `"Chainboard vX.Y.Z"` using this crate's package version.
///
/// # Example
/// ```
/// println!("{}", chainboard::chainboard_version!());
/// ```
#[macro_export]
macro_rules! chainboard_version {
    () => {
        concat!("Chainboard v", env!("CARGO_PKG_VERSION"))
    };
}
