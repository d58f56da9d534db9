use std::time::Duration;

use chainboard_rpc::NodeConfig;

/// Tuning knobs for the block scanner and the new-block subscription.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// How many times a height is requested before the scan halts on it.
    pub fetch_attempts: u32,
    /// Pause between attempts for a block the node did not return.
    pub retry_delay: Duration,
    /// How often the node's block filter is polled.
    pub poll_interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            retry_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Settings for an account session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub scanner: ScannerConfig,
    /// Passed to `personal_unlockAccount`; `None` uses the node default.
    pub unlock_duration_secs: Option<u64>,
}

/// Everything needed to run a board client against one node.
#[derive(Debug, Clone, Default)]
pub struct BoardConfig {
    pub node: NodeConfig,
    pub session: SessionConfig,
}

impl BoardConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            node: NodeConfig::new(rpc_url),
            session: SessionConfig::default(),
        }
    }
}
