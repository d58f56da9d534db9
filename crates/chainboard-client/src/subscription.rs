use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::scanner::{BlockScanner, CatchUpReport, ScanError};

/// Shortest poll interval; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Live discovery of new messages.
///
/// Polls a node block filter and re-runs the scanner's catch-up whenever
/// the node reports new blocks. The cursor bounds every run, so a spurious
/// or repeated trigger never re-emits a message.
pub struct NewBlockSubscription {
    scanner: Arc<BlockScanner>,
    poll_interval: Duration,
}

impl NewBlockSubscription {
    pub fn new(scanner: Arc<BlockScanner>) -> Self {
        let poll_interval = scanner.config().poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            scanner,
            poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn scanner(&self) -> &Arc<BlockScanner> {
        &self.scanner
    }

    /// Run until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Order of events:
    /// 1. initial catch-up, always reported;
    /// 2. block filter installed;
    /// 3. one more catch-up for blocks sealed in between;
    /// 4. poll loop, one catch-up per tick that saw new blocks.
    ///
    /// Only the initial catch-up can fail the call. Later failures are
    /// logged and retried on the next tick, reinstalling the filter if the
    /// node dropped it. A run that halted is repeated on every tick until it
    /// completes, whether or not new blocks arrived. Reports from later runs
    /// are delivered only when they scanned something or newly halted.
    #[instrument(skip_all, fields(account = %self.scanner.account()))]
    pub async fn run<F>(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: F,
    ) -> Result<(), ScanError>
    where
        F: FnMut(CatchUpReport) + Send,
    {
        let initial = self.scanner.catch_up().await?;
        let mut pending = !initial.is_complete();
        on_report(initial);

        let mut filter = self.install_filter().await;
        pending = self.rescan(&mut on_report, pending).await.unwrap_or(pending);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let poll = match filter.as_deref() {
                Some(id) => Some(self.scanner.node().block_filter_changes(id).await),
                None => None,
            };

            let trigger = match poll {
                Some(Ok(hashes)) => {
                    if !hashes.is_empty() {
                        debug!(new_blocks = hashes.len(), "block filter fired");
                    }
                    !hashes.is_empty()
                }
                Some(Err(err)) => {
                    warn!(%err, "block filter poll failed, reinstalling");
                    filter = None;
                    true
                }
                None => {
                    filter = self.install_filter().await;
                    true
                }
            };

            if trigger || pending {
                pending = self.rescan(&mut on_report, pending).await.unwrap_or(true);
            }
        }

        if let Some(id) = filter {
            if let Err(err) = self.scanner.node().uninstall_filter(&id).await {
                debug!(%err, "could not uninstall block filter");
            }
        }

        info!("subscription stopped");
        Ok(())
    }

    async fn install_filter(&self) -> Option<String> {
        match self.scanner.node().new_block_filter().await {
            Ok(id) => {
                debug!(filter = %id, "block filter installed");
                Some(id)
            }
            Err(err) => {
                warn!(%err, "could not install block filter");
                None
            }
        }
    }

    /// Run one catch-up. Returns whether it stopped short of the head, or
    /// `None` when it could not run at all. A halt that repeats the previous
    /// one without progress is not reported again.
    async fn rescan<F>(&self, on_report: &mut F, was_halted: bool) -> Option<bool>
    where
        F: FnMut(CatchUpReport) + Send,
    {
        match self.scanner.catch_up().await {
            Ok(report) => {
                let halted = !report.is_complete();
                if report.blocks_scanned > 0 || (halted && !was_halted) {
                    on_report(report);
                }
                Some(halted)
            }
            Err(err) => {
                warn!(%err, "catch-up failed, retrying on next tick");
                None
            }
        }
    }
}
