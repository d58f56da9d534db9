use std::sync::Arc;
use std::time::Duration;

use chainboard_client::{
    BlockScanner, CatchUpReport, NewBlockSubscription, ScannerConfig, Session, SessionConfig,
    SessionError,
};
use chainboard_rpc::memory::MemoryNode;
use chainboard_rpc::NodeApi;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> SessionConfig {
    SessionConfig {
        scanner: ScannerConfig {
            fetch_attempts: 1,
            retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
        },
        unlock_duration_secs: None,
    }
}

async fn next_with_messages(rx: &mut mpsc::UnboundedReceiver<CatchUpReport>) -> CatchUpReport {
    loop {
        let report = timeout(WAIT, rx.recv())
            .await
            .expect("report before timeout")
            .expect("subscription still running");
        if !report.messages.is_empty() {
            return report;
        }
    }
}

#[tokio::test]
async fn subscribe_requires_login() {
    let node: Arc<dyn NodeApi> = Arc::new(MemoryNode::new());
    let session = Session::new(node, config());

    assert!(matches!(session.subscribe(), Err(SessionError::NotLoggedIn)));
}

#[tokio::test]
async fn new_blocks_trigger_catch_up() {
    let node = Arc::new(MemoryNode::new());
    let a = node.add_account("pw");
    let b = node.add_account("pw");

    let dyn_node: Arc<dyn NodeApi> = node.clone();
    let mut alice = Session::new(dyn_node.clone(), config());
    alice.log_in(a, "pw").await.unwrap();

    let mut bob = Session::new(dyn_node, config());
    bob.log_in(b, "pw").await.unwrap();

    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let subscription = alice.subscribe().unwrap();
    let handle = tokio::spawn(subscription.run(shutdown_rx, move |report| {
        let _ = report_tx.send(report);
    }));

    // The initial catch-up is always reported, even when empty.
    let initial = timeout(WAIT, report_rx.recv()).await.unwrap().unwrap();
    assert!(initial.messages.is_empty());

    bob.send_message(&a, "ping").await.unwrap();
    let first = next_with_messages(&mut report_rx).await;
    assert_eq!(first.messages.len(), 1);
    assert_eq!(first.messages[0].content, "ping");

    bob.send_message(&a, "pong").await.unwrap();
    let second = next_with_messages(&mut report_rx).await;
    let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["pong"]);

    shutdown_tx.send(true).unwrap();
    timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn stops_when_shutdown_sender_drops() {
    let node = Arc::new(MemoryNode::new());
    let a = node.add_account("pw");

    let mut session = Session::new(node.clone(), config());
    session.log_in(a, "pw").await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(session.subscribe().unwrap().run(shutdown_rx, |_| {}));

    drop(shutdown_tx);
    timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn halted_height_is_retried_while_chain_is_idle() {
    let node = Arc::new(MemoryNode::new());
    let a = node.add_account("pw");
    let b = node.add_account("pw");

    let mut alice = Session::new(node.clone(), config());
    alice.log_in(a, "pw").await.unwrap();

    let mut bob = Session::new(node.clone(), config());
    bob.log_in(b, "pw").await.unwrap();
    bob.send_message(&a, "behind the gap").await.unwrap();
    let head = node.head();

    // Outlasts the initial run, the post-filter rescan and a few ticks.
    node.withhold_block(head, 5);

    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(alice.subscribe().unwrap().run(shutdown_rx, move |report| {
        let _ = report_tx.send(report);
    }));

    let initial = timeout(WAIT, report_rx.recv()).await.unwrap().unwrap();
    assert!(!initial.is_complete());
    assert_eq!(initial.halted.as_ref().map(|h| h.height), Some(head));

    let report = next_with_messages(&mut report_rx).await;
    assert_eq!(report.messages[0].content, "behind the gap");
    assert!(report.is_complete());
    assert_eq!(node.head(), head, "no new block was needed");

    shutdown_tx.send(true).unwrap();
    timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn zero_poll_interval_is_clamped() {
    let node = Arc::new(MemoryNode::new());
    let a = node.add_account("pw");

    let dyn_node: Arc<dyn NodeApi> = node.clone();
    let scanner_config = ScannerConfig {
        poll_interval: Duration::ZERO,
        ..config().scanner
    };
    let scanner = Arc::new(BlockScanner::new(dyn_node, a, scanner_config));

    let subscription = NewBlockSubscription::new(scanner.clone());
    assert!(subscription.poll_interval() > Duration::ZERO);

    let subscription = NewBlockSubscription::new(scanner).with_poll_interval(Duration::ZERO);
    assert!(subscription.poll_interval() > Duration::ZERO);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(subscription.run(shutdown_rx, |_| {}));

    node.push_empty_blocks(3);
    sleep(Duration::from_millis(50)).await;

    shutdown_tx.send(true).unwrap();
    timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}
