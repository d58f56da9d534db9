use std::process::{Command, Output};

// Nothing listens here; requests fail fast with "connection refused".
const DEAD_NODE: &str = "http://127.0.0.1:9";

fn chainboard(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_chainboard"))
        .env_remove("CHAINBOARD_RPC_URL")
        .env_remove("CHAINBOARD_PASSPHRASE")
        .env_remove("CHAINBOARD_STATE")
        .args(["--rpc-url", DEAD_NODE, "--timeout-secs", "2", "--no-state"])
        .args(args)
        .output()
        .expect("failed to run chainboard")
}

#[test]
fn malformed_account_fails_before_contacting_the_node() {
    let output = chainboard(&["scan", "--account", "0x1234"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid account address"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn send_requires_a_passphrase() {
    let output = chainboard(&[
        "send",
        "--from",
        "0x00000000000000000000000000000000000000aa",
        "--to",
        "0x00000000000000000000000000000000000000bb",
        "--message",
        "hi",
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--passphrase"));
}

#[test]
fn unreachable_node_is_reported() {
    let output = chainboard(&["account", "list"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("could not list accounts"));
    assert!(output.stdout.is_empty(), "nothing printed on failure");
}

#[test]
fn version_flag_prints_the_binary_name() {
    let output = Command::new(env!("CARGO_BIN_EXE_chainboard"))
        .arg("--version")
        .output()
        .expect("failed to run chainboard");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("chainboard "), "unexpected stdout: {stdout}");
}

#[test]
fn zero_poll_interval_is_a_usage_error() {
    let output = chainboard(&[
        "watch",
        "--account",
        "0x00000000000000000000000000000000000000aa",
        "--poll-interval-ms",
        "0",
    ]);

    assert_eq!(output.status.code(), Some(2), "clap usage errors exit with 2");
    assert!(String::from_utf8_lossy(&output.stderr).contains("--poll-interval-ms"));
}
