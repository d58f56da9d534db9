use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chainboard_client::{
    init_logging, BlockScanner, BoardConfig, CatchUpReport, Cursor, NewBlockSubscription,
    ScannerConfig, Session, SessionConfig,
};
use chainboard_rpc::http::DEFAULT_RPC_URL;
use chainboard_rpc::{Address, JsonRpcNode, Message, NodeApi, NodeConfig};
use chainboard_storage::{BoardStorage, JsonFileStorage};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DEFAULT_STATE_PATH: &str = "chainboard_db/state.json";

#[derive(Parser)]
#[command(name = "chainboard", about = "Message board carried in Ethereum transactions", version)]
struct Cli {
    /// JSON-RPC endpoint of the node
    #[arg(long, global = true, env = "CHAINBOARD_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Where scan cursors are kept between runs
    #[arg(long, global = true, env = "CHAINBOARD_STATE", default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,

    /// Do not read or write the state file
    #[arg(long, global = true)]
    no_state: bool,

    /// Block filter poll interval for `watch`
    #[arg(
        long,
        global = true,
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_ms: u64,

    /// Attempts per block before a scan halts on it
    #[arg(long, global = true, default_value_t = 3)]
    fetch_attempts: u32,

    /// Per-request timeout
    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(subcommand)]
    Account(AccountCommand),
    /// Log in and post a message to another account.
    Send(SendArgs),
    /// Scan unread blocks once and print relevant messages.
    Scan(ScanArgs),
    /// Scan, then keep printing messages as new blocks arrive.
    Watch {
        #[arg(long)]
        account: String,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Create an account on the node and unlock it.
    Create(PassphraseArgs),
    /// List the accounts the node knows, i.e. possible recipients.
    List,
    /// Unlock an account and show its messages.
    Login {
        #[arg(long)]
        account: String,
        #[command(flatten)]
        passphrase: PassphraseArgs,
    },
}

#[derive(Args)]
struct PassphraseArgs {
    #[arg(long, env = "CHAINBOARD_PASSPHRASE", hide_env_values = true)]
    passphrase: String,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    #[arg(long)]
    message: String,
    #[command(flatten)]
    passphrase: PassphraseArgs,
}

#[derive(Args)]
struct ScanArgs {
    #[arg(long)]
    account: String,
    /// First height to scan; ignores and leaves the stored cursor alone
    #[arg(long)]
    start: Option<u64>,
    /// Last height to scan (defaults to the chain head)
    #[arg(long)]
    end: Option<u64>,
    /// Forget the stored cursor and scan from genesis
    #[arg(long, conflicts_with = "start")]
    rescan: bool,
}

#[derive(Serialize)]
struct AccountSummary {
    account: Address,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct SentSummary {
    tx_hash: String,
    from: Address,
    to: Address,
    messages: Vec<Message>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match &cli.command {
        Command::Account(cmd) => handle_account(&cli, cmd).await,
        Command::Send(args) => handle_send(&cli, args).await,
        Command::Scan(args) => handle_scan(&cli, args).await,
        Command::Watch { account } => handle_watch(&cli, account).await,
    }
}

async fn handle_account(cli: &Cli, cmd: &AccountCommand) -> Result<()> {
    match cmd {
        AccountCommand::Create(args) => {
            let mut session = build_session(cli)?;
            let (account, report) = session
                .create_account(&args.passphrase)
                .await
                .context("account creation failed")?;

            render(
                cli,
                AccountSummary {
                    account,
                    messages: report.messages,
                },
                |s| {
                    println!("Account address: {}", s.account);
                },
            );
        }
        AccountCommand::List => {
            let node = build_node(&board_config(cli))?;
            let accounts = node
                .list_accounts()
                .await
                .context("could not list accounts")?;

            render(cli, accounts, |accounts| {
                for account in accounts {
                    println!("{account}");
                }
            });
        }
        AccountCommand::Login {
            account,
            passphrase,
        } => {
            let account = parse_address(account)?;
            let mut session = build_session(cli)?;
            let report = session
                .log_in(account, &passphrase.passphrase)
                .await
                .with_context(|| format!("login as {account} failed"))?;

            render(
                cli,
                AccountSummary {
                    account,
                    messages: report.messages.clone(),
                },
                |_| print_report(&report),
            );
        }
    }

    Ok(())
}

async fn handle_send(cli: &Cli, args: &SendArgs) -> Result<()> {
    let from = parse_address(&args.from)?;
    let to = parse_address(&args.to)?;

    let mut session = build_session(cli)?;
    let report = session
        .log_in(from, &args.passphrase.passphrase)
        .await
        .with_context(|| format!("login as {from} failed"))?;

    let tx_hash = session
        .send_message(&to, &args.message)
        .await
        .context("broadcast failed")?;

    render(
        cli,
        SentSummary {
            tx_hash,
            from,
            to,
            messages: report.messages.clone(),
        },
        |s| {
            print_report(&report);
            println!("Sent: {}", s.tx_hash);
        },
    );

    Ok(())
}

async fn handle_scan(cli: &Cli, args: &ScanArgs) -> Result<()> {
    let account = parse_address(&args.account)?;
    let config = board_config(cli);
    let node = build_node(&config)?;

    let mut scanner = BlockScanner::new(node, account, config.session.scanner.clone());

    match args.start {
        Some(start) => {
            let cursor = start.checked_sub(1).map_or(Cursor::BEFORE_GENESIS, Cursor::at);
            scanner = scanner.starting_at(cursor);
        }
        None => {
            if let Some(storage) = build_storage(cli)? {
                if args.rescan && storage.reset_cursor(&account)? {
                    info!(%account, "stored cursor cleared");
                }
                scanner = scanner.with_storage(storage);
            }
        }
    }

    let report = scanner
        .catch_up_until(args.end)
        .await
        .context("scan failed")?;

    render(cli, report, print_report);
    Ok(())
}

async fn handle_watch(cli: &Cli, account: &str) -> Result<()> {
    let account = parse_address(account)?;
    let config = board_config(cli);
    let node = build_node(&config)?;

    let mut scanner = BlockScanner::new(node, account, config.session.scanner.clone());
    if let Some(storage) = build_storage(cli)? {
        scanner = scanner.with_storage(storage);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                warn!(%err, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    });

    info!(version = banner(), %account, "watching for new blocks");

    let json = cli.json;
    NewBlockSubscription::new(Arc::new(scanner))
        .run(shutdown_rx, move |report| {
            if json {
                for message in &report.messages {
                    if let Ok(line) = serde_json::to_string(message) {
                        println!("{line}");
                    }
                }
            } else {
                print_report(&report);
            }
        })
        .await
        .context("initial scan failed")?;

    Ok(())
}

fn banner() -> &'static str {
    chainboard::chainboard_version!()
}

fn board_config(cli: &Cli) -> BoardConfig {
    BoardConfig {
        node: NodeConfig {
            rpc_url: cli.rpc_url.clone(),
            request_timeout: Duration::from_secs(cli.timeout_secs),
        },
        session: SessionConfig {
            scanner: ScannerConfig {
                fetch_attempts: cli.fetch_attempts,
                poll_interval: Duration::from_millis(cli.poll_interval_ms),
                ..ScannerConfig::default()
            },
            unlock_duration_secs: None,
        },
    }
}

fn build_node(config: &BoardConfig) -> Result<Arc<dyn NodeApi>> {
    let node = JsonRpcNode::new(&config.node).context("failed to build HTTP client")?;
    Ok(Arc::new(node))
}

fn build_storage(cli: &Cli) -> Result<Option<Arc<dyn BoardStorage>>> {
    if cli.no_state {
        return Ok(None);
    }

    let storage = JsonFileStorage::load_or_init(&cli.state)
        .with_context(|| format!("cannot open state file {}", cli.state.display()))?;
    debug!(path = %storage.path().display(), "scan state loaded");
    Ok(Some(Arc::new(storage)))
}

fn build_session(cli: &Cli) -> Result<Session> {
    let config = board_config(cli);
    let node = build_node(&config)?;

    let mut session = Session::new(node, config.session);
    if let Some(storage) = build_storage(cli)? {
        session = session.with_storage(storage);
    }
    Ok(session)
}

fn parse_address(raw: &str) -> Result<Address> {
    if raw.trim().is_empty() {
        bail!("no account address given");
    }
    raw.parse()
        .with_context(|| format!("invalid account address {raw:?}"))
}

fn print_message(message: &Message) {
    println!("Sender:\t\t{}", message.from);
    println!("Recipient:\t{}", message.to);
    println!("{}", message.content);
    println!();
}

fn print_report(report: &CatchUpReport) {
    for message in &report.messages {
        print_message(message);
    }

    if let Some(halt) = &report.halted {
        eprintln!(
            "scan stopped at block {} after {} attempt(s): {:?}",
            halt.height, halt.attempts, halt.reason
        );
    }
}

fn render<T, F>(cli: &Cli, value: T, printer: F)
where
    T: Serialize,
    F: FnOnce(&T),
{
    if cli.json {
        if let Ok(out) = serde_json::to_string_pretty(&value) {
            println!("{out}");
            return;
        }
    }
    printer(&value);
}
