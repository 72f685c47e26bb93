use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::contract::{
    Notice, NoticeLevel, WriteAction, WriteFailure, WriteReceipt, WriteState, WriteTracker,
};
use crate::discovery::{
    DiscoverySnapshot, GiftDiscovery, GiftRead, GiftWatcher, ReadState, collect_user_gifts,
};
use crate::models::gift::{GiftRecord, UserGift};
use crate::render;
use crate::session::WalletSession;
use crate::snapshot::GiftSnapshotFile;
use crate::state::AppState;
use crate::validation::{GiftDraft, TokenDraft, check_claimable, validate_gift};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Create, discover and claim time-locked gifts",
    long_about = None
)]
pub struct Cli {
    /// Wallet address to act as; overrides `wallet.address`
    #[arg(long, global = true, env = "CHRONOVAULT_ADDRESS")]
    pub address: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List gifts addressed to the wallet
    List(ListArgs),
    /// Follow the contract and reprint the gift list when it changes
    Watch(WatchArgs),
    /// Show a single gift by id
    Gift { id: u64 },
    /// Lock funds for a recipient until an unlock time
    Create(CreateArgs),
    /// Claim an unlocked gift
    Claim { id: u64 },
}

#[derive(Args)]
pub struct ListArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
    /// Read gifts from a JSON export instead of the chain
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

#[derive(Args)]
pub struct WatchArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CreateArgs {
    #[arg(long)]
    pub recipient: String,
    /// Decimal amount, in ETH or in whole tokens with `--token`
    #[arg(long)]
    pub amount: String,
    /// RFC 3339, `YYYY-MM-DDTHH:MM` local time, or Unix seconds
    #[arg(long)]
    pub unlock: String,
    #[arg(long, default_value = "")]
    pub message: String,
    /// ERC-20 token address; locks tokens instead of ETH
    #[arg(long, value_name = "ADDR")]
    pub token: Option<String>,
    /// Token decimals, defaults to `discovery.token_decimals`
    #[arg(long, requires = "token")]
    pub decimals: Option<u8>,
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let address = cli.address.as_deref();
    match cli.command {
        Command::List(args) => match args.snapshot {
            Some(path) => list_offline(&config, address, &path, args.json).await,
            None => {
                let state = AppState::connect(config, address).await?;
                list(&state, args.json).await
            }
        },
        Command::Watch(args) => {
            let state = AppState::connect(config, address).await?;
            watch_gifts(&state, args.json).await
        }
        Command::Gift { id } => {
            let state = AppState::connect(config, address).await?;
            show_gift(&state, id).await
        }
        Command::Create(args) => {
            let state = AppState::connect(config, address).await?;
            create(&state, args).await
        }
        Command::Claim { id } => {
            let state = AppState::connect(config, address).await?;
            claim(&state, id).await
        }
    }
}

async fn list(state: &AppState, json: bool) -> Result<()> {
    let mut discovery = GiftDiscovery::new(
        Arc::new(state.gateway.clone()),
        state.session.clone(),
        state.config.discovery.clone(),
    );
    let snapshot = discovery.discover().await?;
    print_listing(&snapshot, json)
}

async fn list_offline(
    config: &AppConfig,
    address: Option<&str>,
    path: &Path,
    json: bool,
) -> Result<()> {
    let reader = GiftSnapshotFile::load(path)?;
    let session = match address.or(config.wallet.address.as_deref()) {
        Some(address) => WalletSession::connected(address)?,
        None => WalletSession::disconnected(),
    };
    let mut discovery =
        GiftDiscovery::new(Arc::new(reader), session, config.discovery.clone());
    let snapshot = discovery.discover().await?;
    print_listing(&snapshot, json)
}

fn print_listing(snapshot: &DiscoverySnapshot, json: bool) -> Result<()> {
    let now = Utc::now();
    if json {
        println!("{}", render::render_listing_json(snapshot, now)?);
    } else {
        print!("{}", render::render_listing(snapshot, now));
    }
    Ok(())
}

async fn watch_gifts(state: &AppState, json: bool) -> Result<()> {
    let discovery = GiftDiscovery::new(
        Arc::new(state.gateway.clone()),
        state.session.clone(),
        state.config.discovery.clone(),
    );
    let (watcher, handle) = GiftWatcher::new(discovery, &state.config.discovery);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    let mut snapshots = handle.snapshots();
    let mut printed: Option<Vec<UserGift>> = None;
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    eprintln!("Watching for gifts. Press Enter to refresh, Ctrl-C to stop.");
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.is_loading || printed.as_ref() == Some(&snapshot.gifts) {
                    continue;
                }
                print_listing(&snapshot, json)?;
                printed = Some(snapshot.gifts);
            }
            line = input.next_line(), if input_open => {
                match line {
                    Ok(Some(_)) => {
                        if !handle.refetch() {
                            debug!("Refetch already queued");
                        }
                    }
                    Ok(None) => input_open = false,
                    Err(err) => {
                        debug!("Stdin closed: {err}");
                        input_open = false;
                    }
                }
            }
            signal = &mut ctrl_c => {
                if let Err(err) = signal {
                    error!("Failed to listen for shutdown signal: {err}");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    shutdown_tx.send(true).ok();
    match watcher_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("Gift watcher terminated with error: {err:#}"),
        Err(join_err) => error!("Gift watcher task join error: {join_err}"),
    }
    info!(
        uptime_secs = state.start_time.elapsed().as_secs(),
        gifts = handle.latest().gifts.len(),
        "Gift watcher stopped"
    );
    Ok(())
}

async fn show_gift(state: &AppState, id: u64) -> Result<()> {
    let raw = state
        .gateway
        .fetch_gift(id)
        .await
        .with_context(|| format!("Failed to read gift #{id}"))?;
    let record = GiftRecord::from_raw(id, &raw);
    if !record.exists() {
        return Err(anyhow!("Gift #{id} does not exist"));
    }
    let gift = UserGift::from_record(&record, state.config.discovery.token_decimals);
    print!("{}", render::render_gift(&gift, Utc::now()));
    println!("  To:     {}", render::format_address(&gift.recipient));
    if state.session.is_own_address(&gift.recipient) {
        println!("  (addressed to this wallet)");
    }
    Ok(())
}

async fn create(state: &AppState, args: CreateArgs) -> Result<()> {
    let draft = GiftDraft {
        recipient: args.recipient,
        amount: args.amount,
        unlock: args.unlock,
        message: args.message,
        token: args.token.map(|address| TokenDraft {
            address,
            decimals: args
                .decimals
                .unwrap_or(state.config.discovery.token_decimals),
        }),
    };
    let gift = validate_gift(&draft, &state.session, Utc::now())?;

    let tracker = WriteTracker::new();
    let progress = tokio::spawn(follow_write(tracker.subscribe()));
    let result = match &gift.token {
        None => {
            state
                .gateway
                .create_eth_gift(
                    &gift.recipient,
                    gift.unlock_time,
                    &gift.message_uri,
                    &gift.amount,
                    &tracker,
                )
                .await
        }
        Some(token) => {
            state
                .gateway
                .create_token_gift(
                    &gift.recipient,
                    gift.unlock_time,
                    &token.address,
                    &gift.amount,
                    token.decimals,
                    &gift.message_uri,
                    &tracker,
                )
                .await
        }
    };
    progress.await.ok();

    finish_write(&tracker, result, WriteAction::CreateGift, "Gift box created successfully!")
}

async fn claim(state: &AppState, id: u64) -> Result<()> {
    let raw = state
        .gateway
        .fetch_gift(id)
        .await
        .with_context(|| format!("Failed to read gift #{id}"))?;
    let reads = [GiftRead {
        id,
        state: ReadState::Loaded(Some(raw)),
    }];
    let gifts = collect_user_gifts(
        &reads,
        &state.session,
        state.config.discovery.token_decimals,
    );
    check_claimable(&gifts, id, Utc::now())?;

    let tracker = WriteTracker::new();
    let progress = tokio::spawn(follow_write(tracker.subscribe()));
    let result = state.gateway.claim(id, &tracker).await;
    progress.await.ok();

    finish_write(&tracker, result, WriteAction::ClaimGift, "Gift claimed successfully!")
}

async fn follow_write(mut states: watch::Receiver<WriteState>) {
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        match state {
            WriteState::Submitting => eprintln!("Submitting transaction..."),
            WriteState::Confirming { hash } => {
                eprintln!("Transaction {hash} sent, waiting for confirmation...")
            }
            WriteState::Confirmed { .. } | WriteState::Failed(_) => break,
            WriteState::Idle => {}
        }
    }
}

/// Reports a settled write from its tracker and resets the tracker once the
/// outcome has been shown.
fn finish_write(
    tracker: &WriteTracker,
    result: Result<WriteReceipt, WriteFailure>,
    action: WriteAction,
    success: &str,
) -> Result<()> {
    assert!(!tracker.is_pending(), "Write must settle before it is reported");
    if let Ok(receipt) = &result {
        info!(tx_hash = %receipt.hash, block = ?receipt.block_number, "Write confirmed");
    }

    let notice = if tracker.is_success() {
        Notice::success(success)
    } else {
        let failure = tracker
            .error()
            .or_else(|| result.err())
            .unwrap_or_else(|| WriteFailure::Other(String::new()));
        if failure.is_contract_paused() {
            warn!("Gift contract is paused, write rejected");
        }
        failure.notice(action)
    };
    debug!(
        display_ms = notice.duration.as_millis() as u64,
        "Notice: {}", notice.message
    );
    match notice.level {
        NoticeLevel::Success => {
            println!("{}", notice.message);
            if let Some(hash) = tracker.state().hash() {
                println!("Transaction: {hash}");
            }
            tracker.reset();
            Ok(())
        }
        NoticeLevel::Error => Err(anyhow!(notice.message)),
    }
}
