//! Machi Connect demo - drives the wallet manager against scripted wallets.
//!
//! Run it twice: the second run reconnects the wallets left connected by
//! the first one.

#![allow(clippy::print_stdout)] // Demo program intentionally uses stdout

use clap::Parser;
use machi_connect::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Machi Connect demo - multi-wallet sessions over scripted EIP-1193 wallets
#[derive(Parser)]
#[command(name = "machi-connect-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (JSON)
    #[arg(short, long, env = "MACHI_CONNECT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the persisted wallet list
    #[arg(short, long, env = "MACHI_CONNECT_STATE")]
    state_dir: Option<PathBuf>,

    /// Forget previously connected wallets before starting
    #[arg(long)]
    reset: bool,

    /// Leave the wallets connected on exit so the next run reconnects them
    #[arg(long)]
    keep: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "machi_connect={level},machi_connect_demo={level},{}",
            if verbosity >= 3 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Scripted wallets standing in for browser extensions.
fn demo_wallets() -> Vec<(ProviderDetail, Arc<MockProvider>)> {
    [
        (
            "io.metamask",
            "MetaMask",
            "0x71C7656EC7ab88b098defB751B7401B5f6d8976F",
            "0x1",
        ),
        (
            "com.coinbase.wallet",
            "Coinbase Wallet",
            "0xFABB0ac9d68B0B445fB7357272Ff202C5651694a",
            "0x2105",
        ),
    ]
    .into_iter()
    .enumerate()
    .map(|(index, (rdns, name, address, chain))| {
        let provider = Arc::new(MockProvider::wallet(&[address], chain));
        let detail = ProviderDetail::new(
            ProviderInfo::new(format!("demo-{index}"), name, "data:image/svg+xml,<svg/>", rdns),
            Arc::clone(&provider) as Arc<dyn Eip1193Provider>,
        );
        (detail, provider)
    })
    .collect()
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConnectConfig::load(path).await?,
        None => ConnectConfig::default(),
    };
    let state_dir = cli
        .state_dir
        .unwrap_or_else(|| std::env::temp_dir().join("machi-connect-demo"));

    let bus = Arc::new(LocalAnnouncementBus::new());
    let manager = WalletManager::builder()
        .config(config)
        .storage(FileStorage::new(&state_dir))
        .announcement_bus(Arc::clone(&bus) as Arc<dyn AnnouncementBus>)
        .build();

    if cli.reset {
        manager.persisted_wallets().clear().await?;
    }
    let remembered = manager.persisted_wallets().load().await?;
    println!("State directory: {}", state_dir.display());
    println!("Remembered wallets: {remembered:?}");

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(?event, "wallet event");
        }
    });

    let wallets = demo_wallets();
    for (detail, _) in &wallets {
        bus.register(detail.clone());
    }

    // Discovery
    let discovery = manager.listen_to_provider_events()?;
    while manager.is_searching() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("\nDiscovered:");
    for detail in manager.available_wallets().await {
        println!("  {} ({})", detail.info.name, detail.info.rdns);
    }

    // Connect whatever auto-reconnect did not
    for (detail, _) in &wallets {
        let outcome = manager.connect(detail.clone()).await;
        println!("connect {}: {outcome:?}", detail.info.rdns);
    }
    print_wallets(&manager).await;

    // Signing through the active wallet
    let signature = manager.sign_message("Sign in to machi-connect").await?;
    println!("\nSignature: {}", shorten(&signature));

    // The second wallet switches to mainnet
    if let Some((detail, provider)) = wallets.get(1) {
        provider.emit(ProviderEventKind::ChainChanged, json!("0x1"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(state) = manager.wallet(detail.rdns()).await {
            println!("{} is now on {}", detail.info.name, state.chain().name);
        }
    }

    // Send from the first wallet
    if let Some((detail, _)) = wallets.first() {
        manager.switch_wallet(detail.rdns()).await;
        let tx = EthereumTransaction::transfer(
            "0x000000000000000000000000000000000000dEaD",
            alloy::primitives::U256::from(10_u64.pow(15)),
        );
        let hash = manager.send_transaction(tx).await?;
        println!("Sent from {}: {}", detail.info.name, shorten(&hash));
    }

    discovery.stop();
    if cli.keep {
        manager.shutdown().await;
        println!("\nWallets kept; run again to see them reconnect.");
    } else {
        manager.disconnect(DisconnectTarget::All).await;
        println!("\nAll wallets disconnected.");
    }

    Ok(())
}

async fn print_wallets(manager: &WalletManager) {
    let active = manager.active_wallet_id().await;
    println!("\nSessions:");
    for state in manager.wallets().await {
        let marker = if active.as_deref() == Some(state.id()) { "*" } else { " " };
        let chain = state.chain();
        println!(
            " {marker} {:<18} {:<14} {:<20} {:>12}  base fee {} gwei",
            state.info.name,
            state.address().map(shorten).unwrap_or_default(),
            chain.name,
            format_balance(state.balance, 4),
            format_gwei(state.gas.base_fee),
        );
    }
}
