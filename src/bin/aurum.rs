#![forbid(unsafe_code)]

use aurum::config::Config;
use aurum::keystore::Keystore;
use aurum::node::Node;
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aurum", version, about = "Aurum Proof-of-Stake blockchain node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full node
    Start(StartArgs),
    /// Create a new encrypted wallet
    #[command(name = "wallet:create")]
    WalletCreate(WalletCreateArgs),
    /// Import a private key into the keystore
    #[command(name = "wallet:import")]
    WalletImport(WalletImportArgs),
    /// List wallets in the keystore
    #[command(name = "wallet:list")]
    WalletList(WalletListArgs),
}

#[derive(Args)]
struct StartArgs {
    #[arg(long)]
    p2p_port: Option<u16>,
    #[arg(long)]
    rpc_port: Option<u16>,
    #[arg(long)]
    api_port: Option<u16>,
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    /// Network identifier; nodes on different networks refuse to peer
    #[arg(long)]
    network: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
    /// Disable the REST API server
    #[arg(long)]
    no_api: bool,
    /// Disable opportunistic peer discovery
    #[arg(long)]
    no_discovery: bool,
    #[arg(long)]
    max_peers: Option<usize>,
}

#[derive(Args)]
struct WalletCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    password: String,
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Args)]
struct WalletImportArgs {
    /// Private key as 64 hex characters
    #[arg(long)]
    private_key: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    password: String,
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Args)]
struct WalletListArgs {
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Start(args) => start(args).await,
        Command::WalletCreate(args) => wallet_create(args),
        Command::WalletImport(args) => wallet_import(args),
        Command::WalletList(args) => wallet_list(args),
    };
    if let Err(e) = result {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn start(args: StartArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load_or_init(&args.data_dir)?;
    if let Some(port) = args.p2p_port {
        config.network.p2p_port = port;
    }
    if let Some(port) = args.rpc_port {
        config.network.rpc_port = port;
    }
    if let Some(port) = args.api_port {
        config.network.api_port = port;
    }
    if let Some(network) = args.network {
        config.params.network_id = network;
    }
    if let Some(level) = args.log_level {
        config.node.log_level = level;
    }
    if args.no_api {
        config.network.enable_api = false;
    }
    if args.no_discovery {
        config.network.enable_discovery = false;
    }
    if let Some(max_peers) = args.max_peers {
        config.network.max_peers = max_peers;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.node.log_level.clone())),
        )
        .init();

    let node = Node::init(config.clone()).await?;

    #[cfg(feature = "api")]
    if config.network.enable_api {
        let state = aurum::api::ApiState { ledger: node.ledger.clone() };
        let api_port = config.network.api_port;
        tokio::spawn(async move {
            if let Err(e) = aurum::api::run_api_server(state, api_port).await {
                error!(code = e.code(), "api server failed: {}", e);
            }
        });
    }

    let runner = {
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = node.start().await {
                error!(code = e.code(), "node failed: {}", e);
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    node.stop().await;
    let _ = runner.await;
    Ok(())
}

fn open_keystore(data_dir: &Path) -> Result<Keystore, Box<dyn std::error::Error>> {
    Ok(Keystore::open(&data_dir.join("wallets"))?)
}

fn wallet_create(args: WalletCreateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let keystore = open_keystore(&args.data_dir)?;
    let record = keystore.create(&args.name, &args.password)?;

    println!("{}", "Wallet created".bright_green().bold());
    println!("  name:    {}", record.name);
    println!("  address: {}", record.address.bright_white());
    println!();
    println!(
        "{}",
        "Back up the wallet file; the private key cannot be recovered without it.".yellow()
    );
    Ok(())
}

fn wallet_import(args: WalletImportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let keystore = open_keystore(&args.data_dir)?;
    let record = keystore.import(&args.private_key, &args.name, &args.password)?;

    println!("{}", "Wallet imported".bright_green().bold());
    println!("  name:    {}", record.name);
    println!("  address: {}", record.address.bright_white());
    Ok(())
}

fn wallet_list(args: WalletListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let keystore = open_keystore(&args.data_dir)?;
    let wallets = keystore.list()?;

    if wallets.is_empty() {
        println!("{}", "No wallets found.".yellow());
        return Ok(());
    }

    println!("{}", "Wallets".bright_cyan().bold());
    for wallet in wallets {
        println!("  {}  {}", wallet.address.bright_white(), wallet.name);
    }
    Ok(())
}
