//! Delegated Session CLI
//!
//! Command-line front-end: loads the credential, drives the session
//! controller and prints its projections.

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, Bytes, U256};
use clap::{Parser, Subcommand};
use delegated_session::chain::{ChainReader, RpcChainClient};
use delegated_session::gas::BundlerGasOracle;
use delegated_session::poll::cancel_pair;
use delegated_session::registry::DelegateRegistry;
use delegated_session::relay::BundlerClient;
use delegated_session::wallet::{Credential, KeySigner};
use delegated_session::{
    BatchCall, Collaborators, Config, Error, Result, RpcConfig, SessionController,
    PRIVATE_KEY_ENV,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Bundler used when no relay is configured (a local alto/skandha instance)
const DEFAULT_BUNDLER_URL: &str = "http://localhost:4337";

#[derive(Parser)]
#[command(name = "delegated-session")]
#[command(about = "EIP-7702 delegation and sponsored batch intents for one account")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the account address derived from PRIVATE_KEY
    Address,

    /// Show on-chain state of the account and its delegation
    Account,

    /// Delegate the account to the DeleGator and wait for inclusion
    Authorize,

    /// Submit calls as one sponsored intent and wait for the receipt
    SendBatch {
        /// Call as TO[:VALUE[:DATA]] (value in wei, data hex); repeatable
        #[arg(long = "call")]
        calls: Vec<String>,

        /// JSON file with an array of {to, value, data}
        #[arg(long)]
        calls_file: Option<PathBuf>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Address => {
            let signer = KeySigner::initialize(&Credential::from_env(PRIVATE_KEY_ENV)?)?;
            println!("{}", signer.address());
        }
        Commands::Account => {
            run_account(&config).await?;
        }
        Commands::Authorize => {
            run_authorize(&config).await?;
        }
        Commands::SendBatch { calls, calls_file } => {
            run_send_batch(&config, calls, calls_file).await?;
        }
        Commands::Config => {
            let mut shown = config.clone();
            shown.relay.url = shown.relay.url.as_deref().map(redact_url);
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

fn collaborators(config: &Config) -> Result<Collaborators> {
    let rpc_config = RpcConfig::from_env();
    let chain = Arc::new(RpcChainClient::from_rpc_config(&rpc_config, config.chain_id)?);

    let relay_url = config.relay.url.clone().unwrap_or_else(|| {
        tracing::debug!(url = DEFAULT_BUNDLER_URL, "No relay configured, using local bundler");
        DEFAULT_BUNDLER_URL.to_string()
    });

    Ok(Collaborators {
        reader: chain.clone(),
        writer: chain,
        oracle: Arc::new(BundlerGasOracle::new(relay_url.clone(), config.relay.fee_tier)),
        relay: Arc::new(BundlerClient::new(relay_url, config.relay.sponsored)),
        registry: Arc::new(DelegateRegistry::new()),
    })
}

/// Controller with a session already established from PRIVATE_KEY
async fn open_session(config: &Config) -> Result<SessionController> {
    let controller = SessionController::from_config(config, collaborators(config)?);

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = events.recv().await {
            tracing::info!(status = ?change.status, account = ?change.account, "Session status");
        }
    });

    controller
        .create_session(&Credential::from_env(PRIVATE_KEY_ENV)?)
        .await?;
    Ok(controller)
}

async fn run_account(config: &Config) -> Result<()> {
    let signer = KeySigner::initialize(&Credential::from_env(PRIVATE_KEY_ENV)?)?;
    let registry = DelegateRegistry::new();
    let deployment = registry.lookup(config.chain_id)?;
    let client = RpcChainClient::from_rpc_config(&RpcConfig::from_env(), config.chain_id)?;

    let state = client
        .read(signer.address(), config.chain_id)
        .await
        .map_err(|e| Error::NonceResolution(e.to_string()))?;

    println!("Account:  {}", signer.address());
    println!("Chain:    {} ({})", deployment.name, config.chain_id);
    println!("Nonce:    {}", state.nonce);
    println!("Balance:  {} ETH", format_ether(state.balance));
    match state.delegation() {
        Some(delegate) if delegate == deployment.delegate => {
            println!("Delegate: {} (DeleGator)", delegate)
        }
        Some(delegate) => println!("Delegate: {} (unknown implementation)", delegate),
        None => println!("Delegate: none"),
    }
    Ok(())
}

async fn run_authorize(config: &Config) -> Result<()> {
    let controller = open_session(config).await?;

    let result = controller.send_authorization().await;
    report(config, &controller, result).await
}

async fn run_send_batch(
    config: &Config,
    raw_calls: Vec<String>,
    calls_file: Option<PathBuf>,
) -> Result<()> {
    let mut calls = match calls_file {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str::<Vec<BatchCall>>(&content)?
        }
        None => Vec::new(),
    };
    for raw in &raw_calls {
        calls.push(parse_call(raw)?);
    }

    let controller = open_session(config).await?;

    // Ctrl-C stops waiting; the intent stays with the relay
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, no longer waiting for the receipt");
            handle.cancel();
        }
    });

    let result = controller.send_batch_cancellable(calls, token).await;
    report(config, &controller, result).await
}

async fn report(
    config: &Config,
    controller: &SessionController,
    result: Result<delegated_session::SubmissionReceipt>,
) -> Result<()> {
    let view = controller.view().await;
    println!("{}", serde_json::to_string_pretty(&view)?);

    let registry = DelegateRegistry::new();
    match &result {
        Ok(receipt) => {
            if let (Some(hash), Ok(deployment)) =
                (receipt.confirmed_hash, registry.lookup(config.chain_id))
            {
                println!("Confirmed: {}", deployment.tx_url(&hash.to_string()));
            }
        }
        Err(e) => {
            if let Some(reference) = e.submission_ref() {
                println!("Issued {} before failing; look it up later", reference);
            }
        }
    }
    result.map(|_| ())
}

/// Parse `TO[:VALUE[:DATA]]`
fn parse_call(raw: &str) -> Result<BatchCall> {
    fn invalid(raw: &str, what: &str, e: impl std::fmt::Display) -> Error {
        Error::Config(format!("Invalid {} in --call {}: {}", what, raw, e))
    }

    let mut parts = raw.splitn(3, ':');
    let to: Address = parts
        .next()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|e| invalid(raw, "address", e))?;
    let value = match parts.next().map(str::trim) {
        Some(v) if !v.is_empty() => v.parse::<U256>().map_err(|e| invalid(raw, "value", e))?,
        _ => U256::ZERO,
    };
    let data = match parts.next().map(str::trim) {
        Some(d) if !d.is_empty() => d.parse::<Bytes>().map_err(|e| invalid(raw, "data", e))?,
        _ => Bytes::new(),
    };
    Ok(BatchCall::new(to, value, data))
}

/// Drop query strings, which carry provider API keys
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if url.query().is_some() {
                url.set_query(Some("REDACTED"));
            }
            url.to_string()
        }
        Err(_) => "[invalid url]".to_string(),
    }
}
