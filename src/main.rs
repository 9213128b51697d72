//! walletctl - drive the wallet connectivity layer from a terminal
//!
//! Each invocation first tries a silent reconnect to the cached provider, so
//! `walletctl connect` once and later commands reuse that wallet.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

// Use the library crate
use wallet_connectivity::cli::{commands, DialoguerChooser};
use wallet_connectivity::config::Config;
use wallet_connectivity::context::WalletContext;
use wallet_connectivity::Error;

/// Wallet connectivity CLI
#[derive(Parser)]
#[command(name = "walletctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "wallet.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, env = "WALLETCTL_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported wallet providers
    Providers,

    /// Show the current session
    Status {
        /// Print the session state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect a wallet (prompts for a provider when none is given)
    Connect {
        /// Provider key: injected, walletconnect or custodial
        provider: Option<String>,
    },

    /// Disconnect and forget the cached provider
    Disconnect,

    /// Ask the wallet to switch networks
    Switch {
        /// Chain id, decimal (5) or hex (0x5)
        chain_id: String,
    },

    /// Call a contract method (view methods return values, others are only submitted)
    Call {
        /// Contract address
        #[arg(long)]
        address: String,

        /// Path to the contract's JSON ABI
        #[arg(long)]
        abi: String,

        /// Method name or full signature
        method: String,

        /// Method arguments
        args: Vec<String>,
    },

    /// Send a transaction and wait for it to finalize
    Transact {
        /// Contract address
        #[arg(long)]
        address: String,

        /// Path to the contract's JSON ABI
        #[arg(long)]
        abi: String,

        /// Method name or full signature
        method: String,

        /// Method arguments
        args: Vec<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Print session changes until Ctrl-C
    Watch,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.log_json)?;

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let context = WalletContext::builder(config)
        .chooser(Arc::new(DialoguerChooser))
        .build();

    let result = run(&context, cli.command).await;
    context.shutdown().await;

    if let Err(e) = result {
        if e.is_user_rejection() {
            warn!("Cancelled in the wallet: {}", e);
        } else {
            error!("Command failed: {}", e);
            if e.is_retryable() {
                warn!("The wallet endpoint looks unreachable; check it is running and retry");
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(context: &WalletContext, command: Commands) -> Result<(), Error> {
    if reconnects_first(&command) {
        context.broker().try_auto_reconnect().await;
    }

    match command {
        Commands::Providers => commands::providers(context),
        Commands::Config => commands::show_config(context.config()),
        Commands::Connect { provider } => commands::connect(context, provider.as_deref()).await,
        Commands::Disconnect => commands::disconnect(context).await,
        Commands::Status { json } => commands::status(context, json).await,
        Commands::Switch { chain_id } => commands::switch(context, &chain_id).await,
        Commands::Call {
            address,
            abi,
            method,
            args,
        } => commands::call(context, &address, &abi, &method, &args).await,
        Commands::Transact {
            address,
            abi,
            method,
            args,
            force,
        } => commands::transact(context, &address, &abi, &method, &args, force).await,
        Commands::Watch => commands::watch(context).await,
    }
}

/// Whether the command should pick up the cached wallet before running.
/// `disconnect` never does: reconnecting only to tear down would prompt the wallet.
fn reconnects_first(command: &Commands) -> bool {
    !matches!(
        command,
        Commands::Providers | Commands::Config | Commands::Connect { .. } | Commands::Disconnect
    )
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("wallet_connectivity=info".parse()?)
        .add_directive("walletctl=info".parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
    Ok(())
}
