//! CLI command implementations

use dialoguer::Confirm;
use tracing::info;

use crate::config::Config;
use crate::context::WalletContext;
use crate::contract::{CallOutput, ContractInterface};
use crate::error::{Error, Result};
use crate::network::{network_name, parse_chain_id};
use crate::session::SessionState;

/// List the supported wallet backends
pub fn providers(context: &WalletContext) -> Result<()> {
    println!("\n=== WALLET PROVIDERS ===\n");
    println!("{:<15} {:<20} {}", "KEY", "NAME", "OPTIONS");
    println!("{}", "-".repeat(80));
    for descriptor in context.broker().providers() {
        println!(
            "{:<15} {:<20} {}",
            descriptor.key,
            descriptor.display_name,
            serde_json::to_string(&descriptor.options)?
        );
    }
    Ok(())
}

/// Show the current session
pub async fn status(context: &WalletContext, json: bool) -> Result<()> {
    let state = context.session().current();
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_state(&state);
    }
    Ok(())
}

/// Connect to a provider, prompting when none is given
pub async fn connect(context: &WalletContext, provider: Option<&str>) -> Result<()> {
    let state = context.broker().connect(provider).await?;
    println!("\nConnected!");
    print_state(&state);
    Ok(())
}

/// End the session and forget the cached provider
pub async fn disconnect(context: &WalletContext) -> Result<()> {
    context.broker().disconnect().await;
    println!("Disconnected.");
    Ok(())
}

/// Switch the wallet to another chain (hex or decimal id)
pub async fn switch(context: &WalletContext, chain: &str) -> Result<()> {
    let chain_id = parse_chain_id(chain)
        .ok_or_else(|| Error::InvalidInput(format!("Invalid chain id: {}", chain)))?;
    context.broker().switch_network(chain_id).await?;
    println!("Switched to {} ({})", network_name(chain_id), chain_id);
    Ok(())
}

/// Invoke a contract method; state-changing methods are only submitted
pub async fn call(
    context: &WalletContext,
    address: &str,
    abi_path: &str,
    method: &str,
    args: &[String],
) -> Result<()> {
    let interface = ContractInterface::from_file(abi_path).await?;
    let tokens = interface.function(method, args.len())?.parse_args(args)?;

    let contracts = context.contracts();
    let handle = contracts.bind(address, interface).await?;
    match contracts.call(&handle, method, &tokens).await? {
        CallOutput::Values(values) => {
            if values.is_empty() {
                println!("(no return values)");
            }
            for (i, value) in values.iter().enumerate() {
                println!("[{}] {}", i, value);
            }
        }
        CallOutput::Submitted(tx_hash) => {
            println!("Transaction submitted: {}", tx_hash);
        }
    }
    Ok(())
}

/// Submit a transaction and wait for it to finalize
pub async fn transact(
    context: &WalletContext,
    address: &str,
    abi_path: &str,
    method: &str,
    args: &[String],
    force: bool,
) -> Result<()> {
    let interface = ContractInterface::from_file(abi_path).await?;
    let function = interface.function(method, args.len())?;
    let tokens = function.parse_args(args)?;
    let signature = function.signature();

    // Confirmation prompt (unless --force)
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Send {} to {}? The wallet will ask you to sign.",
                signature, address
            ))
            .default(false)
            .interact()
            .map_err(|e| Error::Io(e.to_string()))?;

        if !confirmed {
            info!("Transaction cancelled by user");
            return Ok(());
        }
    }

    let contracts = context.contracts();
    let handle = contracts.bind(address, interface).await?;
    let receipt = contracts.transact(&handle, method, &tokens).await?;

    println!("\nTransaction confirmed!");
    println!("Hash: {}", receipt.transaction_hash);
    println!("Block: {}", receipt.block_number);
    println!("Gas used: {}", receipt.gas_used);
    Ok(())
}

/// Print every session change until Ctrl-C
pub async fn watch(context: &WalletContext) -> Result<()> {
    let mut view = context.session();
    print_state(&view.current());
    println!("\nWatching for wallet changes (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
            changed = view.changed() => match changed {
                Some(state) => {
                    println!();
                    print_state(&state);
                }
                None => break,
            },
        }
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn print_state(state: &SessionState) {
    println!("\n=== WALLET SESSION ===\n");
    if state.connected {
        println!(
            "Provider: {}",
            state.provider.map(|p| p.to_string()).unwrap_or_default()
        );
        println!(
            "Account:  {}",
            state.account_address.as_deref().unwrap_or("-")
        );
    } else {
        println!("Not connected");
    }
    println!(
        "Network:  {} ({})",
        state.network_name.as_deref().unwrap_or("-"),
        state
            .chain_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(balance) = &state.balance_wei {
        println!("Balance:  {} wei", balance);
    }
    if let Some(error) = &state.last_error {
        println!(
            "Last error [{}] at {}: {}",
            error.kind,
            error.at.format("%Y-%m-%d %H:%M:%S UTC"),
            error.message
        );
    }
}
