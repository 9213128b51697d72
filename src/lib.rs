//! Wallet Connectivity Library
//!
//! Connects a dashboard client to a user-supplied blockchain wallet
//! (browser-injected, relay-paired or custodial), keeps the account, network
//! and balance state current, and exposes a small contract call surface.

mod bridge;

pub mod broker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod contract;
pub mod error;
pub mod events;
pub mod network;
pub mod provider;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use broker::{ConnectionBroker, NoChooser, ProviderChooser};
pub use config::Config;
pub use context::WalletContext;
pub use contract::{CallOutput, ContractFacade, ContractHandle, ContractInterface, Receipt, Token};
pub use error::{CallError, ConnectError, Error, Result, SwitchError, TxError};
pub use provider::{ProviderDescriptor, ProviderKind, WalletBackend};
pub use session::{SessionState, SessionView};
