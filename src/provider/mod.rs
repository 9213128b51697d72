//! Wallet backends
//!
//! The supported backends form a closed set ([`ProviderKind`]); each one sits
//! behind the same [`WalletBackend`] capability interface.
//!
//! # Architecture
//!
//! ```text
//! ProviderRegistry → BackendFactory → WalletBackend (injected | walletconnect | custodial)
//!                                          ↓
//!                                   WsTransport / HttpTransport
//! ```

pub mod custodial;
pub mod injected;
pub mod registry;
pub mod walletconnect;

#[cfg(test)]
pub(crate) mod mock;

pub use custodial::CustodialBackend;
pub use injected::InjectedBackend;
pub use registry::{ProviderDescriptor, ProviderOptions, ProviderRegistry};
pub use walletconnect::WalletConnectBackend;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConnectError, TransportError};
use crate::events::Subscription;

/// Supported wallet backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Browser-injected provider, reached through a local provider bridge
    Injected,
    /// Remote signer paired through a relay
    WalletConnect,
    /// Custodial SDK endpoint
    Custodial,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Injected,
        ProviderKind::WalletConnect,
        ProviderKind::Custodial,
    ];

    /// Registry key
    pub fn key(&self) -> &'static str {
        match self {
            ProviderKind::Injected => "injected",
            ProviderKind::WalletConnect => "walletconnect",
            ProviderKind::Custodial => "custodial",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for ProviderKind {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "injected" | "metamask" | "browser" => Ok(ProviderKind::Injected),
            "walletconnect" => Ok(ProviderKind::WalletConnect),
            "custodial" => Ok(ProviderKind::Custodial),
            _ => Err(ConnectError::UnknownProvider(s.to_string())),
        }
    }
}

/// Capability interface every wallet backend provides
#[async_trait]
pub trait WalletBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Open the transport and complete any pairing handshake
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the transport
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// EIP-1193 style request
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Register a listener for wallet notifications
    fn subscribe(&self) -> Subscription;

    /// Whether `wallet_switchEthereumChain` can be honored at all
    fn supports_chain_switch(&self) -> bool {
        true
    }
}

/// Builds backends from registry descriptors
pub trait BackendFactory: Send + Sync {
    fn create(&self, descriptor: &ProviderDescriptor)
        -> Result<Arc<dyn WalletBackend>, ConnectError>;
}

/// Factory producing the real backends
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<dyn WalletBackend>, ConnectError> {
        let backend: Arc<dyn WalletBackend> = match &descriptor.options {
            ProviderOptions::Injected {
                endpoint,
                ping_interval_secs,
            } => Arc::new(InjectedBackend::new(
                parse_url(endpoint)?,
                Duration::from_secs(*ping_interval_secs),
            )),
            ProviderOptions::WalletConnect {
                relay_url,
                ping_interval_secs,
                project_id,
                app_name,
                app_url,
            } => Arc::new(WalletConnectBackend::new(
                parse_url(relay_url)?,
                Duration::from_secs(*ping_interval_secs),
                project_id.clone(),
                app_name.clone(),
                app_url.clone(),
            )?),
            ProviderOptions::Custodial {
                endpoint,
                api_key,
                app_name,
            } => Arc::new(CustodialBackend::new(
                parse_url(endpoint)?,
                api_key.clone(),
                app_name.clone(),
            )?),
        };
        Ok(backend)
    }
}

fn parse_url(raw: &str) -> Result<url::Url, ConnectError> {
    url::Url::parse(raw)
        .map_err(|e| ConnectError::TransportFailure(format!("Invalid endpoint {}: {}", raw, e)))
}
