//! Custodial SDK endpoint
//!
//! The custodian holds the keys and pins the account to one network, so this
//! backend never pushes notifications and cannot switch chains.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{ProviderKind, WalletBackend};
use crate::error::{ConnectError, TransportError};
use crate::events::{EventEmitter, Subscription, WalletEvent};
use crate::transport::HttpTransport;

/// Custodial wallet over HTTPS JSON-RPC
pub struct CustodialBackend {
    transport: HttpTransport,
    app_name: String,
    events: EventEmitter,
}

impl CustodialBackend {
    pub fn new(endpoint: url::Url, api_key: String, app_name: String) -> Result<Self, ConnectError> {
        let transport = HttpTransport::new(endpoint, Some(api_key))
            .map_err(|e| ConnectError::TransportFailure(e.to_string()))?;

        Ok(Self {
            transport,
            app_name,
            events: EventEmitter::new(),
        })
    }
}

#[async_trait]
impl WalletBackend for CustodialBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custodial
    }

    async fn connect(&self) -> Result<(), TransportError> {
        // Reachability and credential check
        let chain = self.transport.request("eth_chainId", json!([])).await?;
        info!(
            "Custodial endpoint {} reachable for {} (chain {})",
            self.transport.endpoint().host_str().unwrap_or("?"),
            self.app_name,
            chain
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Stateless over HTTP; just end any listener
        self.events.emit(WalletEvent::Disconnect {
            code: 4900,
            message: "custodial session closed".to_string(),
        });
        self.events.close();
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        match method {
            "wallet_switchEthereumChain" | "wallet_addEthereumChain" => Err(
                TransportError::Unsupported("custodial accounts are pinned to one network".into()),
            ),
            "eth_requestAccounts" => self.transport.request("eth_accounts", params).await,
            _ => self.transport.request(method, params).await,
        }
    }

    fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    fn supports_chain_switch(&self) -> bool {
        false
    }
}
