//! Browser-injected wallet reached through a local provider bridge

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{ProviderKind, WalletBackend};
use crate::error::TransportError;
use crate::events::Subscription;
use crate::transport::WsTransport;

/// Injected provider over a local WebSocket bridge
pub struct InjectedBackend {
    transport: WsTransport,
}

impl InjectedBackend {
    pub fn new(endpoint: url::Url, ping_interval: Duration) -> Self {
        Self {
            transport: WsTransport::new(endpoint).with_ping_interval(ping_interval),
        }
    }
}

#[async_trait]
impl WalletBackend for InjectedBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Injected
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        info!("Injected provider bridge ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.transport.disconnect().await;
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.transport.request(method, params).await
    }

    fn subscribe(&self) -> Subscription {
        self.transport.subscribe()
    }
}
