//! Relay-paired remote signer
//!
//! Pairing sends a session proposal carrying the application metadata and
//! waits for the wallet to approve it. After that, requests are forwarded over
//! the relay socket like any other EIP-1193 provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ProviderKind, WalletBackend};
use crate::error::{ConnectError, TransportError};
use crate::events::Subscription;
use crate::transport::WsTransport;

/// Relay code for a proposal the user declined
const USER_REJECTED_CODE: i64 = 5000;
/// Relay code sent when the application ends the session
const USER_DISCONNECTED_CODE: i64 = 6000;

/// Methods requested for the session namespace
const SESSION_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_call",
    "eth_getBalance",
    "eth_getTransactionReceipt",
    "personal_sign",
    "wallet_switchEthereumChain",
];

#[derive(Debug, Deserialize)]
struct SessionApproval {
    topic: String,
}

/// WalletConnect-style remote signer
pub struct WalletConnectBackend {
    transport: WsTransport,
    app_name: String,
    app_url: String,
    topic: RwLock<Option<String>>,
}

impl WalletConnectBackend {
    pub fn new(
        relay_url: url::Url,
        ping_interval: Duration,
        project_id: String,
        app_name: String,
        app_url: String,
    ) -> Result<Self, ConnectError> {
        if project_id.is_empty() {
            return Err(ConnectError::TransportFailure(
                "walletconnect.project_id is not configured".to_string(),
            ));
        }

        let mut url = relay_url;
        url.query_pairs_mut().append_pair("projectId", &project_id);

        Ok(Self {
            transport: WsTransport::new(url).with_ping_interval(ping_interval),
            app_name,
            app_url,
            topic: RwLock::new(None),
        })
    }

    fn proposal(&self) -> Value {
        json!([{
            "relay": { "protocol": "irn" },
            "metadata": {
                "name": self.app_name,
                "url": self.app_url,
                "description": format!("{} wallet session", self.app_name),
            },
            "requiredNamespaces": {
                "eip155": {
                    "methods": SESSION_METHODS,
                    "events": ["accountsChanged", "chainChanged"],
                }
            }
        }])
    }

    pub async fn topic(&self) -> Option<String> {
        self.topic.read().await.clone()
    }
}

/// Relay error codes live outside the EIP-1193 range
fn map_relay_error(e: TransportError) -> TransportError {
    match e {
        TransportError::Rpc { code, message, .. } if code == USER_REJECTED_CODE => {
            TransportError::UserRejected(message)
        }
        other => other,
    }
}

#[async_trait]
impl WalletBackend for WalletConnectBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WalletConnect
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await?;

        info!("Waiting for wallet to approve session proposal...");
        let approval = self
            .transport
            .request("wc_sessionPropose", self.proposal())
            .await
            .map_err(map_relay_error);

        let approval = match approval {
            Ok(value) => value,
            Err(e) => {
                self.transport.disconnect().await;
                return Err(e);
            }
        };

        let approval: SessionApproval = serde_json::from_value(approval).map_err(|e| {
            TransportError::Decode(format!("Malformed session approval: {}", e))
        })?;

        info!("WalletConnect session approved (topic {})", approval.topic);
        *self.topic.write().await = Some(approval.topic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(topic) = self.topic.write().await.take() {
            let params = json!([{
                "topic": topic,
                "reason": { "code": USER_DISCONNECTED_CODE, "message": "User disconnected" }
            }]);
            match self.transport.request("wc_sessionDelete", params).await {
                Ok(_) => debug!("WalletConnect session {} deleted", topic),
                Err(e) => warn!("Failed to delete WalletConnect session {}: {}", topic, e),
            }
        }
        self.transport.disconnect().await;
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.transport
            .request(method, params)
            .await
            .map_err(map_relay_error)
    }

    fn subscribe(&self) -> Subscription {
        self.transport.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> WalletConnectBackend {
        WalletConnectBackend::new(
            url::Url::parse("wss://relay.example.com").unwrap(),
            Duration::from_secs(30),
            "proj-123".into(),
            "Dashboard".into(),
            "https://dash.example.com".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_project_id_required() {
        let result = WalletConnectBackend::new(
            url::Url::parse("wss://relay.example.com").unwrap(),
            Duration::from_secs(30),
            String::new(),
            "Dashboard".into(),
            "https://dash.example.com".into(),
        );
        assert!(matches!(result, Err(ConnectError::TransportFailure(_))));
    }

    #[test]
    fn test_relay_url_carries_project_id() {
        let backend = backend();
        assert_eq!(backend.transport.url().query(), Some("projectId=proj-123"));
    }

    #[test]
    fn test_proposal_metadata() {
        let proposal = backend().proposal();
        assert_eq!(proposal[0]["metadata"]["name"], "Dashboard");
        assert!(proposal[0]["requiredNamespaces"]["eip155"]["events"]
            .as_array()
            .unwrap()
            .contains(&json!("chainChanged")));
    }

    #[test]
    fn test_relay_rejection_maps_to_user_rejected() {
        let e = map_relay_error(TransportError::Rpc {
            code: 5000,
            message: "User rejected".into(),
            data: None,
        });
        assert!(matches!(e, TransportError::UserRejected(_)));
    }
}
