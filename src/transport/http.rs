//! JSON-RPC over HTTPS for custodial wallet endpoints

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::{parse_response, RpcRequest};
use crate::error::TransportError;

/// Request timeout enforced by the HTTP client itself
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// HTTP JSON-RPC transport
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(endpoint: url::Url, api_key: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|k| !k.is_empty()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("-> {} (id {}) via HTTP", method, id);

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .json(&RpcRequest::new(id, method, &params));

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(format!("Failed to read response: {}", e)))?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TransportError::Unauthorized(format!("HTTP {}", status)))
            }
            s if s.is_success() => parse_response(&body),
            s => Err(TransportError::Http(format!(
                "HTTP {}: {}",
                s,
                &body[..body.len().min(200)]
            ))),
        }
    }
}
