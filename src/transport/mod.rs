//! Wallet transports
//!
//! Both transports speak JSON-RPC 2.0:
//! - WebSocket (local provider bridge, WalletConnect-style relay) with
//!   wallet-pushed notifications
//! - HTTPS (custodial SDK endpoint), request/response only

pub mod http;
pub mod ws;

pub use http::HttpTransport;
pub use ws::WsTransport;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::events::WalletEvent;

/// Outgoing JSON-RPC request
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl From<RpcErrorObject> for TransportError {
    fn from(e: RpcErrorObject) -> Self {
        TransportError::from_rpc(e.code, e.message, e.data)
    }
}

/// Any incoming JSON-RPC message (response or notification)
#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Classified incoming message
#[derive(Debug)]
pub enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, TransportError>,
    },
    Notification(WalletEvent),
    Unknown,
}

/// Parse and classify a JSON-RPC message
pub fn classify(text: &str) -> Result<Incoming, TransportError> {
    let msg: RpcMessage =
        serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))?;

    if let Some(id) = msg.id.as_ref().and_then(response_id) {
        let outcome = match msg.error {
            Some(error) => Err(error.into()),
            // A missing or null result is a legitimate answer (e.g. pending receipt)
            None => Ok(msg.result.unwrap_or(Value::Null)),
        };
        return Ok(Incoming::Response { id, outcome });
    }

    if let Some(method) = msg.method.as_deref() {
        let params = msg.params.unwrap_or(Value::Null);
        if let Some(event) = WalletEvent::from_notification(method, &params) {
            return Ok(Incoming::Notification(event));
        }
    }

    Ok(Incoming::Unknown)
}

/// Decode a single JSON-RPC response body
pub fn parse_response(text: &str) -> Result<Value, TransportError> {
    match classify(text)? {
        Incoming::Response { outcome, .. } => outcome,
        _ => Err(TransportError::Decode(format!(
            "Expected JSON-RPC response, got: {}",
            &text[..text.len().min(100)]
        ))),
    }
}

fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
