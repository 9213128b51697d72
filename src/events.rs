//! Wallet notifications and listener handles
//!
//! Backends publish [`WalletEvent`]s through an [`EventEmitter`]. Each
//! listener holds a [`Subscription`]; dropping the subscription removes the
//! listener, which is how the event bridge detaches from a torn-down session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

/// Notification originated by the wallet
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    /// Wallet reports it is connected (informational)
    Connect { chain_id: Option<String> },
    /// Exposed accounts changed; empty means the wallet locked or revoked access
    AccountsChanged(Vec<String>),
    /// Active chain changed, raw id as the wallet sent it (`"0x5"` or `"5"`)
    ChainChanged(String),
    /// Wallet side ended the session or the transport dropped
    Disconnect { code: i64, message: String },
}

impl WalletEvent {
    /// Build an event from a notification method and its params
    ///
    /// Params arrive either bare or wrapped in a single-element array,
    /// depending on the provider bridge.
    pub fn from_notification(method: &str, params: &serde_json::Value) -> Option<Self> {
        let payload = unwrap_single(params);
        match method {
            "accountsChanged" => {
                let accounts = match payload {
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    serde_json::Value::String(s) => vec![s.clone()],
                    _ => Vec::new(),
                };
                Some(WalletEvent::AccountsChanged(accounts))
            }
            "chainChanged" => {
                let raw = match payload {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(WalletEvent::ChainChanged(raw))
            }
            "disconnect" => {
                let code = payload.get("code").and_then(|c| c.as_i64()).unwrap_or(4900);
                let message = payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("wallet disconnected")
                    .to_string();
                Some(WalletEvent::Disconnect { code, message })
            }
            "connect" => {
                let chain_id = payload
                    .get("chainId")
                    .and_then(|c| c.as_str())
                    .map(str::to_string);
                Some(WalletEvent::Connect { chain_id })
            }
            _ => None,
        }
    }
}

/// `accountsChanged` may be `["0xA", "0xB"]` or `[["0xA", "0xB"]]`;
/// `chainChanged` may be `"0x1"` or `["0x1"]`
fn unwrap_single(params: &serde_json::Value) -> &serde_json::Value {
    match params {
        serde_json::Value::Array(items) if items.len() == 1 => match &items[0] {
            serde_json::Value::String(_) if params_is_account_list(items) => params,
            inner => inner,
        },
        other => other,
    }
}

fn params_is_account_list(items: &[serde_json::Value]) -> bool {
    items
        .iter()
        .all(|v| v.as_str().map(|s| s.len() == 42).unwrap_or(false))
}

struct EmitterInner {
    listeners: DashMap<u64, async_channel::Sender<WalletEvent>>,
    next_id: AtomicU64,
}

/// Fan-out of wallet events to any number of listeners
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a listener
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = async_channel::unbounded();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(id, tx);
        trace!("Listener {} subscribed", id);
        Subscription {
            id,
            rx,
            emitter: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live listener, in emission order
    pub fn emit(&self, event: WalletEvent) {
        self.inner
            .listeners
            .retain(|_, tx| tx.try_send(event.clone()).is_ok());
    }

    /// Drop all listeners; their subscriptions end after draining
    pub fn close(&self) {
        self.inner.listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

/// Listener handle; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    rx: async_channel::Receiver<WalletEvent>,
    emitter: Weak<EmitterInner>,
}

impl Subscription {
    /// Next event, or `None` once the emitter has closed and the queue is drained
    pub async fn recv(&mut self) -> Option<WalletEvent> {
        self.rx.recv().await.ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.emitter.upgrade() {
            inner.listeners.remove(&self.id);
            trace!("Listener {} removed", self.id);
        }
    }
}
