//! Session state
//!
//! [`SessionState`] is the snapshot every consumer reads. The broker is the
//! only writer: it owns the [`SessionStore`] and hands out [`SessionView`]s,
//! which are read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::network::network_name;
use crate::provider::ProviderKind;

/// Last error surfaced to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Short machine-readable kind, e.g. "connect" or "wallet_disconnect"
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Authoritative snapshot of the wallet session
///
/// `connected` implies `account_address` is set; a disconnected state never
/// carries an account, balance or provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub account_address: Option<String>,
    pub network_name: Option<String>,
    pub chain_id: Option<u64>,
    pub connected: bool,
    /// Native balance in wei, decimal string
    pub balance_wei: Option<String>,
    pub last_error: Option<ErrorInfo>,
    pub provider: Option<ProviderKind>,
}

impl SessionState {
    /// Disconnected state showing the default network
    pub fn empty(default_network: u64) -> Self {
        Self {
            account_address: None,
            network_name: Some(network_name(default_network)),
            chain_id: Some(default_network),
            connected: false,
            balance_wei: None,
            last_error: None,
            provider: None,
        }
    }

    /// Freshly connected state; balance arrives later
    pub fn connected(provider: ProviderKind, account: String, chain_id: u64) -> Self {
        Self {
            account_address: Some(account),
            network_name: Some(network_name(chain_id)),
            chain_id: Some(chain_id),
            connected: true,
            balance_wei: None,
            last_error: None,
            provider: Some(provider),
        }
    }

    /// Check the connected/account invariant
    pub fn is_consistent(&self) -> bool {
        if self.connected {
            self.account_address.is_some() && self.provider.is_some()
        } else {
            self.account_address.is_none()
                && self.balance_wei.is_none()
                && self.provider.is_none()
        }
    }
}

/// Writable side of the session state, owned by the connection broker
pub(crate) struct SessionStore {
    tx: watch::Sender<SessionState>,
    default_network: u64,
}

impl SessionStore {
    pub(crate) fn new(default_network: u64) -> Self {
        let (tx, _) = watch::channel(SessionState::empty(default_network));
        Self {
            tx,
            default_network,
        }
    }

    pub(crate) fn view(&self) -> SessionView {
        SessionView {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn set_connected(&self, provider: ProviderKind, account: String, chain_id: u64) {
        self.tx
            .send_replace(SessionState::connected(provider, account, chain_id));
    }

    /// Reset to the empty state, optionally keeping an error for display
    pub(crate) fn reset(&self, error: Option<ErrorInfo>) {
        let mut state = SessionState::empty(self.default_network);
        state.last_error = error;
        self.tx.send_replace(state);
    }

    pub(crate) fn set_account(&self, account: String) -> bool {
        self.tx.send_if_modified(|state| {
            if !state.connected || state.account_address.as_deref() == Some(account.as_str()) {
                return false;
            }
            state.account_address = Some(account);
            state.balance_wei = None;
            true
        })
    }

    pub(crate) fn set_chain(&self, chain_id: u64) -> bool {
        self.tx.send_if_modified(|state| {
            if !state.connected || state.chain_id == Some(chain_id) {
                return false;
            }
            state.chain_id = Some(chain_id);
            state.network_name = Some(network_name(chain_id));
            state.balance_wei = None;
            true
        })
    }

    /// Store a balance if it still belongs to the current account
    pub(crate) fn set_balance(&self, account: &str, balance_wei: String) -> bool {
        self.tx.send_if_modified(|state| {
            if !state.connected || state.account_address.as_deref() != Some(account) {
                return false;
            }
            state.balance_wei = Some(balance_wei);
            true
        })
    }

    pub(crate) fn record_error(&self, error: ErrorInfo) {
        self.tx.send_modify(|state| state.last_error = Some(error));
    }
}

/// Read-only, observable handle on the session state
#[derive(Clone)]
pub struct SessionView {
    rx: watch::Receiver<SessionState>,
}

impl SessionView {
    /// Current snapshot
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new snapshot
    ///
    /// Returns `None` once the owning context has been dropped.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
