//! Event bridge
//!
//! One task per live session drains the backend subscription in order and
//! turns each wallet notification into a [`Transition`] for the broker. The
//! task tags every transition with its session id; the broker drops the ones
//! that belong to a session it has already torn down.

use std::sync::Weak;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::BrokerShared;
use crate::events::{Subscription, WalletEvent};
use crate::network::parse_chain_id;

/// Close code used when the subscription ends without a disconnect event
const TRANSPORT_LOST_CODE: i64 = 4900;

/// State change requested by a wallet notification
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    AccountSwitched(String),
    AccountsCleared,
    ChainSwitched(u64),
    WalletDisconnected { code: i64, message: String },
    Ignore,
}

impl Transition {
    /// Whether applying this transition ends the session
    pub(crate) fn ends_session(&self) -> bool {
        matches!(
            self,
            Transition::AccountsCleared | Transition::WalletDisconnected { .. }
        )
    }
}

pub(crate) fn interpret(event: WalletEvent) -> Transition {
    match event {
        WalletEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
            Some(first) => Transition::AccountSwitched(first),
            None => Transition::AccountsCleared,
        },
        WalletEvent::ChainChanged(raw) => match parse_chain_id(&raw) {
            Some(chain_id) => Transition::ChainSwitched(chain_id),
            None => {
                warn!("Ignoring undecodable chain id from wallet: {:?}", raw);
                Transition::Ignore
            }
        },
        WalletEvent::Disconnect { code, message } => {
            Transition::WalletDisconnected { code, message }
        }
        WalletEvent::Connect { chain_id } => {
            info!("Wallet reports connected (chain {:?})", chain_id);
            Transition::Ignore
        }
    }
}

/// Owns the bridge task of one live session
///
/// Dropping the handle cancels the task, which drops the subscription and
/// removes the listener from the backend.
pub(crate) struct BridgeHandle {
    cancel: CancellationToken,
}

impl BridgeHandle {
    pub(crate) fn spawn(
        session_id: u64,
        subscription: Subscription,
        broker: Weak<BrokerShared>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run(session_id, subscription, task_cancel, broker).await;
            debug!("Event bridge for session {} stopped", session_id);
        });
        Self { cancel }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    session_id: u64,
    mut subscription: Subscription,
    cancel: CancellationToken,
    broker: Weak<BrokerShared>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = subscription.recv() => event,
        };

        let transition = match event {
            Some(event) => {
                debug!("Session {} received {:?}", session_id, event);
                interpret(event)
            }
            None => {
                warn!("Wallet event stream for session {} ended", session_id);
                Transition::WalletDisconnected {
                    code: TRANSPORT_LOST_CODE,
                    message: "wallet transport closed".to_string(),
                }
            }
        };

        if transition == Transition::Ignore {
            continue;
        }

        let ends_session = transition.ends_session();
        let Some(shared) = broker.upgrade() else {
            break;
        };
        shared.apply(session_id, transition).await;
        if ends_session {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_account_wins() {
        assert_eq!(
            interpret(WalletEvent::AccountsChanged(vec!["0xA".into(), "0xB".into()])),
            Transition::AccountSwitched("0xA".into())
        );
        assert_eq!(
            interpret(WalletEvent::AccountsChanged(vec![])),
            Transition::AccountsCleared
        );
    }

    #[test]
    fn test_chain_id_decoding() {
        assert_eq!(
            interpret(WalletEvent::ChainChanged("0x5".into())),
            Transition::ChainSwitched(5)
        );
        assert_eq!(
            interpret(WalletEvent::ChainChanged("137".into())),
            Transition::ChainSwitched(137)
        );
        assert_eq!(
            interpret(WalletEvent::ChainChanged("0xzz".into())),
            Transition::Ignore
        );
    }

    #[test]
    fn test_connect_is_informational() {
        assert_eq!(
            interpret(WalletEvent::Connect {
                chain_id: Some("0x1".into())
            }),
            Transition::Ignore
        );
    }

    #[test]
    fn test_session_ending_transitions() {
        assert!(Transition::AccountsCleared.ends_session());
        assert!(Transition::WalletDisconnected {
            code: 4900,
            message: "bye".into()
        }
        .ends_session());
        assert!(!Transition::ChainSwitched(1).ends_session());
    }
}
