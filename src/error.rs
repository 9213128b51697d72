//! Error types for the wallet connectivity layer
//!
//! Each user-facing operation has its own error enum so callers can match on
//! the outcomes they are expected to display. [`Error`] wraps all of them for
//! code that only needs to propagate.

use thiserror::Error;

use crate::contract::abi::AbiError;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a wallet transport (WebSocket or HTTP JSON-RPC)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport connection failed: {0}")]
    Connect(String),

    #[error("Transport closed")]
    Closed,

    #[error("User rejected the request: {0}")]
    UserRejected(String),

    #[error("Request not authorized by wallet: {0}")]
    Unauthorized(String),

    #[error("Method or chain not supported by wallet: {0}")]
    Unsupported(String),

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed wallet response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Map a JSON-RPC / EIP-1193 error object onto a transport error
    pub fn from_rpc(code: i64, message: String, data: Option<serde_json::Value>) -> Self {
        match code {
            4001 => TransportError::UserRejected(message),
            4100 => TransportError::Unauthorized(message),
            4200 | 4902 | -32601 => TransportError::Unsupported(message),
            4900 | 4901 => TransportError::Closed,
            _ => TransportError::Rpc {
                code,
                message,
                data,
            },
        }
    }
}

/// Errors from `ConnectionBroker::connect`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Connection cancelled by user")]
    UserCancelled,

    #[error("Wallet backend unreachable: {0}")]
    TransportFailure(String),

    #[error("Wallet reported no accounts")]
    NoAccounts,

    #[error("Unknown wallet provider: {0}")]
    UnknownProvider(String),

    #[error("Connection superseded by a disconnect request")]
    Superseded,
}

impl From<TransportError> for ConnectError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::UserRejected(_) => ConnectError::UserCancelled,
            other => ConnectError::TransportFailure(other.to_string()),
        }
    }
}

/// Errors from `ConnectionBroker::switch_network`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwitchError {
    #[error("Wallet backend cannot switch networks: {0}")]
    Unsupported(String),

    #[error("Network switch rejected by user")]
    Rejected,

    #[error("No active wallet session")]
    NoActiveSession,

    #[error("Network switch failed: {0}")]
    TransportFailure(String),
}

impl From<TransportError> for SwitchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::UserRejected(_) => SwitchError::Rejected,
            TransportError::Unsupported(msg) => SwitchError::Unsupported(msg),
            TransportError::Closed => SwitchError::NoActiveSession,
            other => SwitchError::TransportFailure(other.to_string()),
        }
    }
}

/// Errors from `ContractFacade::bind` and `ContractFacade::call`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Call reverted: {}", .0.as_deref().unwrap_or("no reason given"))]
    Reverted(Option<String>),

    #[error("No active wallet session")]
    NoActiveSession,

    #[error("Request rejected by user")]
    Rejected,

    #[error("Unknown contract method: {0}")]
    UnknownMethod(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Call failed: {0}")]
    Transport(String),
}

/// Errors from `ContractFacade::transact`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxError {
    #[error("Transaction rejected by user")]
    Rejected,

    #[error("Transaction reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Reverted {
        tx_hash: Option<String>,
        reason: Option<String>,
    },

    #[error("Transaction {tx_hash} not finalized after {waited_ms}ms")]
    Timeout { tx_hash: String, waited_ms: u64 },

    #[error("No active wallet session")]
    NoActiveSession,

    #[error("Unknown contract method: {0}")]
    UnknownMethod(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transaction failed: {0}")]
    Transport(String),
}

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    // Operation errors
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    // ABI errors
    #[error("Invalid contract interface: {0}")]
    Abi(#[from] AbiError),

    // Bad command-line or caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Connect(_))
                | Error::Transport(TransportError::Http(_))
                | Error::Connect(ConnectError::TransportFailure(_))
        )
    }

    /// Check if this error came from the user declining something in the wallet
    pub fn is_user_rejection(&self) -> bool {
        matches!(
            self,
            Error::Connect(ConnectError::UserCancelled)
                | Error::Switch(SwitchError::Rejected)
                | Error::Call(CallError::Rejected)
                | Error::Tx(TxError::Rejected)
                | Error::Transport(TransportError::UserRejected(_))
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_code_mapping() {
        assert!(matches!(
            TransportError::from_rpc(4001, "denied".into(), None),
            TransportError::UserRejected(_)
        ));
        assert!(matches!(
            TransportError::from_rpc(4902, "unknown chain".into(), None),
            TransportError::Unsupported(_)
        ));
        assert_eq!(
            TransportError::from_rpc(4900, "gone".into(), None),
            TransportError::Closed
        );
        assert!(matches!(
            TransportError::from_rpc(-32000, "execution reverted".into(), None),
            TransportError::Rpc { code: -32000, .. }
        ));
    }

    #[test]
    fn test_connect_error_from_transport() {
        assert_eq!(
            ConnectError::from(TransportError::UserRejected("no".into())),
            ConnectError::UserCancelled
        );
        assert!(matches!(
            ConnectError::from(TransportError::Connect("refused".into())),
            ConnectError::TransportFailure(_)
        ));
    }

    #[test]
    fn test_switch_error_from_transport() {
        assert_eq!(
            SwitchError::from(TransportError::UserRejected("no".into())),
            SwitchError::Rejected
        );
        assert!(matches!(
            SwitchError::from(TransportError::Unsupported("4902".into())),
            SwitchError::Unsupported(_)
        ));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Tx(TxError::Rejected).is_user_rejection());
        assert!(!Error::Tx(TxError::NoActiveSession).is_user_rejection());
        assert!(Error::Transport(TransportError::Connect("x".into())).is_retryable());
        assert!(!Error::Abi(AbiError::UnknownMethod("mint".into())).is_retryable());
    }

    #[test]
    fn test_reverted_display() {
        let e = CallError::Reverted(Some("insufficient allowance".into()));
        assert_eq!(e.to_string(), "Call reverted: insufficient allowance");
        let e = CallError::Reverted(None);
        assert_eq!(e.to_string(), "Call reverted: no reason given");
    }
}
