//! Contract interaction through the active wallet session

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{future::retry, ExponentialBackoff};
use primitive_types::U256;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::abi::{self, AbiError, ContractInterface, Function, Token};
use crate::broker::{parse_quantity, ActiveSession, ConnectionBroker};
use crate::config::WalletConfig;
use crate::error::{CallError, TransportError, TxError};

/// Result of [`ContractFacade::call`]
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    /// Decoded return values of a view or pure function
    Values(Vec<Token>),
    /// Hash of a submitted, not yet finalized transaction
    Submitted(String),
}

/// Finalized transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: U256,
    pub status: bool,
}

/// Contract bound to the session that was live at bind time
#[derive(Debug, Clone)]
pub struct ContractHandle {
    address: String,
    interface: Arc<ContractInterface>,
    session_id: u64,
}

impl ContractHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn interface(&self) -> &ContractInterface {
        &self.interface
    }
}

/// How a wallet request failed, before it is phrased as a call or tx error
enum Failure {
    Rejected,
    Reverted(Option<String>),
    SessionGone,
    Other(String),
}

fn classify(e: TransportError) -> Failure {
    match e {
        TransportError::UserRejected(_) => Failure::Rejected,
        TransportError::Closed => Failure::SessionGone,
        TransportError::Rpc {
            code,
            message,
            data,
        } if is_revert(code, &message) => Failure::Reverted(revert_reason(&message, data.as_ref())),
        other => Failure::Other(other.to_string()),
    }
}

fn is_revert(code: i64, message: &str) -> bool {
    code == 3 || message.to_ascii_lowercase().contains("revert")
}

/// Prefer the ABI-encoded reason; fall back to the node's message
fn revert_reason(message: &str, data: Option<&Value>) -> Option<String> {
    if let Some(reason) = data.and_then(revert_data).and_then(|d| abi::decode_revert_reason(&d)) {
        return Some(reason);
    }
    let lower = message.to_ascii_lowercase();
    lower
        .find("reverted:")
        .map(|at| message[at + "reverted:".len()..].trim().to_string())
        .filter(|reason| !reason.is_empty())
}

/// Wallets nest revert data differently; dig for the first hex string
fn revert_data(data: &Value) -> Option<Vec<u8>> {
    match data {
        Value::String(s) => abi::from_hex(s).filter(|d| d.len() >= 4),
        Value::Object(map) => map
            .get("data")
            .and_then(revert_data)
            .or_else(|| map.get("originalError").and_then(revert_data)),
        _ => None,
    }
}

fn call_error(failure: Failure) -> CallError {
    match failure {
        Failure::Rejected => CallError::Rejected,
        Failure::Reverted(reason) => CallError::Reverted(reason),
        Failure::SessionGone => CallError::NoActiveSession,
        Failure::Other(msg) => CallError::Transport(msg),
    }
}

impl From<AbiError> for CallError {
    fn from(e: AbiError) -> Self {
        match e {
            AbiError::UnknownMethod(name) => CallError::UnknownMethod(name),
            AbiError::Decode(msg) => CallError::Transport(msg),
            other => CallError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<AbiError> for TxError {
    fn from(e: AbiError) -> Self {
        match e {
            AbiError::UnknownMethod(name) => TxError::UnknownMethod(name),
            AbiError::Decode(msg) => TxError::Transport(msg),
            other => TxError::InvalidArgument(other.to_string()),
        }
    }
}

fn tx_error(failure: Failure, tx_hash: Option<String>) -> TxError {
    match failure {
        Failure::Rejected => TxError::Rejected,
        Failure::Reverted(reason) => TxError::Reverted { tx_hash, reason },
        Failure::SessionGone => TxError::NoActiveSession,
        Failure::Other(msg) => TxError::Transport(msg),
    }
}

enum PollError {
    Pending,
    SessionEnded,
    Failed(String),
}

/// Calls and transactions against bound contracts
#[derive(Clone)]
pub struct ContractFacade {
    broker: ConnectionBroker,
    timeout: Duration,
    poll_interval: Duration,
}

impl ContractFacade {
    pub fn new(broker: ConnectionBroker, config: &WalletConfig) -> Self {
        Self {
            broker,
            timeout: config.transaction_timeout(),
            poll_interval: config.receipt_poll_interval(),
        }
    }

    /// Bind a contract to the current session; no network traffic
    pub async fn bind(
        &self,
        address: &str,
        interface: ContractInterface,
    ) -> Result<ContractHandle, CallError> {
        let address = abi::parse_address(address)?;
        let session = self
            .broker
            .active_session()
            .await
            .ok_or(CallError::NoActiveSession)?;

        Ok(ContractHandle {
            address: abi::to_hex(&address),
            interface: Arc::new(interface),
            session_id: session.id,
        })
    }

    /// Invoke a method; state-changing methods return once submitted
    pub async fn call(
        &self,
        handle: &ContractHandle,
        method: &str,
        args: &[Token],
    ) -> Result<CallOutput, CallError> {
        let (function, data) = prepare(handle, method, args)?;
        let session = self
            .session_for(handle)
            .await
            .ok_or(CallError::NoActiveSession)?;
        let tx = tx_object(&session, handle, &data);

        if function.is_read_only() {
            debug!("eth_call {} on {}", function.signature(), handle.address);
            let raw = session
                .backend
                .request("eth_call", json!([tx, "latest"]))
                .await
                .map_err(|e| call_error(classify(e)))?;
            let bytes = raw
                .as_str()
                .and_then(abi::from_hex)
                .ok_or_else(|| CallError::Transport(format!("Malformed eth_call result: {}", raw)))?;
            // Empty return data where outputs were expected: reverted without a reason
            if bytes.is_empty() && !function.outputs.is_empty() {
                return Err(CallError::Reverted(None));
            }
            Ok(CallOutput::Values(function.decode_output(&bytes)?))
        } else {
            let tx_hash = submit(&session, tx)
                .await
                .map_err(|e| call_error(classify(e)))?;
            info!(
                "Submitted {} to {}: {}",
                function.signature(),
                handle.address,
                tx_hash
            );
            Ok(CallOutput::Submitted(tx_hash))
        }
    }

    /// Submit a transaction and wait until it is finalized
    ///
    /// A reverted transaction is reported as [`TxError::Reverted`]; the
    /// session itself stays connected.
    pub async fn transact(
        &self,
        handle: &ContractHandle,
        method: &str,
        args: &[Token],
    ) -> Result<Receipt, TxError> {
        let (function, data) = prepare(handle, method, args)?;
        let session = self
            .session_for(handle)
            .await
            .ok_or(TxError::NoActiveSession)?;
        let tx = tx_object(&session, handle, &data);

        let tx_hash = submit(&session, tx.clone())
            .await
            .map_err(|e| tx_error(classify(e), None))?;
        info!(
            "Submitted {} to {}: {}, waiting for receipt",
            function.signature(),
            handle.address,
            tx_hash
        );

        let receipt = self.await_receipt(&session, &tx_hash).await?;
        if !receipt.status {
            let reason = replay_revert_reason(&session, &tx, receipt.block_number).await;
            warn!(
                "Transaction {} reverted: {}",
                tx_hash,
                reason.as_deref().unwrap_or("no reason given")
            );
            return Err(TxError::Reverted {
                tx_hash: Some(tx_hash),
                reason,
            });
        }

        info!(
            "Transaction {} finalized in block {} (gas {})",
            tx_hash, receipt.block_number, receipt.gas_used
        );
        Ok(receipt)
    }

    async fn session_for(&self, handle: &ContractHandle) -> Option<ActiveSession> {
        self.broker
            .active_session()
            .await
            .filter(|s| s.id == handle.session_id)
    }

    /// Poll for the receipt with backoff, bounded by the transaction timeout
    async fn await_receipt(&self, session: &ActiveSession, tx_hash: &str) -> Result<Receipt, TxError> {
        let started = Instant::now();
        let policy = ExponentialBackoff {
            current_interval: self.poll_interval,
            initial_interval: self.poll_interval,
            max_interval: self.poll_interval * 8,
            // The outer timeout is the only deadline
            max_elapsed_time: None,
            ..Default::default()
        };

        let broker = &self.broker;
        let poll = || async move {
            if !broker.is_current(session.id).await {
                return Err(backoff::Error::permanent(PollError::SessionEnded));
            }
            match session
                .backend
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(value) => match parse_receipt(&value, tx_hash) {
                    Ok(Some(receipt)) => Ok(receipt),
                    Ok(None) => Err(backoff::Error::transient(PollError::Pending)),
                    Err(e) => Err(backoff::Error::permanent(PollError::Failed(e.to_string()))),
                },
                Err(TransportError::Closed) => {
                    Err(backoff::Error::permanent(PollError::SessionEnded))
                }
                Err(e @ (TransportError::Http(_) | TransportError::Connect(_))) => {
                    warn!("Receipt poll for {} failed, retrying: {}", tx_hash, e);
                    Err(backoff::Error::transient(PollError::Failed(e.to_string())))
                }
                Err(e) => Err(backoff::Error::permanent(PollError::Failed(e.to_string()))),
            }
        };

        let outcome = tokio::time::timeout(self.timeout, retry(policy, poll)).await;
        let waited_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(PollError::SessionEnded)) => Err(TxError::NoActiveSession),
            Ok(Err(PollError::Failed(msg))) => Err(TxError::Transport(msg)),
            Ok(Err(PollError::Pending)) | Err(_) => {
                warn!("Transaction {} not finalized after {}ms", tx_hash, waited_ms);
                Err(TxError::Timeout {
                    tx_hash: tx_hash.to_string(),
                    waited_ms,
                })
            }
        }
    }
}

fn prepare<'a>(
    handle: &'a ContractHandle,
    method: &str,
    args: &[Token],
) -> Result<(&'a Function, Vec<u8>), AbiError> {
    let function = handle.interface.function(method, args.len())?;
    let data = function.encode_call(args)?;
    Ok((function, data))
}

fn tx_object(session: &ActiveSession, handle: &ContractHandle, data: &[u8]) -> Value {
    json!({
        "from": session.account,
        "to": handle.address,
        "data": abi::to_hex(data),
    })
}

async fn submit(session: &ActiveSession, tx: Value) -> Result<String, TransportError> {
    let value = session
        .backend
        .request("eth_sendTransaction", json!([tx]))
        .await?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TransportError::Decode(format!("Expected a transaction hash, got {}", value)))
}

/// `None` while the transaction is still pending
fn parse_receipt(value: &Value, tx_hash: &str) -> Result<Option<Receipt>, TransportError> {
    if value.is_null() || value.get("blockNumber").map_or(true, Value::is_null) {
        return Ok(None);
    }

    let block_number = parse_quantity(&value["blockNumber"])?;
    let gas_used = match value.get("gasUsed") {
        Some(v) if !v.is_null() => parse_quantity(v)?,
        _ => U256::zero(),
    };
    // Receipts without a status field predate Byzantium and succeeded
    let status = match value.get("status") {
        Some(v) if !v.is_null() => !parse_quantity(v)?.is_zero(),
        _ => true,
    };

    Ok(Some(Receipt {
        transaction_hash: value["transactionHash"]
            .as_str()
            .unwrap_or(tx_hash)
            .to_string(),
        block_number: block_number.low_u64(),
        gas_used,
        status,
    }))
}

/// Re-run a failed transaction as a call to recover its revert reason
async fn replay_revert_reason(session: &ActiveSession, tx: &Value, block: u64) -> Option<String> {
    let block = format!("0x{:x}", block);
    match session.backend.request("eth_call", json!([tx, block])).await {
        Err(e) => match classify(e) {
            Failure::Reverted(reason) => reason,
            _ => None,
        },
        Ok(_) => None,
    }
}
