//! Scripted in-memory backend for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use super::{BackendFactory, ProviderDescriptor, ProviderKind, WalletBackend};
use crate::error::{ConnectError, TransportError};
use crate::events::{EventEmitter, Subscription, WalletEvent};

/// One canned answer, optionally delayed
pub(crate) struct Scripted {
    pub delay: Option<Duration>,
    pub result: Result<Value, TransportError>,
}

pub(crate) struct MockBackend {
    kind: ProviderKind,
    events: EventEmitter,
    accounts: Mutex<Vec<String>>,
    chain_id: Mutex<u64>,
    can_switch: bool,
    connect_error: Mutex<Option<TransportError>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Value)>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl MockBackend {
    pub fn new(kind: ProviderKind, accounts: &[&str], chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            kind,
            events: EventEmitter::new(),
            accounts: Mutex::new(accounts.iter().map(|a| a.to_string()).collect()),
            chain_id: Mutex::new(chain_id),
            can_switch: kind != ProviderKind::Custodial,
            connect_error: Mutex::new(None),
            connect_gate: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn fail_connect(&self, error: TransportError) {
        *self.connect_error.lock().unwrap() = Some(error);
    }

    /// Hold `connect` until the returned notify fires
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn set_accounts(&self, accounts: &[&str]) {
        *self.accounts.lock().unwrap() = accounts.iter().map(|a| a.to_string()).collect();
    }

    /// Queue an answer for the next call of `method`
    pub fn script(&self, method: &str, result: Result<Value, TransportError>) {
        self.script_delayed(method, None, result);
    }

    pub fn script_delayed(
        &self,
        method: &str,
        delay: Option<Duration>,
        result: Result<Value, TransportError>,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Scripted { delay, result });
    }

    pub fn emit(&self, event: WalletEvent) {
        self.events.emit(event);
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn default_answer(&self, method: &str, params: &Value) -> Result<Value, TransportError> {
        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(*self.accounts.lock().unwrap())),
            "eth_chainId" => Ok(json!(format!("0x{:x}", *self.chain_id.lock().unwrap()))),
            // 1 ETH
            "eth_getBalance" => Ok(json!("0xde0b6b3a7640000")),
            "wallet_switchEthereumChain" => {
                let raw = params[0]["chainId"].as_str().unwrap_or_default();
                let id = crate::network::parse_chain_id(raw)
                    .ok_or_else(|| TransportError::Decode("bad chain id".into()))?;
                *self.chain_id.lock().unwrap() = id;
                Ok(Value::Null)
            }
            "eth_sendTransaction" => Ok(json!(
                "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060"
            )),
            "eth_getTransactionReceipt" => Ok(Value::Null),
            other => Err(TransportError::Unsupported(other.to_string())),
        }
    }
}

#[async_trait]
impl WalletBackend for MockBackend {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.connect_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.connect_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Scripted { delay, result }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => self.default_answer(method, &params),
        }
    }

    fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    fn supports_chain_switch(&self) -> bool {
        self.can_switch
    }
}

/// Factory handing out pre-built mocks so tests can drive them afterwards
#[derive(Default)]
pub(crate) struct MockFactory {
    backends: Mutex<HashMap<ProviderKind, Arc<MockBackend>>>,
}

impl MockFactory {
    pub fn with(backends: &[Arc<MockBackend>]) -> Arc<Self> {
        let factory = Self::default();
        for backend in backends {
            factory
                .backends
                .lock()
                .unwrap()
                .insert(backend.kind(), backend.clone());
        }
        Arc::new(factory)
    }
}

impl BackendFactory for MockFactory {
    fn create(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<dyn WalletBackend>, ConnectError> {
        self.backends
            .lock()
            .unwrap()
            .get(&descriptor.key)
            .cloned()
            .map(|b| b as Arc<dyn WalletBackend>)
            .ok_or_else(|| ConnectError::TransportFailure(format!("{} unreachable", descriptor.key)))
    }
}
