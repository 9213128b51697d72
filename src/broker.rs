//! Connection broker
//!
//! The broker owns the single live session and is the only writer of
//! [`SessionState`]. User operations are serialized by an operation lock;
//! wallet notifications arrive through the event bridge and are applied under
//! the live-session lock, tagged with the session they came from.
//!
//! # Flow
//!
//! ```text
//! connect ──→ ProviderRegistry ──→ BackendFactory ──→ WalletBackend
//!                                                        │ subscribe
//!    SessionView ←── SessionStore ←── apply ←── BridgeHandle
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use primitive_types::U256;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeHandle, Transition};
use crate::cache::SelectionCache;
use crate::config::WalletConfig;
use crate::error::{ConnectError, SwitchError, TransportError};
use crate::network::{chain_id_from_value, network_name, to_hex_chain_id};
use crate::provider::{
    BackendFactory, ProviderDescriptor, ProviderKind, ProviderRegistry, WalletBackend,
};
use crate::session::{ErrorInfo, SessionState, SessionStore, SessionView};

/// External UI concern: let the user pick a backend
#[async_trait]
pub trait ProviderChooser: Send + Sync {
    /// `None` means the user dismissed the chooser
    async fn choose(&self, providers: &[ProviderDescriptor]) -> Option<ProviderKind>;
}

/// Chooser for headless use; always declines
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChooser;

#[async_trait]
impl ProviderChooser for NoChooser {
    async fn choose(&self, _providers: &[ProviderDescriptor]) -> Option<ProviderKind> {
        None
    }
}

/// The one established connection
struct LiveSession {
    id: u64,
    provider: ProviderKind,
    backend: Arc<dyn WalletBackend>,
    /// Dropped with the session, which stops the event bridge
    _bridge: BridgeHandle,
    /// Parent of every balance refresh token
    cancel: CancellationToken,
    refresh_seq: u64,
    refresh_token: Option<CancellationToken>,
}

/// What the contract facade needs from the current session
pub(crate) struct ActiveSession {
    pub id: u64,
    pub backend: Arc<dyn WalletBackend>,
    pub account: String,
}

pub(crate) struct BrokerShared {
    config: WalletConfig,
    registry: ProviderRegistry,
    factory: Arc<dyn BackendFactory>,
    cache: Arc<dyn SelectionCache>,
    chooser: Arc<dyn ProviderChooser>,
    store: SessionStore,
    live: Mutex<Option<LiveSession>>,
    op_lock: Mutex<()>,
    disconnect_requests: AtomicU64,
    next_session_id: AtomicU64,
}

/// Establishes, maintains and tears down the wallet session
#[derive(Clone)]
pub struct ConnectionBroker {
    shared: Arc<BrokerShared>,
}

impl ConnectionBroker {
    pub fn new(
        config: WalletConfig,
        registry: ProviderRegistry,
        factory: Arc<dyn BackendFactory>,
        cache: Arc<dyn SelectionCache>,
        chooser: Arc<dyn ProviderChooser>,
    ) -> Self {
        let store = SessionStore::new(config.default_network);
        Self {
            shared: Arc::new(BrokerShared {
                config,
                registry,
                factory,
                cache,
                chooser,
                store,
                live: Mutex::new(None),
                op_lock: Mutex::new(()),
                disconnect_requests: AtomicU64::new(0),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Read-only, observable session state
    pub fn session(&self) -> SessionView {
        self.shared.store.view()
    }

    pub fn snapshot(&self) -> SessionState {
        self.shared.store.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot().connected
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.shared.registry.descriptors().to_vec()
    }

    /// Connect to a backend, asking the chooser when no key is given
    ///
    /// Any existing session is torn down first. A `disconnect` requested while
    /// this call is in flight wins: the new backend is closed again and
    /// [`ConnectError::Superseded`] is returned.
    pub async fn connect(&self, provider_key: Option<&str>) -> Result<SessionState, ConnectError> {
        let ticket = self.shared.disconnect_requests.load(Ordering::SeqCst);
        let _op = self.shared.op_lock.lock().await;

        let result = match self.shared.resolve(provider_key).await {
            Ok(descriptor) => self.shared.establish(descriptor, ticket).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(state) => info!(
                "Connected {} on {}",
                state.account_address.as_deref().unwrap_or("?"),
                state.network_name.as_deref().unwrap_or("?")
            ),
            Err(ConnectError::Superseded) => info!("Connect superseded by disconnect"),
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.shared
                    .store
                    .record_error(ErrorInfo::new("connect", e.to_string()));
            }
        }
        result
    }

    /// End the session and forget the cached selection; idempotent
    pub async fn disconnect(&self) {
        self.shared.disconnect_requests.fetch_add(1, Ordering::SeqCst);
        let _op = self.shared.op_lock.lock().await;

        if self.shared.end_session(None).await {
            info!("Wallet disconnected");
        } else {
            debug!("Disconnect requested with no active session");
        }
        self.shared.cache.clear().await;
    }

    /// Ask the wallet to move to another chain
    ///
    /// On success the new chain is applied right away; failures leave the
    /// session state untouched.
    pub async fn switch_network(&self, chain_id: u64) -> Result<(), SwitchError> {
        let _op = self.shared.op_lock.lock().await;

        let (session_id, provider, backend) = {
            let live = self.shared.live.lock().await;
            let session = live.as_ref().ok_or(SwitchError::NoActiveSession)?;
            (session.id, session.provider, session.backend.clone())
        };

        if !backend.supports_chain_switch() {
            return Err(SwitchError::Unsupported(format!(
                "{} wallets are pinned to one network",
                provider
            )));
        }

        info!("Requesting switch to {} ({})", network_name(chain_id), chain_id);
        backend
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": to_hex_chain_id(chain_id) }]),
            )
            .await?;

        if !self
            .shared
            .apply(session_id, Transition::ChainSwitched(chain_id))
            .await
        {
            return Err(SwitchError::NoActiveSession);
        }
        Ok(())
    }

    /// Reconnect silently to the cached provider, if any
    ///
    /// Never fails; problems are logged and the current state is returned.
    pub async fn try_auto_reconnect(&self) -> SessionState {
        if !self.shared.config.cache_selection {
            debug!("Selection caching disabled, skipping auto-reconnect");
            return self.snapshot();
        }

        let ticket = self.shared.disconnect_requests.load(Ordering::SeqCst);
        let _op = self.shared.op_lock.lock().await;

        if self.is_connected() {
            return self.snapshot();
        }

        let Some(cached) = self.shared.cache.load().await else {
            debug!("No cached provider selection");
            return self.snapshot();
        };

        let Some(descriptor) = self.shared.registry.lookup(&cached.provider).cloned() else {
            warn!(
                "Cached provider '{}' is no longer supported, clearing it",
                cached.provider
            );
            self.shared.cache.clear().await;
            return self.snapshot();
        };

        info!(
            "Reconnecting to {} (cached {})",
            descriptor.display_name,
            cached.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
        match self.shared.establish(descriptor, ticket).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Auto-reconnect failed: {}", e);
                self.snapshot()
            }
        }
    }

    /// Tear down the session but keep the cached selection
    pub async fn shutdown(&self) {
        let _op = self.shared.op_lock.lock().await;
        if self.shared.end_session(None).await {
            info!("Wallet session closed");
        }
    }

    pub(crate) async fn active_session(&self) -> Option<ActiveSession> {
        let live = self.shared.live.lock().await;
        let session = live.as_ref()?;
        let account = self.shared.store.snapshot().account_address?;
        Some(ActiveSession {
            id: session.id,
            backend: session.backend.clone(),
            account,
        })
    }

    pub(crate) async fn is_current(&self, session_id: u64) -> bool {
        self.shared
            .live
            .lock()
            .await
            .as_ref()
            .map(|s| s.id == session_id)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<BrokerShared> {
        &self.shared
    }
}

impl BrokerShared {
    async fn resolve(&self, provider_key: Option<&str>) -> Result<ProviderDescriptor, ConnectError> {
        match provider_key {
            Some(key) => self
                .registry
                .lookup(key)
                .cloned()
                .ok_or_else(|| ConnectError::UnknownProvider(key.to_string())),
            None => {
                let kind = self
                    .chooser
                    .choose(self.registry.descriptors())
                    .await
                    .ok_or(ConnectError::UserCancelled)?;
                self.registry
                    .get(kind)
                    .cloned()
                    .ok_or_else(|| ConnectError::UnknownProvider(kind.to_string()))
            }
        }
    }

    /// Replace any live session with a new one on `descriptor`
    async fn establish(
        self: &Arc<Self>,
        descriptor: ProviderDescriptor,
        ticket: u64,
    ) -> Result<SessionState, ConnectError> {
        self.end_session(None).await;

        let backend = self.factory.create(&descriptor)?;
        info!("Connecting to {}", descriptor.display_name);
        backend.connect().await?;

        // Listen before the handshake so no notification is missed
        let subscription = backend.subscribe();
        let (account, chain_id) = match handshake(backend.as_ref()).await {
            Ok(found) => found,
            Err(e) => {
                close_backend(backend.as_ref()).await;
                return Err(e);
            }
        };

        if self.disconnect_requests.load(Ordering::SeqCst) != ticket {
            close_backend(backend.as_ref()).await;
            return Err(ConnectError::Superseded);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut live = self.live.lock().await;
            let mut session = LiveSession {
                id,
                provider: descriptor.key,
                backend,
                _bridge: BridgeHandle::spawn(id, subscription, Arc::downgrade(self)),
                cancel: CancellationToken::new(),
                refresh_seq: 0,
                refresh_token: None,
            };
            self.store
                .set_connected(descriptor.key, account.clone(), chain_id);
            self.start_refresh(&mut session, account);
            *live = Some(session);
        }

        if self.config.cache_selection {
            self.cache.store(descriptor.key).await;
        }
        Ok(self.store.snapshot())
    }

    /// Drop the live session and reset state; returns whether one existed
    async fn end_session(&self, error: Option<ErrorInfo>) -> bool {
        let mut live = self.live.lock().await;
        let Some(session) = live.take() else {
            return false;
        };
        self.close_session(session).await;
        self.store.reset(error);
        true
    }

    async fn close_session(&self, session: LiveSession) {
        debug!("Closing session {} ({})", session.id, session.provider);
        session.cancel.cancel();
        close_backend(session.backend.as_ref()).await;
    }

    /// Apply a wallet-driven transition
    ///
    /// Returns `false` when `session_id` is not the live session, in which
    /// case nothing changes.
    pub(crate) async fn apply(self: &Arc<Self>, session_id: u64, transition: Transition) -> bool {
        let mut live = self.live.lock().await;
        if live.as_ref().map(|s| s.id) != Some(session_id) {
            debug!(
                "Dropping {:?} from stale session {}",
                transition, session_id
            );
            return false;
        }

        match transition {
            Transition::AccountSwitched(account) => {
                if self.store.set_account(account.clone()) {
                    info!("Account switched to {}", account);
                    if let Some(session) = live.as_mut() {
                        self.start_refresh(session, account);
                    }
                }
            }
            Transition::ChainSwitched(chain_id) => {
                if self.store.set_chain(chain_id) {
                    info!("Network changed to {} ({})", network_name(chain_id), chain_id);
                    let account = self.store.snapshot().account_address;
                    if let (Some(session), Some(account)) = (live.as_mut(), account) {
                        self.start_refresh(session, account);
                    }
                }
            }
            Transition::AccountsCleared => {
                info!("Wallet exposes no accounts, ending session");
                if let Some(session) = live.take() {
                    self.close_session(session).await;
                }
                self.store.reset(None);
            }
            Transition::WalletDisconnected { code, message } => {
                warn!("Wallet disconnected ({}): {}", code, message);
                if let Some(session) = live.take() {
                    self.close_session(session).await;
                }
                self.cache.clear().await;
                self.store.reset(Some(ErrorInfo::new(
                    "wallet_disconnect",
                    format!("{} (code {})", message, code),
                )));
            }
            Transition::Ignore => {}
        }
        true
    }

    /// Start a balance refresh, cancelling the one in flight
    fn start_refresh(self: &Arc<Self>, session: &mut LiveSession, account: String) {
        session.refresh_seq += 1;
        let seq = session.refresh_seq;
        let token = session.cancel.child_token();
        if let Some(previous) = session.refresh_token.replace(token.clone()) {
            previous.cancel();
        }

        let session_id = session.id;
        let backend = session.backend.clone();
        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Balance refresh {} for session {} cancelled", seq, session_id);
                    return;
                }
                result = fetch_balance(backend.as_ref(), &account) => result,
            };
            if let Some(shared) = shared.upgrade() {
                shared.finish_refresh(session_id, seq, &account, result).await;
            }
        });
    }

    async fn finish_refresh(
        &self,
        session_id: u64,
        seq: u64,
        account: &str,
        result: Result<String, TransportError>,
    ) {
        let live = self.live.lock().await;
        let current = live
            .as_ref()
            .map(|s| s.id == session_id && s.refresh_seq == seq)
            .unwrap_or(false);
        if !current {
            debug!("Dropping stale balance for {}", account);
            return;
        }

        match result {
            Ok(wei) => {
                if self.store.set_balance(account, wei.clone()) {
                    debug!("Balance of {}: {} wei", account, wei);
                }
            }
            Err(e) => warn!("Balance refresh for {} failed: {}", account, e),
        }
    }
}

/// First exposed account and the active chain
async fn handshake(backend: &dyn WalletBackend) -> Result<(String, u64), ConnectError> {
    let accounts = backend.request("eth_requestAccounts", json!([])).await?;
    let accounts: Vec<String> = serde_json::from_value(accounts)
        .map_err(|e| ConnectError::TransportFailure(format!("Malformed account list: {}", e)))?;
    let account = accounts.into_iter().next().ok_or(ConnectError::NoAccounts)?;

    let chain = backend.request("eth_chainId", json!([])).await?;
    let chain_id = chain_id_from_value(&chain)
        .ok_or_else(|| ConnectError::TransportFailure(format!("Malformed chain id: {}", chain)))?;

    Ok((account, chain_id))
}

async fn close_backend(backend: &dyn WalletBackend) {
    if let Err(e) = backend.disconnect().await {
        warn!("Error closing {} backend: {}", backend.kind(), e);
    }
}

async fn fetch_balance(backend: &dyn WalletBackend, account: &str) -> Result<String, TransportError> {
    let value = backend
        .request("eth_getBalance", json!([account, "latest"]))
        .await?;
    parse_quantity(&value).map(|wei| wei.to_string())
}

/// Decode a JSON-RPC hex quantity
pub(crate) fn parse_quantity(value: &Value) -> Result<U256, TransportError> {
    let raw = value
        .as_str()
        .ok_or_else(|| TransportError::Decode(format!("Expected hex quantity, got {}", value)))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Decode(format!("Bad quantity {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySelectionCache;
    use crate::config::Config;
    use crate::events::WalletEvent;
    use crate::provider::mock::{MockBackend, MockFactory};
    use std::time::Duration;

    const A: &str = "0x00000000000000000000000000000000000000aa";
    const B: &str = "0x00000000000000000000000000000000000000bb";
    const ONE_ETH: &str = "1000000000000000000";

    struct PickFirst;

    #[async_trait]
    impl ProviderChooser for PickFirst {
        async fn choose(&self, providers: &[ProviderDescriptor]) -> Option<ProviderKind> {
            providers.first().map(|d| d.key)
        }
    }

    fn broker_with(
        backends: &[Arc<MockBackend>],
        cache: Arc<MemorySelectionCache>,
        cache_selection: bool,
    ) -> ConnectionBroker {
        let mut config = Config::default();
        config.wallet.cache_selection = cache_selection;
        ConnectionBroker::new(
            config.wallet.clone(),
            ProviderRegistry::from_config(&config),
            MockFactory::with(backends),
            cache,
            Arc::new(NoChooser),
        )
    }

    fn injected(accounts: &[&str], chain_id: u64) -> Arc<MockBackend> {
        MockBackend::new(ProviderKind::Injected, accounts, chain_id)
    }

    async fn wait_until<F>(view: &mut SessionView, predicate: F) -> SessionState
    where
        F: Fn(&SessionState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let state = view.current();
                if predicate(&state) {
                    return state;
                }
                view.changed().await;
            }
        })
        .await
        .expect("session state never reached the expected shape")
    }

    #[tokio::test]
    async fn test_connect_then_chain_change() {
        let mock = injected(&["0xABC"], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);

        let state = broker.connect(Some("injected")).await.unwrap();
        assert!(state.connected);
        assert_eq!(state.account_address.as_deref(), Some("0xABC"));
        assert_eq!(state.network_name.as_deref(), Some("mainnet"));
        assert_eq!(state.provider, Some(ProviderKind::Injected));

        let mut view = broker.session();
        mock.emit(WalletEvent::ChainChanged("0x5".into()));
        let state = wait_until(&mut view, |s| s.chain_id == Some(5)).await;
        assert_eq!(state.network_name.as_deref(), Some("goerli"));
        assert_eq!(state.account_address.as_deref(), Some("0xABC"));
        assert!(state.connected);
    }

    #[tokio::test]
    async fn test_unknown_chain_gets_generic_name() {
        let mock = injected(&[A], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();

        let mut view = broker.session();
        mock.emit(WalletEvent::ChainChanged("777".into()));
        let state = wait_until(&mut view, |s| s.chain_id == Some(777)).await;
        assert_eq!(state.network_name.as_deref(), Some("chain-777"));
    }

    #[tokio::test]
    async fn test_balance_populated_after_connect() {
        let mock = injected(&[A], 1);
        let broker = broker_with(&[mock], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();

        let mut view = broker.session();
        let state = wait_until(&mut view, |s| s.balance_wei.is_some()).await;
        assert_eq!(state.balance_wei.as_deref(), Some(ONE_ETH));
    }

    #[tokio::test]
    async fn test_accounts_emptied_ends_session() {
        let mock = injected(&[A], 1);
        let cache = Arc::new(MemorySelectionCache::new());
        let broker = broker_with(&[mock.clone()], cache.clone(), true);
        broker.connect(Some("injected")).await.unwrap();

        let mut view = broker.session();
        mock.emit(WalletEvent::AccountsChanged(vec![B.into(), A.into()]));
        let state = wait_until(&mut view, |s| s.account_address.as_deref() == Some(B)).await;
        assert!(state.connected);

        mock.emit(WalletEvent::AccountsChanged(vec![]));
        let state = wait_until(&mut view, |s| !s.connected).await;
        assert!(state.account_address.is_none());
        assert!(state.is_consistent());
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
        // Locking the wallet is not a logout
        assert!(cache.load().await.is_some());
    }

    #[tokio::test]
    async fn test_wallet_disconnect_event() {
        let mock = injected(&[A], 1);
        let cache = Arc::new(MemorySelectionCache::new());
        let broker = broker_with(&[mock.clone()], cache.clone(), true);
        broker.connect(Some("injected")).await.unwrap();

        let mut view = broker.session();
        mock.emit(WalletEvent::Disconnect {
            code: 1013,
            message: "session expired".into(),
        });
        let state = wait_until(&mut view, |s| !s.connected).await;
        let error = state.last_error.unwrap();
        assert_eq!(error.kind, "wallet_disconnect");
        assert!(error.message.contains("session expired"));
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn test_explicit_disconnect_is_idempotent() {
        let mock = injected(&[A], 1);
        let cache = Arc::new(MemorySelectionCache::new());
        let broker = broker_with(&[mock.clone()], cache.clone(), true);
        broker.connect(Some("injected")).await.unwrap();
        assert!(cache.load().await.is_some());

        broker.disconnect().await;
        broker.disconnect().await;
        let state = broker.snapshot();
        assert!(!state.connected);
        assert!(state.is_consistent());
        assert!(cache.load().await.is_none());
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_session_forgets_cached_wallet() {
        let mock = MockBackend::new(ProviderKind::WalletConnect, &[A], 1);
        let cache = Arc::new(MemorySelectionCache::with_entry("walletconnect"));
        let broker = broker_with(&[mock.clone()], cache.clone(), true);

        broker.disconnect().await;
        assert!(cache.load().await.is_none());
        assert!(!broker.is_connected());
        assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_switch_unsupported_leaves_state() {
        let mock = MockBackend::new(ProviderKind::Custodial, &[A], 137);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("custodial")).await.unwrap();

        let mut view = broker.session();
        let before = wait_until(&mut view, |s| s.balance_wei.is_some()).await;

        let result = broker.switch_network(1).await;
        assert!(matches!(result, Err(SwitchError::Unsupported(_))));
        assert_eq!(broker.snapshot(), before);
        assert!(mock.calls_to("wallet_switchEthereumChain").is_empty());
    }

    #[tokio::test]
    async fn test_switch_network_applies_chain() {
        let mock = injected(&[A], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();

        broker.switch_network(137).await.unwrap();
        let state = broker.snapshot();
        assert_eq!(state.chain_id, Some(137));
        assert_eq!(state.network_name.as_deref(), Some("polygon"));
        assert_eq!(
            mock.calls_to("wallet_switchEthereumChain"),
            vec![json!([{ "chainId": "0x89" }])]
        );
    }

    #[tokio::test]
    async fn test_switch_rejected_by_user() {
        let mock = injected(&[A], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();
        mock.script(
            "wallet_switchEthereumChain",
            Err(TransportError::UserRejected("denied".into())),
        );

        assert_eq!(broker.switch_network(5).await, Err(SwitchError::Rejected));
        assert_eq!(broker.snapshot().chain_id, Some(1));
    }

    #[tokio::test]
    async fn test_switch_without_session() {
        let broker = broker_with(&[], Arc::new(MemorySelectionCache::new()), true);
        assert_eq!(
            broker.switch_network(5).await,
            Err(SwitchError::NoActiveSession)
        );
    }

    #[tokio::test]
    async fn test_auto_reconnect_with_empty_cache() {
        let mock = injected(&[A], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);

        let state = broker.try_auto_reconnect().await;
        assert!(!state.connected);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_reconnect_uses_cached_provider() {
        let mock = MockBackend::new(ProviderKind::WalletConnect, &[A], 10);
        let cache = Arc::new(MemorySelectionCache::with_entry("walletconnect"));
        let broker = broker_with(&[mock], cache, true);

        let state = broker.try_auto_reconnect().await;
        assert!(state.connected);
        assert_eq!(state.provider, Some(ProviderKind::WalletConnect));
        assert_eq!(state.network_name.as_deref(), Some("optimism"));
    }

    #[tokio::test]
    async fn test_auto_reconnect_clears_unknown_cached_key() {
        let cache = Arc::new(MemorySelectionCache::with_entry("ledger"));
        let broker = broker_with(&[], cache.clone(), true);

        let state = broker.try_auto_reconnect().await;
        assert!(!state.connected);
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn test_auto_reconnect_failure_is_absorbed() {
        let mock = injected(&[A], 1);
        mock.fail_connect(TransportError::Connect("refused".into()));
        let cache = Arc::new(MemorySelectionCache::with_entry("injected"));
        let broker = broker_with(&[mock], cache, true);

        let state = broker.try_auto_reconnect().await;
        assert!(!state.connected);
    }

    #[tokio::test]
    async fn test_caching_disabled_stays_disconnected() {
        let mock = injected(&[A], 1);
        let cache = Arc::new(MemorySelectionCache::new());
        let broker = broker_with(&[mock.clone()], cache.clone(), false);

        broker.connect(Some("injected")).await.unwrap();
        assert!(cache.load().await.is_none());
        broker.disconnect().await;

        let state = broker.try_auto_reconnect().await;
        assert!(!state.connected);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chooser_dismissed() {
        let broker = broker_with(&[], Arc::new(MemorySelectionCache::new()), true);
        assert_eq!(broker.connect(None).await, Err(ConnectError::UserCancelled));
        assert_eq!(broker.snapshot().last_error.unwrap().kind, "connect");
    }

    #[tokio::test]
    async fn test_chooser_selection_connects() {
        let mock = injected(&[A], 1);
        let config = Config::default();
        let broker = ConnectionBroker::new(
            config.wallet.clone(),
            ProviderRegistry::from_config(&config),
            MockFactory::with(&[mock]),
            Arc::new(MemorySelectionCache::new()),
            Arc::new(PickFirst),
        );

        let state = broker.connect(None).await.unwrap();
        assert_eq!(state.provider, Some(ProviderKind::Injected));
    }

    #[tokio::test]
    async fn test_unknown_provider_key() {
        let broker = broker_with(&[], Arc::new(MemorySelectionCache::new()), true);
        assert!(matches!(
            broker.connect(Some("trezor")).await,
            Err(ConnectError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejected_by_user() {
        let mock = injected(&[A], 1);
        mock.script(
            "eth_requestAccounts",
            Err(TransportError::UserRejected("denied".into())),
        );
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);

        assert_eq!(
            broker.connect(Some("injected")).await,
            Err(ConnectError::UserCancelled)
        );
        assert!(!broker.is_connected());
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_without_accounts() {
        let mock = injected(&[], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);

        assert_eq!(
            broker.connect(Some("injected")).await,
            Err(ConnectError::NoAccounts)
        );
        assert!(broker.snapshot().is_consistent());
        assert_eq!(mock.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_wins_over_inflight_connect() {
        let mock = injected(&[A], 1);
        let gate = mock.gate_connect();
        let cache = Arc::new(MemorySelectionCache::new());
        let broker = broker_with(&[mock.clone()], cache.clone(), true);

        let connecting = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.connect(Some("injected")).await })
        };
        while mock.connects.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let disconnecting = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.disconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        assert_eq!(connecting.await.unwrap(), Err(ConnectError::Superseded));
        disconnecting.await.unwrap();

        assert!(!broker.is_connected());
        assert!(cache.load().await.is_none());
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
        assert!(broker.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn test_stale_balance_is_dropped() {
        let mock = injected(&[A], 1);
        // First refresh answers late with an old balance
        mock.script_delayed(
            "eth_getBalance",
            Some(Duration::from_millis(150)),
            Ok(json!("0x1")),
        );
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();

        mock.emit(WalletEvent::ChainChanged("0x5".into()));
        let mut view = broker.session();
        wait_until(&mut view, |s| s.balance_wei.is_some()).await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        let state = broker.snapshot();
        assert_eq!(state.chain_id, Some(5));
        assert_eq!(state.balance_wei.as_deref(), Some(ONE_ETH));
    }

    #[tokio::test]
    async fn test_account_switch_drops_previous_balance() {
        let mock = injected(&[A], 1);
        // A's balance answers after the switch to B
        mock.script_delayed(
            "eth_getBalance",
            Some(Duration::from_millis(150)),
            Ok(json!("0x1")),
        );
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();

        mock.emit(WalletEvent::AccountsChanged(vec![B.into()]));
        let mut view = broker.session();
        wait_until(&mut view, |s| {
            s.account_address.as_deref() == Some(B) && s.balance_wei.is_some()
        })
        .await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        let state = broker.snapshot();
        assert_eq!(state.account_address.as_deref(), Some(B));
        assert_eq!(state.balance_wei.as_deref(), Some(ONE_ETH));

        let queried: Vec<Value> = mock
            .calls_to("eth_getBalance")
            .into_iter()
            .map(|params| params[0].clone())
            .collect();
        assert_eq!(queried, vec![json!(A), json!(B)]);
    }

    #[tokio::test]
    async fn test_chain_then_account_change_both_apply() {
        let mock = injected(&[A], 1);
        let broker = broker_with(&[mock.clone()], Arc::new(MemorySelectionCache::new()), true);
        broker.connect(Some("injected")).await.unwrap();

        mock.emit(WalletEvent::ChainChanged("0x5".into()));
        mock.emit(WalletEvent::AccountsChanged(vec![B.into()]));

        let mut view = broker.session();
        let state = wait_until(&mut view, |s| {
            s.chain_id == Some(5) && s.account_address.as_deref() == Some(B)
        })
        .await;
        assert_eq!(state.network_name.as_deref(), Some("goerli"));
        assert!(state.connected);

        // Nothing later undoes either change
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = broker.snapshot();
        assert_eq!(state.chain_id, Some(5));
        assert_eq!(state.network_name.as_deref(), Some("goerli"));
        assert_eq!(state.account_address.as_deref(), Some(B));
    }

    #[tokio::test]
    async fn test_events_from_replaced_session_are_ignored() {
        let first = injected(&[A], 1);
        let second = MockBackend::new(ProviderKind::Custodial, &[B], 137);
        let broker = broker_with(
            &[first.clone(), second.clone()],
            Arc::new(MemorySelectionCache::new()),
            true,
        );

        broker.connect(Some("injected")).await.unwrap();
        let old_id = broker.active_session().await.unwrap().id;
        broker.connect(Some("custodial")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while first.listener_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("old bridge never detached");
        assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);

        let applied = broker
            .shared()
            .apply(old_id, Transition::ChainSwitched(5))
            .await;
        assert!(!applied);
        let applied = broker.shared().apply(old_id, Transition::AccountsCleared).await;
        assert!(!applied);

        let state = broker.snapshot();
        assert!(state.connected);
        assert_eq!(state.account_address.as_deref(), Some(B));
        assert_eq!(state.chain_id, Some(137));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0xde0b6b3a7640000")).unwrap().to_string(), ONE_ETH);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), U256::zero());
        assert!(parse_quantity(&json!(12)).is_err());
    }
}
