//! JSON-RPC over WebSocket
//!
//! One socket carries both request/response traffic and wallet-pushed
//! notifications. Responses are routed to their caller by request id;
//! notifications go to the [`EventEmitter`].
//!
//! When the socket drops, every pending request resolves with
//! [`TransportError::Closed`] and listeners receive a `Disconnect` event.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{classify, Incoming, RpcRequest};
use crate::error::TransportError;
use crate::events::{EventEmitter, Subscription, WalletEvent};

/// Default keep-alive ping interval
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

type Pending = DashMap<u64, oneshot::Sender<Result<Value, TransportError>>>;

/// State shared between the transport and its socket tasks for one connection
struct ConnectionShared {
    pending: Pending,
    closed: AtomicBool,
}

impl ConnectionShared {
    /// Mark closed and fail every request still waiting for an answer
    fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(TransportError::Closed));
            }
        }
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    shared: Arc<ConnectionShared>,
}

/// WebSocket JSON-RPC transport
pub struct WsTransport {
    url: url::Url,
    ping_interval: Duration,
    events: EventEmitter,
    next_id: AtomicU64,
    connection: RwLock<Option<Connection>>,
}

impl WsTransport {
    /// Create a transport; nothing is opened until [`WsTransport::connect`]
    pub fn new(url: url::Url) -> Self {
        Self {
            url,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            events: EventEmitter::new(),
            next_id: AtomicU64::new(1),
            connection: RwLock::new(None),
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub async fn is_open(&self) -> bool {
        match self.connection.read().await.as_ref() {
            Some(conn) => !conn.shared.closed.load(Ordering::SeqCst),
            None => false,
        }
    }

    /// Open the socket and start the reader/writer tasks
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.shared.closed.load(Ordering::SeqCst) {
                debug!("WebSocket to {} already open", self.url.host_str().unwrap_or("?"));
                return Ok(());
            }
        }

        info!("Connecting to wallet WebSocket at {}", self.url.host_str().unwrap_or("?"));

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("WebSocket connect failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let cancel = CancellationToken::new();
        let shared = Arc::new(ConnectionShared {
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });

        // Writer: drains the outbound queue and keeps the socket alive
        let writer_cancel = cancel.clone();
        let ping_interval = self.ping_interval;
        tokio::spawn(async move {
            let mut ping_timer = tokio::time::interval(ping_interval);
            ping_timer.tick().await;

            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }

                    _ = ping_timer.tick() => {
                        if let Err(e) = write.send(Message::Ping(vec![])).await {
                            error!("Failed to send ping: {}", e);
                            break;
                        }
                        debug!("Sent ping");
                    }

                    msg = outbound_rx.recv() => {
                        match msg {
                            Some(msg) => {
                                if let Err(e) = write.send(msg).await {
                                    error!("Failed to send to wallet: {}", e);
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            writer_cancel.cancel();
        });

        // Reader: routes responses and notifications
        let reader_cancel = cancel.clone();
        let reader_shared = shared.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut local_close = false;

            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => {
                        local_close = true;
                        break;
                    }

                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::handle_message(&text, &reader_shared, &events);
                            }
                            Some(Ok(Message::Pong(_))) => {
                                debug!("Received pong");
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("Wallet WebSocket closed by remote");
                                break;
                            }
                            Some(Err(e)) => {
                                error!("Wallet WebSocket error: {}", e);
                                break;
                            }
                            None => {
                                info!("Wallet WebSocket stream ended");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }

            reader_shared.fail_pending();
            reader_cancel.cancel();

            if !local_close {
                events.emit(WalletEvent::Disconnect {
                    code: 4900,
                    message: "wallet transport closed".to_string(),
                });
            }
        });

        *guard = Some(Connection {
            outbound,
            cancel,
            shared,
        });

        info!("Connected to wallet WebSocket");
        Ok(())
    }

    /// Close the socket; pending requests resolve with `Closed`
    pub async fn disconnect(&self) {
        if let Some(conn) = self.connection.write().await.take() {
            conn.cancel.cancel();
            conn.shared.fail_pending();
            debug!("Wallet WebSocket disconnected locally");
        }
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let (outbound, shared) = {
            let guard = self.connection.read().await;
            let conn = guard.as_ref().ok_or(TransportError::Closed)?;
            (conn.outbound.clone(), conn.shared.clone())
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&RpcRequest::new(id, method, &params))
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        shared.pending.insert(id, tx);

        // The reader may have drained the map between our clone and insert
        if shared.closed.load(Ordering::SeqCst) {
            shared.pending.remove(&id);
            return Err(TransportError::Closed);
        }

        if outbound.send(Message::Text(text)).is_err() {
            shared.pending.remove(&id);
            return Err(TransportError::Closed);
        }

        debug!("-> {} (id {})", method, id);

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Handle incoming WebSocket message
    fn handle_message(text: &str, shared: &ConnectionShared, events: &EventEmitter) {
        match classify(text) {
            Ok(Incoming::Response { id, outcome }) => match shared.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(outcome);
                }
                None => warn!("Response for unknown request id {}", id),
            },
            Ok(Incoming::Notification(event)) => {
                debug!("Wallet event: {:?}", event);
                events.emit(event);
            }
            Ok(Incoming::Unknown) => {
                debug!("Unknown message: {}", &text[..text.len().min(100)]);
            }
            Err(e) => warn!("Failed to handle message: {}", e),
        }
    }
}
