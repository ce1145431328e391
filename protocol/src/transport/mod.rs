//! # Transport Layer
//!
//! Opens and maintains peer connections over WebSocket, HTTP, TCP, and the
//! gRPC-framed channel; pools them; correlates requests with responses by
//! id; retries retryable failures under the configured policy; and surfaces
//! lifecycle events.
//!
//! Ownership is strict: the [`TransportManager`] owns the pool, each
//! connection's socket is owned by its I/O loops, and cross-task sends go
//! through the per-connection bounded write queue. Ordering is FIFO per
//! connection; nothing is promised across connections.

pub mod auth;
pub mod connection;
pub mod http;
pub mod pool;
pub mod retry;
pub mod tcp;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::card::Endpoint;
use crate::config::{
    CONNECT_TIMEOUT, DEFAULT_MAX_CONCURRENT_MESSAGES, DEFAULT_MESSAGE_TIMEOUT, IDLE_TIMEOUT,
    POOL_SWEEP_INTERVAL, WRITE_QUEUE_CAPACITY,
};
use crate::error::{A2aError, A2aResult, WireError};
use crate::message::frame::FrameType;
use crate::message::{codec, Message, MessageType};
use crate::metrics::{MetricKey, MetricsCore};
use crate::security::MessageSigner;

use auth::AuthConfig;
use connection::{Connection, ConnectionState, ReconnectPhase, WriteCommand};
use pool::ConnectionPool;
use retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Transport Kind
// ---------------------------------------------------------------------------

/// The wire protocols the transport layer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket messages carrying JSON payloads.
    WebSocket,
    /// HTTP request/response with JSON bodies.
    Http,
    /// gRPC-framed stream channel (length-prefixed frames).
    Grpc,
    /// Plain TCP with length-prefixed frames.
    Tcp,
}

impl TransportKind {
    /// The lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Connector Abstraction
// ---------------------------------------------------------------------------

/// The write side of a dialed link.
#[async_trait]
pub trait WireSink: Send {
    /// Writes one payload. Stream transports frame it as `frame_type`.
    async fn write_payload(&mut self, frame_type: FrameType, payload: &[u8]) -> A2aResult<()>;
    /// Flushes and closes the link.
    async fn close(&mut self) -> A2aResult<()>;
}

/// The read side of a dialed link.
#[async_trait]
pub trait WireStream: Send {
    /// Next JSON payload; `None` at end of stream.
    async fn next_payload(&mut self) -> Option<A2aResult<Vec<u8>>>;
}

/// What a connector hands back after a successful dial.
pub struct DialedIo {
    /// Write side, consumed by the write loop.
    pub sink: Box<dyn WireSink>,
    /// Read side, consumed by the read loop.
    pub stream: Box<dyn WireStream>,
}

impl std::fmt::Debug for DialedIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialedIo").finish_non_exhaustive()
    }
}

/// Dials endpoints for one wire protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The protocol this connector speaks.
    fn kind(&self) -> TransportKind;
    /// Establishes a link to `endpoint`.
    async fn dial(&self, endpoint: &Endpoint, auth: Option<&AuthConfig>) -> A2aResult<DialedIo>;
}

/// The send/receive contract the router programs against. The transport
/// manager fulfils it for real peers; the bridge impersonates it for
/// external RPC systems.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Sends a request and resolves with the paired response.
    async fn send_request(&self, message: Message) -> A2aResult<Message>;
    /// Sends a fire-and-forget notification.
    async fn send_notification(&self, message: Message) -> A2aResult<()>;
    /// Human-readable transport name.
    fn transport_type(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Events & Broadcast Results
// ---------------------------------------------------------------------------

/// Lifecycle events surfaced to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A link was established.
    Connected {
        /// The new connection.
        connection_id: String,
        /// The peer on the other end.
        peer_id: String,
    },
    /// A link closed (orderly or not).
    Closed {
        /// The closed connection.
        connection_id: String,
        /// The peer it served, when known.
        peer_id: Option<String>,
    },
    /// A retryable failure triggered reconnection.
    Reconnecting {
        /// The peer being re-dialed.
        peer_id: String,
        /// 1-based attempt number that just failed.
        attempt: u32,
    },
    /// The retry budget for a peer is exhausted.
    Failed {
        /// The peer now considered unreachable.
        peer_id: String,
    },
}

/// One peer's failure inside a partial-success broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFailure {
    /// The peer that failed.
    pub peer_id: String,
    /// The failure, in wire form.
    pub error: WireError,
}

/// Aggregated result of a broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    /// Successful responses.
    pub responses: Vec<Message>,
    /// Per-peer failures (populated when partial success is enabled).
    pub failures: Vec<BroadcastFailure>,
}

/// An inbound message with its arrival context.
#[derive(Debug)]
pub struct Inbound {
    /// Connection the message arrived on.
    pub connection_id: String,
    /// Peer the connection serves, when known.
    pub peer_id: Option<String>,
    /// The decoded envelope.
    pub message: Message,
}

/// Capacity of the inbound queue handed to the embedding layer.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type PendingKey = (String, String);
type PendingMap = Arc<DashMap<PendingKey, oneshot::Sender<Message>>>;

// ---------------------------------------------------------------------------
// Transport Manager
// ---------------------------------------------------------------------------

/// Owns connections, correlation state, and retry behavior.
pub struct TransportManager {
    local_id: String,
    connectors: HashMap<TransportKind, Arc<dyn Connector>>,
    pool: Arc<ConnectionPool>,
    pending: PendingMap,
    outstanding: DashMap<String, usize>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    events: broadcast::Sender<TransportEvent>,
    retry_policy: RetryPolicy,
    message_timeout: Duration,
    max_concurrent: usize,
    idle_timeout: Duration,
    signer: Option<Arc<MessageSigner>>,
    metrics: Arc<MetricsCore>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("local_id", &self.local_id)
            .field("connections", &self.pool.len())
            .finish()
    }
}

impl TransportManager {
    /// Creates a manager with the default connector set (WebSocket, HTTP,
    /// TCP, gRPC-framed).
    pub fn new(local_id: impl Into<String>, metrics: Arc<MetricsCore>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut connectors: HashMap<TransportKind, Arc<dyn Connector>> = HashMap::new();
        connectors.insert(
            TransportKind::WebSocket,
            Arc::new(ws::WebSocketConnector::default()),
        );
        connectors.insert(TransportKind::Http, Arc::new(http::HttpConnector::default()));
        connectors.insert(TransportKind::Tcp, Arc::new(tcp::StreamConnector::tcp()));
        connectors.insert(TransportKind::Grpc, Arc::new(tcp::StreamConnector::grpc()));

        Self {
            local_id: local_id.into(),
            connectors,
            pool: Arc::new(ConnectionPool::new()),
            pending: Arc::new(DashMap::new()),
            outstanding: DashMap::new(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            events,
            retry_policy: RetryPolicy::default(),
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT_MESSAGES,
            idle_timeout: IDLE_TIMEOUT,
            signer: None,
            metrics,
            sweeper: Mutex::new(None),
        }
    }

    /// Replaces the default retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replaces the default per-request deadline.
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Sets the outstanding-request cap per peer.
    pub fn with_max_concurrent(mut self, cap: usize) -> Self {
        self.max_concurrent = cap.max(1);
        self
    }

    /// Sets the idle deadline for the pool sweep.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Installs the signer stamping outbound messages.
    pub fn with_signer(mut self, signer: Arc<MessageSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replaces or adds a connector (tests inject loopback connectors here).
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    /// Takes the inbound queue. Callable once; the embedding layer drains
    /// peer requests and notifications from it.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.inbound_rx.lock().take()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Read access to the pool for status reporting.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    // -- connection management ----------------------------------------------

    /// Returns an open connection to `peer_id`, dialing `endpoint` when no
    /// pooled link exists.
    pub async fn connect(
        &self,
        peer_id: &str,
        endpoint: &Endpoint,
        auth: Option<&AuthConfig>,
    ) -> A2aResult<Arc<Connection>> {
        if let Some(existing) = self.pool.for_peer(peer_id) {
            return Ok(existing);
        }

        let connector = self
            .connectors
            .get(&endpoint.protocol)
            .ok_or_else(|| A2aError::TransportUnavailable {
                protocol: endpoint.protocol.to_string(),
            })?;

        let phase = match self.pool.reconnect_phase(peer_id) {
            ReconnectPhase::Idle => ReconnectPhase::Connecting,
            _ => ReconnectPhase::Reconnecting,
        };
        self.pool.set_reconnect_phase(peer_id, phase);

        let started = Instant::now();
        let dialed = tokio::time::timeout(CONNECT_TIMEOUT, connector.dial(endpoint, auth))
            .await
            .map_err(|_| A2aError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
                timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            })??;

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let conn = Arc::new(Connection::new(
            endpoint.protocol,
            Some(peer_id.to_string()),
            write_tx,
        ));
        conn.transition(ConnectionState::Connected);
        self.pool.insert(Arc::clone(&conn));

        self.spawn_io_loops(Arc::clone(&conn), dialed, write_rx);

        let _ = self.events.send(TransportEvent::Connected {
            connection_id: conn.id.clone(),
            peer_id: peer_id.to_string(),
        });
        self.metrics
            .incr_counter(MetricKey::peer("transport", peer_id, "connects"), 1);
        debug!(peer = %peer_id, connection = %conn.id, protocol = %endpoint.protocol, "connected");
        Ok(conn)
    }

    /// Closes a connection and removes it from the pool. Idempotent.
    pub async fn disconnect(&self, connection_id: &str) {
        if let Some(conn) = self.pool.remove(connection_id) {
            conn.close();
            let _ = self.events.send(TransportEvent::Closed {
                connection_id: connection_id.to_string(),
                peer_id: conn.peer_id.clone(),
            });
        }
    }

    // -- sending -------------------------------------------------------------

    /// Sends a request on an existing connection and awaits the paired
    /// response. Single attempt; retries live in
    /// [`TransportManager::send_to_peer`].
    pub async fn send_on(&self, connection_id: &str, mut message: Message) -> A2aResult<Message> {
        let conn = self
            .pool
            .get(connection_id)
            .ok_or_else(|| A2aError::ConnectionClosed {
                connection_id: connection_id.to_string(),
            })?;

        self.prepare_outbound(&mut message)?;
        let id = message
            .id
            .clone()
            .ok_or_else(|| A2aError::Validation("request requires an id".into()))?;
        let key: PendingKey = (conn.id.clone(), id.clone());

        if self.pending.contains_key(&key) {
            return Err(A2aError::Validation(format!(
                "request id {} is already outstanding on this connection",
                id
            )));
        }

        let peer = conn.peer_id.clone().unwrap_or_default();
        self.acquire_slot(&peer)?;

        let timeout = Duration::from_millis(message.timeout_ms(self.message_timeout.as_millis() as u64));
        let payload = match codec::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                self.release_slot(&peer);
                return Err(e);
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        if let Err(e) = conn.enqueue(FrameType::for_message(message.message_type), payload) {
            self.pending.remove(&key);
            self.release_slot(&peer);
            return Err(e);
        }
        self.metrics
            .incr_counter(MetricKey::peer("transport", &peer, "sent"), 1);

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, rx).await;
        self.release_slot(&peer);

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_closed)) => Err(A2aError::ConnectionClosed {
                connection_id: conn.id.clone(),
            }),
            Err(_elapsed) => {
                // Late responses to this id are dropped by the dispatcher.
                self.pending.remove(&key);
                self.metrics
                    .incr_counter(MetricKey::peer("transport", &peer, "timeouts"), 1);
                Err(A2aError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Sends a fire-and-forget notification on an existing connection.
    pub async fn send_notification_on(
        &self,
        connection_id: &str,
        mut notification: Message,
    ) -> A2aResult<()> {
        let conn = self
            .pool
            .get(connection_id)
            .ok_or_else(|| A2aError::ConnectionClosed {
                connection_id: connection_id.to_string(),
            })?;

        self.prepare_outbound(&mut notification)?;
        let payload = codec::encode(&notification)?;
        conn.enqueue(FrameType::for_message(notification.message_type), payload)?;
        if let Some(peer) = &conn.peer_id {
            self.metrics
                .incr_counter(MetricKey::peer("transport", peer, "sent"), 1);
        }
        Ok(())
    }

    /// Sends a request to a peer with retry: on a retryable failure the
    /// manager backs off, re-dials if the link died, and tries again within
    /// the policy's budget.
    pub async fn send_to_peer(
        &self,
        peer_id: &str,
        endpoint: &Endpoint,
        auth: Option<&AuthConfig>,
        message: Message,
    ) -> A2aResult<Message> {
        let policy = message
            .context
            .as_ref()
            .and_then(|c| c.retry_policy.clone())
            .unwrap_or_else(|| self.retry_policy.clone());

        let mut attempt: u32 = 1;
        loop {
            let result = async {
                let conn = self.connect(peer_id, endpoint, auth).await?;
                self.send_on(&conn.id, message.clone()).await
            }
            .await;

            match result {
                Ok(response) => {
                    self.pool
                        .set_reconnect_phase(peer_id, ReconnectPhase::Connected);
                    return Ok(response);
                }
                Err(e) if policy.should_retry(attempt, &e) => {
                    warn!(peer = %peer_id, attempt, error = %e, "send failed; retrying");
                    self.pool
                        .set_reconnect_phase(peer_id, ReconnectPhase::Reconnecting);
                    let _ = self.events.send(TransportEvent::Reconnecting {
                        peer_id: peer_id.to_string(),
                        attempt,
                    });
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.retryable() {
                        // Budget exhausted on a retryable failure: the link
                        // is considered dead until the cool-down ends.
                        self.pool.set_reconnect_phase(peer_id, ReconnectPhase::Failed);
                        let _ = self.events.send(TransportEvent::Failed {
                            peer_id: peer_id.to_string(),
                        });
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Broadcasts a request over every open, peer-bound connection except
    /// those in `exclude`, collecting responses concurrently.
    ///
    /// With partial success enabled on the message, per-peer failures are
    /// aggregated alongside successes; otherwise the first failure fails
    /// the whole broadcast. Zero live connections is an empty success.
    pub async fn broadcast(
        &self,
        message: &Message,
        exclude: &std::collections::HashSet<String>,
    ) -> A2aResult<BroadcastOutcome> {
        let targets: Vec<(String, String)> = self
            .pool
            .connections()
            .into_iter()
            .filter(|c| c.is_open())
            .filter_map(|c| c.peer_id.clone().map(|peer| (peer, c.id.clone())))
            .filter(|(peer, _)| !exclude.contains(peer) && *peer != message.from)
            .collect();

        let partial = message.partial_success();
        let sends = targets.into_iter().map(|(peer, connection_id)| {
            let mut per_peer = message.clone();
            // Each delivery gets its own id so responses can't cross-pair.
            per_peer.id = Some(uuid::Uuid::new_v4().to_string());
            async move { (peer, self.send_on(&connection_id, per_peer).await) }
        });

        let mut outcome = BroadcastOutcome::default();
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(response) => outcome.responses.push(response),
                Err(e) if partial => outcome.failures.push(BroadcastFailure {
                    peer_id: peer.clone(),
                    error: e.to_wire(&self.local_id),
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    // -- lifecycle ------------------------------------------------------------

    /// Spawns the idle sweep. Connections idle beyond the deadline close.
    pub fn start_sweeper(self: Arc<Self>) {
        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POOL_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for conn in manager.pool.idle(manager.idle_timeout) {
                    debug!(connection = %conn.id, "closing idle connection");
                    manager.disconnect(&conn.id).await;
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Disconnects everything and cancels timers.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        for conn in self.pool.connections() {
            conn.close();
        }
        self.pool.clear();
        self.pending.clear();
        self.outstanding.clear();
    }

    // -- internals ------------------------------------------------------------

    fn prepare_outbound(&self, message: &mut Message) -> A2aResult<()> {
        if let Some(signer) = &self.signer {
            signer.sign(message);
        }
        codec::validate(message)
    }

    fn acquire_slot(&self, peer: &str) -> A2aResult<()> {
        let mut entry = self.outstanding.entry(peer.to_string()).or_insert(0);
        if *entry >= self.max_concurrent {
            return Err(A2aError::ConcurrencyLimit {
                agent_id: peer.to_string(),
                limit: self.max_concurrent,
            });
        }
        *entry += 1;
        Ok(())
    }

    fn release_slot(&self, peer: &str) {
        if let Some(mut entry) = self.outstanding.get_mut(peer) {
            *entry = entry.saturating_sub(1);
        }
    }

    fn spawn_io_loops(
        &self,
        conn: Arc<Connection>,
        dialed: DialedIo,
        mut write_rx: mpsc::Receiver<WriteCommand>,
    ) {
        let DialedIo {
            mut sink,
            mut stream,
        } = dialed;

        // Write loop: sole owner of the sink. FIFO over the bounded queue.
        let write_conn = Arc::clone(&conn);
        let write_pool = Arc::clone(&self.pool);
        let write_events = self.events.clone();
        tokio::spawn(async move {
            while let Some(command) = write_rx.recv().await {
                match command {
                    WriteCommand::Payload(frame_type, payload) => {
                        if let Err(e) = sink.write_payload(frame_type, &payload).await {
                            warn!(connection = %write_conn.id, error = %e, "write failed");
                            write_conn.record_error();
                            break;
                        }
                    }
                    WriteCommand::Close => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            teardown(&write_pool, &write_events, &write_conn);
        });

        // Read loop: sole owner of the stream; dispatches inbound traffic.
        let read_conn = Arc::clone(&conn);
        let read_pool = Arc::clone(&self.pool);
        let read_events = self.events.clone();
        let pending = Arc::clone(&self.pending);
        let inbound = self.inbound_tx.clone();
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            while let Some(result) = stream.next_payload().await {
                let payload = match result {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(connection = %read_conn.id, error = %e, "read failed");
                        read_conn.record_error();
                        break;
                    }
                };
                read_conn.record_received(payload.len());
                if let Some(peer) = &read_conn.peer_id {
                    metrics.incr_counter(MetricKey::peer("transport", peer, "received"), 1);
                }

                let message = match codec::decode(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(connection = %read_conn.id, error = %e, "dropping undecodable payload");
                        read_conn.record_error();
                        continue;
                    }
                };

                if message.message_type == MessageType::Response {
                    let id = message.id.clone().unwrap_or_default();
                    match pending.remove(&(read_conn.id.clone(), id.clone())) {
                        Some((_, waiter)) => {
                            let _ = waiter.send(message);
                        }
                        None => {
                            // Second response to an id, or a response to a
                            // cancelled/timed-out request: dropped.
                            trace!(connection = %read_conn.id, %id, "dropping unmatched response");
                        }
                    }
                } else {
                    let envelope = Inbound {
                        connection_id: read_conn.id.clone(),
                        peer_id: read_conn.peer_id.clone(),
                        message,
                    };
                    if inbound.send(envelope).await.is_err() {
                        break;
                    }
                }
            }
            teardown(&read_pool, &read_events, &read_conn);
        });
    }
}

/// Removes a dead connection from the pool and emits the close event. Both
/// I/O loops call this; the pool removal makes it fire once.
fn teardown(
    pool: &Arc<ConnectionPool>,
    events: &broadcast::Sender<TransportEvent>,
    conn: &Arc<Connection>,
) {
    conn.force_state(ConnectionState::Closed);
    if pool.remove(&conn.id).is_some() {
        if let Some(peer) = &conn.peer_id {
            pool.set_reconnect_phase(peer, ReconnectPhase::Unhealthy);
        }
        let _ = events.send(TransportEvent::Closed {
            connection_id: conn.id.clone(),
            peer_id: conn.peer_id.clone(),
        });
    }
}
