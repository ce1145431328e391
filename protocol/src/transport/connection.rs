//! # Connections
//!
//! One [`Connection`] per open peer link. The socket itself is owned by a
//! single I/O loop; everyone else talks to it through the bounded write
//! queue, which both serializes concurrent sends (FIFO per connection) and
//! enforces backpressure — a full queue fails immediately with
//! `resource_exhausted` instead of growing unbounded.
//!
//! Two state machines live here:
//!
//! - Lifecycle: `connecting → connected → (idle|active)* → closing → closed`.
//! - Reconnection: `idle → connecting → connected → unhealthy →
//!   reconnecting → connected | failed`, tracked per pool entry so a dead
//!   link can be re-dialed without losing its identity.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{A2aError, A2aResult};
use crate::message::frame::FrameType;
use crate::message::now_millis;

use super::TransportKind;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Dial and handshake in progress.
    Connecting,
    /// Handshake complete, no traffic yet.
    Connected,
    /// Open with no recent traffic.
    Idle,
    /// Open with traffic in flight.
    Active,
    /// Shutdown initiated.
    Closing,
    /// Terminal. Closed connections are purged from the pool.
    Closed,
}

impl ConnectionState {
    /// Whether the lifecycle permits moving to `next`.
    pub fn can_transition(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Closed)
                | (Connected, Idle)
                | (Connected, Active)
                | (Idle, Active)
                | (Active, Idle)
                | (Connected, Closing)
                | (Idle, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// Whether traffic can be enqueued in this state.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Idle | ConnectionState::Active
        )
    }
}

/// Reconnection phase for a pooled peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPhase {
    /// No link has been attempted yet.
    Idle,
    /// First dial in progress.
    Connecting,
    /// Link healthy.
    Connected,
    /// Ping deadline missed; link suspect.
    Unhealthy,
    /// Re-dial in progress.
    Reconnecting,
    /// Retry budget exhausted; the peer enters the router's cool-down.
    Failed,
}

// ---------------------------------------------------------------------------
// Stats & Commands
// ---------------------------------------------------------------------------

/// Per-connection traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Messages written.
    pub sent: u64,
    /// Messages read.
    pub received: u64,
    /// Payload bytes written.
    pub bytes_sent: u64,
    /// Payload bytes read.
    pub bytes_received: u64,
    /// I/O and protocol errors observed.
    pub errors: u64,
}

/// Commands accepted by a connection's owner loop.
#[derive(Debug)]
pub enum WriteCommand {
    /// Write one payload, framed as `frame_type` on stream transports.
    Payload(FrameType, Vec<u8>),
    /// Flush and close the link.
    Close,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Handle to one open peer link. Cloned freely via `Arc`; the socket lives
/// in the owner loop behind the write queue.
pub struct Connection {
    /// Connection id (UUIDv4).
    pub id: String,
    /// Wire protocol of the link.
    pub protocol: TransportKind,
    /// Peer on the other end, when known.
    pub peer_id: Option<String>,
    /// Unix ms when the link was established.
    pub connected_at: u64,
    state: Mutex<ConnectionState>,
    last_activity: Mutex<Instant>,
    stats: Mutex<ConnectionStats>,
    writer: mpsc::Sender<WriteCommand>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("peer_id", &self.peer_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Creates a handle over an owner loop's write queue.
    pub fn new(
        protocol: TransportKind,
        peer_id: Option<String>,
        writer: mpsc::Sender<WriteCommand>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            protocol,
            peer_id,
            connected_at: now_millis(),
            state: Mutex::new(ConnectionState::Connecting),
            last_activity: Mutex::new(Instant::now()),
            stats: Mutex::new(ConnectionStats::default()),
            writer,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Attempts a lifecycle transition. Illegal transitions are refused and
    /// reported to the caller.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Forces the state, bypassing the transition table. Reserved for the
    /// owner loop tearing down after an I/O error.
    pub fn force_state(&self, next: ConnectionState) {
        *self.state.lock() = next;
    }

    /// Whether traffic can currently be enqueued.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Enqueues one payload onto the owner loop's write queue.
    ///
    /// Fails with `resource_exhausted` when the queue is at capacity and
    /// `agent_unavailable` (connection closed) when the owner loop is gone.
    pub fn enqueue(&self, frame_type: FrameType, payload: Vec<u8>) -> A2aResult<()> {
        if !self.is_open() {
            return Err(A2aError::ConnectionClosed {
                connection_id: self.id.clone(),
            });
        }

        let bytes = payload.len() as u64;
        match self.writer.try_send(WriteCommand::Payload(frame_type, payload)) {
            Ok(()) => {
                let mut stats = self.stats.lock();
                stats.sent += 1;
                stats.bytes_sent += bytes;
                drop(stats);
                self.touch();
                self.transition(ConnectionState::Active);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.record_error();
                Err(A2aError::WriteQueueFull {
                    connection_id: self.id.clone(),
                    capacity: self.writer.max_capacity(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.force_state(ConnectionState::Closed);
                Err(A2aError::ConnectionClosed {
                    connection_id: self.id.clone(),
                })
            }
        }
    }

    /// Requests an orderly close. Idempotent.
    pub fn close(&self) {
        if self.transition(ConnectionState::Closing) {
            let _ = self.writer.try_send(WriteCommand::Close);
        }
    }

    /// Marks activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last send or receive.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Records an inbound payload.
    pub fn record_received(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.received += 1;
        stats.bytes_received += bytes as u64;
        drop(stats);
        self.touch();
    }

    /// Records an error on the link.
    pub fn record_error(&self) {
        self.stats.lock().errors += 1;
    }

    /// Copy of the traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(capacity: usize) -> (Connection, mpsc::Receiver<WriteCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(TransportKind::Tcp, Some("peer".into()), tx);
        conn.force_state(ConnectionState::Connected);
        (conn, rx)
    }

    #[test]
    fn lifecycle_transition_table() {
        use ConnectionState::*;
        assert!(Connecting.can_transition(Connected));
        assert!(Connected.can_transition(Active));
        assert!(Active.can_transition(Idle));
        assert!(Idle.can_transition(Active));
        assert!(Active.can_transition(Closing));
        assert!(Closing.can_transition(Closed));

        assert!(!Closed.can_transition(Connected));
        assert!(!Connecting.can_transition(Active));
        assert!(!Closing.can_transition(Active));
    }

    #[test]
    fn enqueue_updates_stats_and_state() {
        let (conn, mut rx) = connection(4);
        conn.enqueue(FrameType::Request, b"hello".to_vec()).unwrap();

        assert_eq!(conn.state(), ConnectionState::Active);
        let stats = conn.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.bytes_sent, 5);
        assert!(matches!(
            rx.try_recv().unwrap(),
            WriteCommand::Payload(FrameType::Request, _)
        ));
    }

    #[test]
    fn full_queue_is_resource_exhausted() {
        let (conn, _rx) = connection(1);
        conn.enqueue(FrameType::Request, b"1".to_vec()).unwrap();

        let err = conn.enqueue(FrameType::Request, b"2".to_vec()).unwrap_err();
        assert!(matches!(err, A2aError::WriteQueueFull { capacity: 1, .. }));
        assert_eq!(conn.stats().errors, 1);
    }

    #[test]
    fn dropped_owner_loop_means_connection_closed() {
        let (conn, rx) = connection(4);
        drop(rx);

        let err = conn.enqueue(FrameType::Request, b"x".to_vec()).unwrap_err();
        assert!(matches!(err, A2aError::ConnectionClosed { .. }));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn enqueue_on_closed_connection_fails() {
        let (conn, _rx) = connection(4);
        conn.force_state(ConnectionState::Closed);
        assert!(conn
            .enqueue(FrameType::Request, b"x".to_vec())
            .is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, mut rx) = connection(4);
        conn.close();
        conn.close();

        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(matches!(rx.try_recv().unwrap(), WriteCommand::Close));
        assert!(rx.try_recv().is_err(), "only one close command issued");
    }
}
