//! # Protocol Configuration & Constants
//!
//! Every magic number in LATTICE lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! The second half of the file is [`MeshConfig`] — the deserializable
//! configuration surface an embedding process hands to the activator. The
//! constants are the defaults it falls back to.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::strategy::RoutingStrategy;
use crate::router::topology::Topology;
use crate::transport::auth::{AuthConfig, TlsConfig};
use crate::transport::retry::RetryPolicy;
use crate::transport::TransportKind;

// ---------------------------------------------------------------------------
// Protocol Identity
// ---------------------------------------------------------------------------

/// Protocol magic bytes used in the framed wire preamble. Every LATTICE
/// stream connection starts with these 4 bytes so peers can quickly reject
/// foreign traffic without parsing further.
pub const PROTOCOL_MAGIC: u32 = 0x4C415454; // "LATT"

/// Protocol fingerprint for handshake messages and version negotiation.
pub const PROTOCOL_FINGERPRINT: &str = "ALAS-LATTICE-2026";

/// Major version — bump on breaking wire changes.
pub const PROTOCOL_VERSION_MAJOR: u16 = 0;

/// Minor version — bump on backward-compatible additions.
pub const PROTOCOL_VERSION_MINOR: u16 = 1;

/// The full version string, assembled at compile time so we don't allocate
/// for something this trivial at runtime.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Wire protocol version for framed messages. Separate from the crate
/// version because framing changes don't always mean API changes.
pub const WIRE_PROTOCOL_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Framing Limits
// ---------------------------------------------------------------------------

/// Binary frame header: 1 type byte + 4 length bytes (big-endian).
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum frame payload we will accept. A length header above this is
/// treated as a malformed frame, not an allocation request.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Registry Lifetimes
// ---------------------------------------------------------------------------

/// Default agent-card TTL. An agent that neither re-registers nor updates
/// within this window is expired by the sweeper.
pub const DEFAULT_AGENT_TTL: Duration = Duration::from_secs(3600);

/// How often the registry sweeper runs. Expiry is still enforced lazily on
/// read, so this only bounds how long a dead entry lingers unobserved.
pub const REGISTRY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Transport Timing
// ---------------------------------------------------------------------------

/// Per-request deadline when the message context carries none.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection establishment timeout. 10 seconds to handshake or we move on.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connections idle beyond this are closed by the pool sweep.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the pool sweep looks for idle connections.
pub const POOL_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat interval for open connections. A peer that misses 2x this
/// interval is marked unhealthy and reconnection begins.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Per-connection bounded write queue. Exceeding it fails the send with
/// `resource_exhausted` immediately rather than growing unbounded.
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// Outstanding-request cap per peer.
pub const DEFAULT_MAX_CONCURRENT_MESSAGES: usize = 64;

/// How long a peer stays in the router's unreachable set after its
/// connection enters `failed`.
pub const UNREACHABLE_COOLDOWN: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Retry Defaults
// ---------------------------------------------------------------------------

/// Default attempt budget, including the first try.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay for backoff computation.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Hard ceiling on a single backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Default multihop ceiling when neither the topology nor the message
/// specifies one.
pub const DEFAULT_MAX_HOPS: usize = 3;

/// Bounded LRU capacity for recently computed routes.
pub const ROUTE_CACHE_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Default interval between discovery probes when discovery is enabled.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Samples retained per metrics key. 1000 is the floor for meaningful
/// p99 queries; the ring overwrites oldest-first beyond that.
pub const METRICS_RING_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default JSON-RPC API port.
pub const DEFAULT_RPC_PORT: u16 = 9850;

/// Default mesh (peer-to-peer) listening port.
pub const DEFAULT_MESH_PORT: u16 = 9851;

/// Default metrics (Prometheus) port, used by the node binary.
pub const DEFAULT_METRICS_PORT: u16 = 9852;

// ---------------------------------------------------------------------------
// Mesh Configuration Surface
// ---------------------------------------------------------------------------

/// Top-level configuration an embedding process hands to the activator.
///
/// Everything is optional on the wire; defaults come from the constants
/// above. Field names follow the camelCase convention of the A2A envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    /// This process's peer id. Appears as `path[0]` on every route.
    pub agent_id: String,
    /// Protocol used when an endpoint is ambiguous.
    pub default_transport: TransportKind,
    /// Enabled transports with their listen/dial parameters.
    pub transports: Vec<TransportEndpointConfig>,
    /// Default strategy when `route.strategy` is absent from a message.
    /// `None` defers to the topology's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_strategy: Option<RoutingStrategy>,
    /// Upper bound on multihop paths. `None` defers to the topology's
    /// default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<usize>,
    /// Whether to probe for new peers in the background.
    pub discovery_enabled: bool,
    /// Seconds between discovery probes.
    pub discovery_interval_secs: u64,
    /// Whether to enforce message signatures.
    pub security_enabled: bool,
    /// Peers that bypass signature verification.
    pub trusted_agents: Vec<String>,
    /// Per-request deadline in milliseconds.
    pub message_timeout_ms: u64,
    /// Outstanding-request cap per peer.
    pub max_concurrent_messages: usize,
    /// Transport retry policy.
    pub retry_policy: RetryPolicy,
    /// Declared shape of the peer mesh.
    pub topology: Topology,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            default_transport: TransportKind::WebSocket,
            transports: Vec::new(),
            routing_strategy: None,
            max_hops: None,
            discovery_enabled: true,
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL.as_secs(),
            security_enabled: false,
            trusted_agents: Vec::new(),
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT.as_millis() as u64,
            max_concurrent_messages: DEFAULT_MAX_CONCURRENT_MESSAGES,
            retry_policy: RetryPolicy::default(),
            topology: Topology::Mesh,
        }
    }
}

impl MeshConfig {
    /// Validates invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), crate::error::A2aError> {
        if self.agent_id.is_empty() {
            return Err(crate::error::A2aError::Validation(
                "agentId must be non-empty".to_string(),
            ));
        }
        if self.max_hops == Some(0) {
            return Err(crate::error::A2aError::Validation(
                "maxHops must be at least 1".to_string(),
            ));
        }
        if self.message_timeout_ms == 0 {
            return Err(crate::error::A2aError::Validation(
                "messageTimeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The per-request deadline as a `Duration`.
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Effective default routing strategy: explicit config, else the
    /// topology's default.
    pub fn effective_strategy(&self) -> RoutingStrategy {
        self.routing_strategy
            .unwrap_or_else(|| self.topology.default_strategy())
    }

    /// Effective hop ceiling: explicit config, else the topology's default.
    pub fn effective_max_hops(&self) -> usize {
        self.max_hops
            .unwrap_or_else(|| self.topology.default_max_hops())
    }
}

/// One enabled transport and its dial/listen parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportEndpointConfig {
    /// The wire protocol this entry configures.
    pub kind: TransportKind,
    /// Host or interface.
    pub host: String,
    /// Port to dial or bind.
    pub port: u16,
    /// Optional URL path (WebSocket and HTTP endpoints).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// TLS parameters; `None` means plaintext.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Authentication hook for outbound connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Keepalive interval in seconds; `None` uses the protocol default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive_secs: Option<u64>,
    /// Whether to negotiate per-message compression where supported.
    #[serde(default)]
    pub compression: bool,
}
