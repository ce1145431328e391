//! Error types for the LATTICE coordination substrate.
//!
//! Every fallible operation in the core returns an [`A2aError`]. The enum is
//! exhaustive over the failure modes of the message path: framing, transport,
//! registry, discovery, routing, and activation. Each variant maps onto one
//! of the wire-level error categories in [`A2aErrorKind`], which is what a
//! peer actually sees inside a JSON-RPC error object.
//!
//! Retryability is a property of the variant, not of the call site: the
//! transport retries exactly the variants for which [`A2aError::retryable`]
//! returns true and surfaces everything else immediately.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error Kind (wire taxonomy)
// ---------------------------------------------------------------------------

/// Wire-level error category carried in the `data.type` field of a JSON-RPC
/// error object. Peers dispatch on these strings, so the set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum A2aErrorKind {
    /// Malformed JSON-RPC envelope or binary frame.
    ProtocolError,
    /// Credential failure (bad token, failed TLS handshake, bad signature).
    AuthenticationError,
    /// Policy failure: the peer is authenticated but not allowed.
    AuthorizationError,
    /// No live peer satisfies the required capabilities.
    CapabilityNotFound,
    /// Target known but currently unreachable or unregistered.
    AgentUnavailable,
    /// Cost, quota, or queue limits exceeded.
    ResourceExhausted,
    /// Deadline expired at the transport, router, or coordination layer.
    TimeoutError,
    /// No path within `maxHops`, cycle detected, or registry empty.
    RoutingError,
    /// Encode/decode failure.
    SerializationError,
    /// Message fields or configuration failed schema checks.
    ValidationError,
    /// Catch-all. Never used where a more specific kind fits.
    InternalError,
}

impl A2aErrorKind {
    /// JSON-RPC error code for this category.
    ///
    /// Parse-level failures reuse the standard `-32700`/`-32600` codes;
    /// everything else lives in the server-error range.
    pub fn code(&self) -> i32 {
        match self {
            Self::ProtocolError => -32700,
            Self::ValidationError => -32600,
            Self::AgentUnavailable => -32001,
            Self::AuthenticationError => -32002,
            Self::AuthorizationError => -32003,
            Self::CapabilityNotFound => -32004,
            Self::ResourceExhausted => -32005,
            Self::TimeoutError => -32006,
            Self::RoutingError => -32007,
            Self::SerializationError => -32008,
            Self::InternalError => -32603,
        }
    }

    /// The snake_case string used on the wire, for logging and metrics keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol_error",
            Self::AuthenticationError => "authentication_error",
            Self::AuthorizationError => "authorization_error",
            Self::CapabilityNotFound => "capability_not_found",
            Self::AgentUnavailable => "agent_unavailable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::TimeoutError => "timeout_error",
            Self::RoutingError => "routing_error",
            Self::SerializationError => "serialization_error",
            Self::ValidationError => "validation_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for A2aErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// A2aError
// ---------------------------------------------------------------------------

/// Errors produced anywhere along the message path.
#[derive(Debug, Error)]
pub enum A2aError {
    /// A binary frame header was impossible (unknown type code, absurd length).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The JSON-RPC envelope was missing required fields or malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential or handshake failure during connect.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// TLS negotiation failed.
    #[error("TLS failure: {0}")]
    TlsFailed(String),

    /// The peer is authenticated but the operation is not permitted.
    #[error("authorization denied: {0}")]
    Authorization(String),

    /// No live peer advertises the required capability.
    #[error("no peer satisfies capability {capability}")]
    CapabilityNotFound {
        /// The capability requirement that could not be satisfied.
        capability: String,
    },

    /// The target peer is known but unreachable or unregistered.
    #[error("agent unavailable: {agent_id}")]
    AgentUnavailable {
        /// The peer that could not be reached.
        agent_id: String,
    },

    /// No enabled transport speaks the endpoint's protocol.
    #[error("no transport available for protocol {protocol}")]
    TransportUnavailable {
        /// The wire protocol nobody speaks.
        protocol: String,
    },

    /// The connection closed while a request was outstanding.
    #[error("connection closed: {connection_id}")]
    ConnectionClosed {
        /// The connection that went away.
        connection_id: String,
    },

    /// A transient network fault (reset, refused, unreachable).
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A per-connection write queue is at capacity.
    #[error("write queue full on connection {connection_id} (capacity {capacity})")]
    WriteQueueFull {
        /// The saturated connection.
        connection_id: String,
        /// The configured queue bound.
        capacity: usize,
    },

    /// The cheapest candidate exceeds the caller's declared cost ceiling.
    #[error("cheapest candidate costs {cheapest}, exceeding maxCost {max_cost}")]
    CostCeilingExceeded {
        /// The lowest declared cost among candidates.
        cheapest: u64,
        /// The ceiling from `context.maxCost`.
        max_cost: u64,
    },

    /// The outstanding-request cap for a peer was reached.
    #[error("too many concurrent messages to {agent_id} (limit {limit})")]
    ConcurrencyLimit {
        /// The saturated peer.
        agent_id: String,
        /// The configured cap.
        limit: usize,
    },

    /// A deadline expired before a response arrived.
    #[error("timed out after {elapsed_ms}ms (deadline: {timeout_ms}ms)")]
    Timeout {
        /// Milliseconds elapsed before giving up.
        elapsed_ms: u64,
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// No route exists within the hop budget, or the path is degenerate.
    #[error("routing failed: {0}")]
    Routing(String),

    /// JSON or frame encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A message field or configuration value failed schema checks.
    #[error("validation error: {0}")]
    Validation(String),

    /// An agent id is already present in the registry.
    #[error("agent already registered: {agent_id}")]
    AlreadyRegistered {
        /// The duplicate id.
        agent_id: String,
    },

    /// Catch-all for internal invariant breaks.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the core.
pub type A2aResult<T> = Result<T, A2aError>;

impl A2aError {
    /// The wire-level category this error maps to.
    pub fn kind(&self) -> A2aErrorKind {
        match self {
            Self::MalformedFrame(_) | Self::Protocol(_) => A2aErrorKind::ProtocolError,
            Self::AuthenticationFailed(_) | Self::TlsFailed(_) => {
                A2aErrorKind::AuthenticationError
            }
            Self::Authorization(_) => A2aErrorKind::AuthorizationError,
            Self::CapabilityNotFound { .. } => A2aErrorKind::CapabilityNotFound,
            Self::AgentUnavailable { .. }
            | Self::TransportUnavailable { .. }
            | Self::ConnectionClosed { .. }
            | Self::TransientNetwork(_) => A2aErrorKind::AgentUnavailable,
            Self::WriteQueueFull { .. }
            | Self::CostCeilingExceeded { .. }
            | Self::ConcurrencyLimit { .. } => A2aErrorKind::ResourceExhausted,
            Self::Timeout { .. } => A2aErrorKind::TimeoutError,
            Self::Routing(_) => A2aErrorKind::RoutingError,
            Self::Serialization(_) => A2aErrorKind::SerializationError,
            Self::Validation(_) | Self::AlreadyRegistered { .. } => A2aErrorKind::ValidationError,
            Self::Internal(_) => A2aErrorKind::InternalError,
        }
    }

    /// Whether the transport may retry this failure under the retry policy.
    ///
    /// Retryable: timeouts, transient connection loss, saturated write
    /// queues. Everything else propagates to the caller immediately.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::TransientNetwork(_)
                | Self::WriteQueueFull { .. }
        )
    }

    /// A short operator hint for this failure class, if one exists.
    pub fn troubleshooting(&self) -> Option<&'static str> {
        match self {
            Self::TransportUnavailable { .. } => {
                Some("enable the endpoint's protocol in the transports[] config")
            }
            Self::CapabilityNotFound { .. } => {
                Some("check capability names and versions on registered agent cards")
            }
            Self::CostCeilingExceeded { .. } => {
                Some("raise context.maxCost or register a cheaper provider")
            }
            Self::Timeout { .. } => Some("raise messageTimeout or check peer health"),
            Self::WriteQueueFull { .. } => Some("peer is backlogged; reduce send rate"),
            _ => None,
        }
    }

    /// Renders this error as the JSON-RPC wire error object, stamping the
    /// detecting peer into `data.source`.
    pub fn to_wire(&self, source: &str) -> WireError {
        let kind = self.kind();
        WireError {
            code: kind.code(),
            message: self.to_string(),
            data: WireErrorData {
                error_type: kind,
                source: source.to_string(),
                retryable: self.retryable(),
                troubleshooting: self.troubleshooting().map(str::to_string),
            },
        }
    }
}

impl From<serde_json::Error> for A2aError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Wire Error Object
// ---------------------------------------------------------------------------

/// The JSON-RPC error object carried in a response's `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric JSON-RPC error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured error metadata.
    pub data: WireErrorData,
}

/// Structured payload inside a wire error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireErrorData {
    /// The error taxonomy entry, as a snake_case string.
    #[serde(rename = "type")]
    pub error_type: A2aErrorKind,
    /// The peer that detected the failure.
    pub source: String,
    /// Whether the caller may retry.
    pub retryable: bool,
    /// Optional operator hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub troubleshooting: Option<String>,
}
