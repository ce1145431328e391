//! # A2A Message Envelope
//!
//! The wire unit of the LATTICE mesh: a JSON-RPC 2.0 object extended with
//! peer addressing (`from`/`to`), a message-type discriminator, routing
//! metadata, and an optional coordination context. Every byte that crosses
//! a transport is one of these, serialized by [`codec`] and — on stream
//! transports — wrapped in a binary frame by [`frame`].
//!
//! ## Invariants
//!
//! - A response carries exactly one of `result` or `error`.
//! - A notification carries no `id`.
//! - A request `id` pairs with at most one response within the sender's
//!   outstanding set; the transport drops any second response.

pub mod codec;
pub mod frame;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::card::CapabilityRequirement;
use crate::error::WireError;
use crate::router::strategy::RoutingStrategy;
use crate::transport::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Message Type & Priority
// ---------------------------------------------------------------------------

/// Discriminator for the ten message classes the mesh carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// An id-bearing call expecting a response.
    Request,
    /// The paired answer to a request.
    Response,
    /// Fire-and-forget; carries no id.
    Notification,
    /// Peer discovery query or announcement.
    Discovery,
    /// Agent-card registration traffic.
    Registration,
    /// Liveness signal; refreshes `lastHeartbeat` on the receiving registry.
    Heartbeat,
    /// Capability interrogation between peers.
    CapabilityQuery,
    /// Multi-step workflow coordination.
    WorkflowCoordination,
    /// Resource/cost negotiation.
    ResourceNegotiation,
    /// Security handshake (signature and trust establishment).
    SecurityHandshake,
}

/// Delivery priority hint. Routers and write queues may use it for
/// ordering; it is never a correctness knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background traffic; first to shed under pressure.
    Low,
    /// The default.
    Normal,
    /// Latency-sensitive traffic.
    High,
    /// Control-plane traffic that must not queue behind data.
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The `to` field: a single peer, an explicit candidate set, or the
/// whole mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One peer id.
    One(String),
    /// An explicit set the router ranks within.
    Many(Vec<String>),
    /// Every live peer except the sender.
    Broadcast,
}

impl Target {
    /// The single concrete peer id, if this target names exactly one.
    pub fn single(&self) -> Option<&str> {
        match self {
            Target::One(id) => Some(id),
            Target::Many(ids) if ids.len() == 1 => Some(&ids[0]),
            _ => None,
        }
    }

    /// True when this target is the broadcast sentinel.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Target::Broadcast)
    }
}

impl Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Target::One(id) => serializer.serialize_str(id),
            Target::Many(ids) => ids.serialize(serializer),
            Target::Broadcast => serializer.serialize_str("broadcast"),
        }
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(s) if s == "broadcast" => Target::Broadcast,
            Repr::One(s) => Target::One(s),
            Repr::Many(ids) => Target::Many(ids),
        })
    }
}

// ---------------------------------------------------------------------------
// Route & Context Metadata
// ---------------------------------------------------------------------------

/// Routing metadata stamped onto a message by the router. Intermediate
/// peers honour the embedded path on multihop deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    /// Ordered peer ids from sender to ultimate recipient.
    pub path: Vec<String>,
    /// `path.len() - 1`.
    pub hops: usize,
    /// Strategy that produced the path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RoutingStrategy>,
    /// Hop ceiling the path was computed under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<usize>,
}

/// Coordination context: correlation ids, deadlines, retry and cost
/// constraints. Everything here is optional; absent fields inherit
/// transport and router defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageContext {
    /// Workflow this message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Session this message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Causality marker for callers that need cross-connection ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The message this one logically follows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    /// Per-request deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry policy override for this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Cost ceiling for cost-optimized routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<u64>,
    /// Preferred service latency in milliseconds, used as a routing hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_latency_ms: Option<u64>,
    /// Broadcast aggregation mode: `true` collects per-peer failures
    /// alongside successes instead of failing the whole operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<bool>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 message with the A2A extensions.
///
/// The `result`/`error` pair is only meaningful on responses; `method` and
/// `params` only on requests and notifications. [`codec::validate`] enforces
/// the shape per message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// JSON-RPC version. Always "2.0".
    pub jsonrpc: String,
    /// Request identifier. Absent on notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Method name on requests and notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Successful result. Responses only; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure result. Responses only; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    /// Sending peer id.
    pub from: String,
    /// Delivery target.
    pub to: Target,
    /// Message class discriminator.
    pub message_type: MessageType,
    /// Unix timestamp in milliseconds at send time.
    pub timestamp: u64,
    /// Delivery priority hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Replay-protection nonce, hex-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Ed25519 signature over the canonical payload, hex-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Routing metadata stamped by the router.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteInfo>,
    /// Coordination context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<MessageContext>,
    /// Capabilities the recipient must satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<CapabilityRequirement>>,
}

impl Message {
    /// Builds a request with a fresh UUID id and the current timestamp.
    pub fn request(
        from: impl Into<String>,
        to: Target,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Uuid::new_v4().to_string()),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
            from: from.into(),
            to,
            message_type: MessageType::Request,
            timestamp: now_millis(),
            priority: Some(Priority::Normal),
            nonce: None,
            signature: None,
            route: None,
            context: None,
            capabilities: None,
        }
    }

    /// Builds the success response paired to `request`.
    pub fn response_to(request: &Message, from: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: request.id.clone(),
            method: None,
            params: None,
            result: Some(result),
            error: None,
            from: from.into(),
            to: Target::One(request.from.clone()),
            message_type: MessageType::Response,
            timestamp: now_millis(),
            priority: request.priority,
            nonce: None,
            signature: None,
            route: None,
            context: None,
            capabilities: None,
        }
    }

    /// Builds the error response paired to `request`.
    pub fn error_response(request: &Message, from: impl Into<String>, error: WireError) -> Self {
        Self {
            error: Some(error),
            result: None,
            ..Self::response_to(request, from, serde_json::Value::Null)
        }
    }

    /// Builds a notification: no id, no response expected.
    pub fn notification(
        from: impl Into<String>,
        to: Target,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            message_type: MessageType::Notification,
            ..Self::request(from, to, method, params)
        }
    }

    /// Builds a heartbeat notification for `to`.
    pub fn heartbeat(from: impl Into<String>, to: Target) -> Self {
        let from = from.into();
        Self {
            id: None,
            message_type: MessageType::Heartbeat,
            ..Self::request(from.clone(), to, "agent.heartbeat", serde_json::json!({ "agentId": from }))
        }
    }

    /// True when this message expects a paired response. Every id-bearing
    /// class does; responses, notifications, and heartbeats do not.
    pub fn expects_response(&self) -> bool {
        self.id.is_some()
            && !matches!(
                self.message_type,
                MessageType::Response | MessageType::Notification | MessageType::Heartbeat
            )
    }

    /// The effective deadline for this message, falling back to `default`.
    pub fn timeout_ms(&self, default: u64) -> u64 {
        self.context
            .as_ref()
            .and_then(|c| c.timeout_ms)
            .unwrap_or(default)
    }

    /// Whether broadcast aggregation should collect per-peer failures.
    pub fn partial_success(&self) -> bool {
        self.context
            .as_ref()
            .and_then(|c| c.partial_success)
            .unwrap_or(false)
    }
}

/// Unix time in milliseconds. The mesh treats this as monotonic enough;
/// ordering guarantees come from ids and connections, not wall clocks.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_shape() {
        let msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));

        assert_eq!(msg.jsonrpc, "2.0");
        assert!(msg.id.is_some());
        assert_eq!(msg.method.as_deref(), Some("ping"));
        assert_eq!(msg.message_type, MessageType::Request);
        assert!(msg.expects_response());
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn notification_has_no_id() {
        let msg = Message::notification("a", Target::Broadcast, "announce", serde_json::json!({}));
        assert!(msg.id.is_none());
        assert!(!msg.expects_response());
    }

    #[test]
    fn response_pairs_id_and_reverses_direction() {
        let req = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        let resp = Message::response_to(&req, "b", serde_json::json!("pong"));

        assert_eq!(resp.id, req.id);
        assert_eq!(resp.to, Target::One("a".into()));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn target_wire_forms() {
        let one = serde_json::to_string(&Target::One("b".into())).unwrap();
        assert_eq!(one, "\"b\"");

        let many = serde_json::to_string(&Target::Many(vec!["b".into(), "c".into()])).unwrap();
        assert_eq!(many, "[\"b\",\"c\"]");

        let bcast = serde_json::to_string(&Target::Broadcast).unwrap();
        assert_eq!(bcast, "\"broadcast\"");

        let recovered: Target = serde_json::from_str("\"broadcast\"").unwrap();
        assert_eq!(recovered, Target::Broadcast);

        let recovered: Target = serde_json::from_str("[\"x\",\"y\"]").unwrap();
        assert_eq!(recovered, Target::Many(vec!["x".into(), "y".into()]));
    }

    #[test]
    fn message_round_trips_with_camel_case_keys() {
        let mut msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        msg.context = Some(MessageContext {
            max_cost: Some(10),
            partial_success: Some(true),
            ..MessageContext::default()
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"messageType\":\"request\""));
        assert!(json.contains("\"maxCost\":10"));
        assert!(json.contains("\"partialSuccess\":true"));

        let recovered: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, msg);
    }

    #[test]
    fn timeout_falls_back_to_default() {
        let msg = Message::request("a", Target::One("b".into()), "ping", serde_json::json!({}));
        assert_eq!(msg.timeout_ms(30_000), 30_000);

        let mut msg = msg;
        msg.context = Some(MessageContext {
            timeout_ms: Some(5_000),
            ..MessageContext::default()
        });
        assert_eq!(msg.timeout_ms(30_000), 5_000);
    }
}
