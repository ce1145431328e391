//! # RPC + Peer API
//!
//! Builds the axum router exposing the node's HTTP interface, the WebSocket
//! peer endpoint, and the framed TCP/gRPC peer listener. Every inbound A2A
//! envelope — whatever the wire — funnels through [`handle_a2a`], which
//! verifies the security policy and dispatches on the method.
//!
//! ## Endpoints
//!
//! | Method | Path      | Description                              |
//! |--------|-----------|------------------------------------------|
//! | GET    | `/health` | Liveness probe                           |
//! | GET    | `/status` | Mesh status summary                      |
//! | POST   | `/rpc`    | JSON-RPC gateway for local callers       |
//! | POST   | `/a2a`    | A2A envelope ingress over HTTP           |
//! | GET    | `/ws`     | A2A envelope ingress over WebSocket      |

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use lattice_protocol::activator::{ProtocolActivator, ProtocolStatus, PROTOCOL_A2A, PROTOCOL_HYBRID};
use lattice_protocol::card::AgentCard;
use lattice_protocol::config::PROTOCOL_MAGIC;
use lattice_protocol::discovery::DiscoveryQuery;
use lattice_protocol::error::{A2aError, A2aResult};
use lattice_protocol::message::frame::{encode_frame, FrameDecoder, FrameType};
use lattice_protocol::message::{codec, MessageContext, MessageType, RouteInfo};
use lattice_protocol::router::strategy::RoutingStrategy;
use lattice_protocol::{MeshStack, Message, Target};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc` or already clone-by-handle.
#[derive(Clone)]
pub struct AppState {
    /// The live protocol stack.
    pub stack: MeshStack,
    /// The activator, for status reporting.
    pub activator: Arc<ProtocolActivator>,
    /// This node's own card.
    pub local_card: AgentCard,
    /// Reported version string.
    pub version: String,
    /// Unix ms at startup.
    pub started_at: u64,
    /// Prometheus handles for in-handler recording.
    pub metrics: SharedMetrics,
}

impl AppState {
    fn local_id(&self) -> &str {
        &self.local_card.id
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .route("/a2a", post(a2a_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status summary returned by `/status` and `mesh.status`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// This node's agent id.
    pub agent_id: String,
    /// Binary version.
    pub version: String,
    /// Startup time, RFC 3339.
    pub started_at: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// A2A protocol status.
    pub a2a_status: ProtocolStatus,
    /// Hybrid protocol status.
    pub hybrid_status: ProtocolStatus,
    /// Live agents in the registry.
    pub live_agents: usize,
    /// Open transport connections.
    pub open_connections: usize,
    /// Components running on fallbacks.
    pub fallbacks_used: Vec<String>,
    /// Router metrics snapshot.
    pub router: lattice_protocol::router::RouterMetricsReport,
}

fn status_of(state: &AppState) -> StatusResponse {
    StatusResponse {
        agent_id: state.local_id().to_string(),
        version: state.version.clone(),
        started_at: chrono::DateTime::from_timestamp_millis(state.started_at as i64)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        uptime_secs: (lattice_protocol::message::now_millis() - state.started_at) / 1000,
        a2a_status: state.activator.status(PROTOCOL_A2A),
        hybrid_status: state.activator.status(PROTOCOL_HYBRID),
        live_agents: state.stack.registry.live_count(),
        open_connections: state.stack.transport.pool().len(),
        fallbacks_used: state.activator.fallbacks_used(),
        router: state.stack.router.metrics_report(),
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(status_of(&state))
}

// ---------------------------------------------------------------------------
// Local JSON-RPC Gateway
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request from a local caller.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    /// The method to invoke.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// Request identifier, echoed from the request.
    pub id: serde_json::Value,
}

impl JsonRpcResponse {
    fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: serde_json::Value, error: &A2aError, source: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: serde_json::to_value(error.to_wire(source)).ok(),
            id,
        }
    }
}

/// Parameters accepted by `agent.send`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    to: Target,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    capabilities: Option<Vec<lattice_protocol::card::CapabilityRequirement>>,
    #[serde(default)]
    context: Option<MessageContext>,
    #[serde(default)]
    strategy: Option<RoutingStrategy>,
}

async fn rpc_handler(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if request.jsonrpc != "2.0" {
        let err = A2aError::Protocol("unsupported jsonrpc version".into());
        return Json(JsonRpcResponse::failure(request.id, &err, state.local_id()));
    }

    let id = request.id.clone();
    match dispatch_local(&state, &request.method, request.params).await {
        Ok(result) => Json(JsonRpcResponse::success(id, result)),
        Err(e) => Json(JsonRpcResponse::failure(id, &e, state.local_id())),
    }
}

/// Dispatches a local JSON-RPC call onto the stack.
async fn dispatch_local(
    state: &AppState,
    method: &str,
    params: serde_json::Value,
) -> A2aResult<serde_json::Value> {
    match method {
        "agent.register" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct RegisterParams {
                agent_card: AgentCard,
                ttl: Option<u64>,
            }
            let params: RegisterParams = parse_params(params)?;
            let receipt = state.stack.registry.register(
                params.agent_card,
                params.ttl.map(Duration::from_secs),
            )?;
            Ok(serde_json::to_value(receipt)?)
        }
        "agent.discover" => {
            let query: DiscoveryQuery = parse_params(params)?;
            let result = state.stack.discovery.discover(&query)?;
            Ok(serde_json::to_value(result)?)
        }
        "agent.heartbeat" => {
            let agent_id = params
                .get("agentId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| A2aError::Validation("agentId required".into()))?;
            let alive = state.stack.registry.heartbeat(agent_id);
            Ok(serde_json::json!({ "alive": alive }))
        }
        "agent.card" => {
            let card = match params.get("agentId").and_then(|v| v.as_str()) {
                Some(agent_id) if agent_id != state.local_id() => state
                    .stack
                    .registry
                    .get(agent_id)
                    .ok_or_else(|| A2aError::AgentUnavailable {
                        agent_id: agent_id.to_string(),
                    })?,
                _ => state.local_card.clone(),
            };
            Ok(serde_json::to_value(card)?)
        }
        "agent.send" => {
            let params: SendParams = parse_params(params)?;
            let mut message =
                Message::request(state.local_id(), params.to, params.method, params.params);
            message.capabilities = params.capabilities;
            message.context = params.context;
            if let Some(strategy) = params.strategy {
                message.route = Some(RouteInfo {
                    path: Vec::new(),
                    hops: 0,
                    strategy: Some(strategy),
                    max_hops: None,
                });
            }

            if message.to.is_broadcast() {
                let outcome = state.stack.broadcast(message).await?;
                Ok(serde_json::to_value(outcome)?)
            } else {
                let response = state.stack.send(message).await?;
                Ok(serde_json::to_value(response)?)
            }
        }
        "mesh.status" => Ok(serde_json::to_value(status_of(state))?),
        other => Err(A2aError::Validation(format!("unknown method {:?}", other))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> A2aResult<T> {
    serde_json::from_value(params).map_err(|e| A2aError::Validation(format!("bad params: {}", e)))
}

// ---------------------------------------------------------------------------
// A2A Ingress (HTTP, WebSocket, TCP)
// ---------------------------------------------------------------------------

/// Handles one inbound A2A envelope: verifies the security policy, then
/// dispatches on the method. Returns the response envelope for requests,
/// `None` for notifications.
pub async fn handle_a2a(state: &AppState, message: Message) -> Option<Message> {
    let local = state.local_id().to_string();

    // Signature policy first; untrusted unsigned traffic stops here.
    let sender_card = state.stack.registry.get(&message.from);
    if let Err(e) = state
        .stack
        .security
        .verify_inbound(&message, sender_card.as_ref())
    {
        warn!(from = %message.from, error = %e, "rejected inbound message");
        return message
            .expects_response()
            .then(|| Message::error_response(&message, &local, e.to_wire(&local)));
    }

    if message.message_type == MessageType::Heartbeat {
        state.stack.registry.heartbeat(&message.from);
        return None;
    }

    let result: A2aResult<serde_json::Value> = match message.method.as_deref() {
        Some("ping") => Ok(serde_json::json!({ "pong": true, "agentId": &local })),
        Some("agent.register") => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct WireRegister {
                agent_card: AgentCard,
                ttl: Option<u64>,
            }
            parse_params::<WireRegister>(message.params.clone().unwrap_or_default()).and_then(
                |wire| {
                    let receipt = state
                        .stack
                        .registry
                        .register(wire.agent_card, wire.ttl.map(Duration::from_secs))?;
                    Ok(serde_json::to_value(receipt)?)
                },
            )
        }
        Some("agent.announce") => {
            // Announcements carry the bare card and refresh liveness.
            match serde_json::from_value::<AgentCard>(
                message.params.clone().unwrap_or_default(),
            ) {
                Ok(card) => match state.stack.registry.register(card.clone(), None) {
                    Ok(receipt) => Ok(serde_json::to_value(receipt)
                        .unwrap_or(serde_json::Value::Null)),
                    Err(A2aError::AlreadyRegistered { .. }) => state
                        .stack
                        .registry
                        .update(card)
                        .map(|updated| serde_json::json!({ "registered": updated })),
                    Err(e) => Err(e),
                },
                Err(e) => Err(A2aError::Validation(format!("bad agent card: {}", e))),
            }
        }
        Some("agent.discover") => message
            .params
            .clone()
            .map(parse_params::<DiscoveryQuery>)
            .unwrap_or_else(|| Ok(DiscoveryQuery::default()))
            .and_then(|query| state.stack.discovery.discover(&query))
            .and_then(|r| Ok(serde_json::to_value(r)?)),
        Some("agent.card") => Ok(serde_json::to_value(&state.local_card)
            .unwrap_or(serde_json::Value::Null)),
        Some(other) => Err(A2aError::Validation(format!("unknown method {:?}", other))),
        None => Err(A2aError::Protocol("missing method".into())),
    };

    if !message.expects_response() {
        if let Err(e) = result {
            debug!(from = %message.from, error = %e, "notification handling failed");
        }
        return None;
    }

    Some(match result {
        Ok(value) => Message::response_to(&message, &local, value),
        Err(e) => Message::error_response(&message, &local, e.to_wire(&local)),
    })
}

/// A2A envelope ingress over HTTP POST: one envelope in, one (or no)
/// envelope out.
async fn a2a_handler(State(state): State<AppState>, body: axum::body::Bytes) -> impl IntoResponse {
    let message = match codec::decode(&body) {
        Ok(message) => message,
        Err(e) => {
            let wire = e.to_wire(state.local_id());
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": wire })))
                .into_response();
        }
    };

    match handle_a2a(&state, message).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| ws_peer_loop(state, socket))
}

/// Serves one WebSocket peer: decode, dispatch, reply.
async fn ws_peer_loop(state: AppState, mut socket: WebSocket) {
    while let Some(frame) = socket.recv().await {
        let payload = match frame {
            Ok(WsMessage::Binary(bytes)) => bytes,
            Ok(WsMessage::Text(text)) => text.into_bytes(),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "websocket peer read failed");
                break;
            }
        };

        let message = match codec::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable websocket payload");
                continue;
            }
        };

        if let Some(response) = handle_a2a(&state, message).await {
            match serde_json::to_vec(&response) {
                Ok(bytes) => {
                    if socket.send(WsMessage::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "response serialization failed"),
            }
        }
    }
}

/// Accept loop for the framed TCP/gRPC peer listener.
///
/// Each accepted socket must open with the 5-byte preface (protocol magic
/// plus channel marker); everything after is length-prefixed frames.
pub async fn serve_mesh_listener(state: AppState, listener: TcpListener) {
    info!(addr = ?listener.local_addr().ok(), "mesh listener up");
    loop {
        let (socket, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        debug!(%remote, "peer connected");
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_framed_peer(state, socket).await {
                debug!(%remote, error = %e, "framed peer session ended");
            }
        });
    }
}

async fn serve_framed_peer(state: AppState, mut socket: tokio::net::TcpStream) -> A2aResult<()> {
    let mut preface = [0u8; 5];
    socket
        .read_exact(&mut preface)
        .await
        .map_err(|e| A2aError::TransientNetwork(format!("preface read failed: {}", e)))?;
    if preface[..4] != PROTOCOL_MAGIC.to_be_bytes() {
        return Err(A2aError::MalformedFrame("bad protocol magic".into()));
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 8192];
    loop {
        while let Some(frame) = decoder.next_frame()? {
            let message = match codec::decode(&frame.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    continue;
                }
            };
            if let Some(response) = handle_a2a(&state, message).await {
                let payload = codec::encode(&response)?;
                let out = encode_frame(FrameType::Response, &payload)?;
                socket
                    .write_all(&out)
                    .await
                    .map_err(|e| A2aError::TransientNetwork(format!("write failed: {}", e)))?;
            }
        }

        match socket.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => decoder.extend(&buf[..n]),
            Err(e) => {
                return Err(A2aError::TransientNetwork(format!("read failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use hyper::header::CONTENT_TYPE;
    use hyper::Request;
    use semver::Version;
    use tower::ServiceExt;

    use lattice_protocol::activator::ActivationRequest;
    use lattice_protocol::card::Capability;
    use lattice_protocol::config::MeshConfig;
    use lattice_protocol::message::now_millis;
    use lattice_protocol::router::topology::Topology;

    use crate::metrics::NodeMetrics;

    /// Brings up an activated stack and the app state the router serves.
    async fn test_state() -> AppState {
        let config = MeshConfig {
            agent_id: "node-test".to_string(),
            ..MeshConfig::default()
        };
        let activator = Arc::new(ProtocolActivator::new(config).unwrap());
        let result = activator
            .activate(ActivationRequest {
                protocol_name: PROTOCOL_A2A.into(),
                topology: Topology::Mesh,
            })
            .await;
        assert!(result.success, "activation failed: {:?}", result.error);

        let stack = activator.stack().unwrap();
        let local_card = AgentCard::new("node-test", "node-test", Version::new(0, 1, 0));
        stack.registry.register(local_card.clone(), None).unwrap();

        AppState {
            stack,
            activator,
            local_card,
            version: "0.1.0".to_string(),
            started_at: now_millis(),
            metrics: Arc::new(NodeMetrics::new()),
        }
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post(router: Router, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_probe_answers_ok() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let (status, body) = get(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");

        state.activator.shutdown().await;
    }

    #[tokio::test]
    async fn status_reports_the_local_agent() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let (status, body) = get(router, "/status").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["agentId"], "node-test");
        assert_eq!(parsed["a2aStatus"], "active");
        assert_eq!(parsed["liveAgents"], 1);

        state.activator.shutdown().await;
    }

    #[tokio::test]
    async fn rpc_register_then_discover_round_trip() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let worker = AgentCard::new("worker-1", "worker-1", Version::new(1, 0, 0))
            .with_capability(Capability::new("compute", Version::new(1, 0, 0)));
        let register = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "agent.register",
            "params": { "agentCard": worker, "ttl": 60 },
            "id": 1,
        });
        let (status, body) = post(
            router.clone(),
            "/rpc",
            serde_json::to_vec(&register).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["result"]["registered"], true);
        assert_eq!(parsed["result"]["agentId"], "worker-1");
        assert!(parsed["error"].is_null());

        let discover = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "agent.discover",
            "params": { "capabilities": ["compute"] },
            "id": 2,
        });
        let (status, body) = post(router, "/rpc", serde_json::to_vec(&discover).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["result"]["totalFound"], 1);
        assert_eq!(parsed["result"]["agents"][0]["id"], "worker-1");

        state.activator.shutdown().await;
    }

    #[tokio::test]
    async fn rpc_unknown_method_is_a_validation_error() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "mesh.frobnicate",
            "params": {},
            "id": 3,
        });
        let (status, body) = post(router, "/rpc", serde_json::to_vec(&request).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["result"].is_null());
        assert_eq!(parsed["error"]["data"]["type"], "validation_error");
        assert_eq!(parsed["error"]["data"]["source"], "node-test");

        state.activator.shutdown().await;
    }

    #[tokio::test]
    async fn a2a_ingress_answers_ping_with_a_paired_response() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let ping = Message::request(
            "peer-x",
            Target::One("node-test".into()),
            "ping",
            serde_json::json!({}),
        );
        let (status, body) = post(router, "/a2a", codec::encode(&ping).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let response = codec::decode(&body).unwrap();
        assert_eq!(response.id, ping.id);
        assert_eq!(response.from, "node-test");
        assert_eq!(response.result.as_ref().unwrap()["pong"], true);

        state.activator.shutdown().await;
    }

    #[tokio::test]
    async fn a2a_announce_notification_registers_the_peer_silently() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let card = AgentCard::new("peer-y", "peer-y", Version::new(1, 0, 0))
            .with_capability(Capability::new("storage", Version::new(1, 0, 0)));
        let announce = Message::notification(
            "peer-y",
            Target::One("node-test".into()),
            "agent.announce",
            serde_json::to_value(&card).unwrap(),
        );

        let (status, body) = post(router, "/a2a", codec::encode(&announce).unwrap()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        assert!(state.stack.registry.get("peer-y").is_some());
        assert!(state
            .stack
            .registry
            .indexes()
            .with_capability("storage")
            .contains("peer-y"));

        state.activator.shutdown().await;
    }

    #[tokio::test]
    async fn a2a_ingress_rejects_garbage_payloads() {
        let state = test_state().await;
        let router = create_router(state.clone());

        let (status, body) = post(router, "/a2a", b"not an envelope".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["data"]["type"], "protocol_error");

        state.activator.shutdown().await;
    }
}
