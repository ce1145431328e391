//! End-to-end integration tests for the LATTICE substrate.
//!
//! These tests exercise the full message path: activation, registration,
//! discovery, routing, transport round-trips, broadcast aggregation, TTL
//! expiry, and reconnection under fault. Peers are real sockets — a
//! WebSocket responder and framed TCP responders spun up per test.
//!
//! Each test stands alone with its own activator instance and its own
//! listeners. No shared state, no test ordering dependencies.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use semver::Version;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use lattice_protocol::activator::{ActivationRequest, ProtocolActivator, PROTOCOL_A2A};
use lattice_protocol::card::{AgentCard, Capability, Endpoint, ServiceDescriptor};
use lattice_protocol::config::MeshConfig;
use lattice_protocol::discovery::DiscoveryQuery;
use lattice_protocol::error::A2aErrorKind;
use lattice_protocol::message::frame::{encode_frame, FrameDecoder, FrameType};
use lattice_protocol::message::{codec, MessageContext, RouteInfo};
use lattice_protocol::router::strategy::RoutingStrategy;
use lattice_protocol::router::topology::Topology;
use lattice_protocol::transport::retry::{BackoffStrategy, RetryPolicy};
use lattice_protocol::transport::TransportKind;
use lattice_protocol::{MeshStack, Message, Target};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

/// Brings up an activated A2A stack for agent `local_id` with fast retries.
async fn setup_stack(local_id: &str) -> (Arc<ProtocolActivator>, MeshStack) {
    let config = MeshConfig {
        agent_id: local_id.to_string(),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Fixed,
            base_delay_ms: 20,
            max_delay_ms: 100,
            jitter: false,
        },
        message_timeout_ms: 2_000,
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
    (activator, stack)
}

/// Spins up a WebSocket peer that answers `ping` requests as `agent_id`.
async fn spawn_ws_agent(agent_id: &'static str) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();
                while let Some(Ok(frame)) = stream.next().await {
                    let payload = match frame {
                        tokio_tungstenite::tungstenite::Message::Binary(b) => b,
                        tokio_tungstenite::tungstenite::Message::Text(t) => t.into_bytes(),
                        _ => continue,
                    };
                    let Ok(request) = codec::decode(&payload) else {
                        continue;
                    };
                    if !request.expects_response() {
                        continue;
                    }
                    let response =
                        Message::response_to(&request, agent_id, serde_json::json!("pong"));
                    let bytes = codec::encode(&response).unwrap();
                    if sink
                        .send(tokio_tungstenite::tungstenite::Message::Binary(bytes))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// Spins up a framed TCP peer that answers every request as `agent_id`.
/// Accepts any number of sequential connections, so reconnects land here
/// too.
async fn spawn_tcp_agent(agent_id: &'static str) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut preface = [0u8; 5];
                if socket.read_exact(&mut preface).await.is_err() {
                    return;
                }
                let mut decoder = FrameDecoder::new();
                let mut buf = [0u8; 4096];
                loop {
                    while let Ok(Some(frame)) = decoder.next_frame() {
                        let Ok(request) = codec::decode(&frame.payload) else {
                            continue;
                        };
                        if !request.expects_response() {
                            continue;
                        }
                        let response = Message::response_to(
                            &request,
                            agent_id,
                            serde_json::json!({ "echo": request.method }),
                        );
                        let payload = codec::encode(&response).unwrap();
                        let out = encode_frame(FrameType::Response, &payload).unwrap();
                        if socket.write_all(&out).await.is_err() {
                            return;
                        }
                    }
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => decoder.extend(&buf[..n]),
                    }
                }
            });
        }
    });
    addr
}

fn ws_card(agent_id: &str, addr: std::net::SocketAddr) -> AgentCard {
    AgentCard::new(agent_id, agent_id, v("1.0.0")).with_endpoint(Endpoint {
        protocol: TransportKind::WebSocket,
        address: format!("ws://{}", addr),
        port: None,
        path: None,
        secure: false,
        max_connections: None,
    })
}

fn tcp_card(agent_id: &str, addr: std::net::SocketAddr) -> AgentCard {
    AgentCard::new(agent_id, agent_id, v("1.0.0")).with_endpoint(Endpoint {
        protocol: TransportKind::Tcp,
        address: addr.ip().to_string(),
        port: Some(addr.port()),
        path: None,
        secure: false,
        max_connections: None,
    })
}

/// A card whose endpoint points at a closed port.
fn dead_card(agent_id: &str) -> AgentCard {
    AgentCard::new(agent_id, agent_id, v("1.0.0")).with_endpoint(Endpoint {
        protocol: TransportKind::Tcp,
        address: "127.0.0.1".into(),
        // Reserved discard port; nothing listens there in CI.
        port: Some(9),
        path: None,
        secure: false,
        max_connections: None,
    })
}

// ---------------------------------------------------------------------------
// Scenario 1 — Direct success over WebSocket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_send_over_websocket_round_trips() {
    let (activator, stack) = setup_stack("agent-a").await;
    let addr = spawn_ws_agent("agent-b").await;
    stack.registry.register(ws_card("agent-b", addr), None).unwrap();

    let request = Message::request(
        "agent-a",
        Target::One("agent-b".into()),
        "ping",
        serde_json::json!({}),
    );
    let request_id = request.id.clone().unwrap();

    let response = stack.send(request).await.unwrap();
    assert_eq!(response.id, Some(request_id));
    assert_eq!(response.result, Some(serde_json::json!("pong")));

    let report = stack.router.metrics_report();
    assert_eq!(report.total_routed, 1);
    assert!((report.success_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(report.strategy_usage.get("direct"), Some(&1));
    assert_eq!(report.hop_distribution.get(&1), Some(&1));

    activator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Scenario 2 — Capability-aware routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capability_aware_routing_prefers_compatible_low_load_peer() {
    let (activator, stack) = setup_stack("agent-a").await;

    let r1 = AgentCard::new("r1", "r1", v("1.0.0"))
        .with_capability(Capability::new("web-research", v("1.2.0")))
        .with_capability(Capability::new("data-analysis", v("2.0.0")))
        .with_load(0.75)
        .with_endpoint(Endpoint {
            protocol: TransportKind::Tcp,
            address: "127.0.0.1".into(),
            port: Some(1),
            path: None,
            secure: false,
            max_connections: None,
        });
    let r2 = AgentCard::new("r2", "r2", v("1.0.0"))
        .with_capability(Capability::new("data-analysis", v("1.8.0")))
        .with_load(0.20);
    let r3 = AgentCard::new("r3", "r3", v("1.0.0"))
        .with_capability(Capability::new("data-analysis", v("2.0.0")))
        .with_load(0.10);

    stack.registry.register(r1, None).unwrap();
    stack.registry.register(r2, None).unwrap();
    stack.registry.register(r3, None).unwrap();

    let mut message = Message::request(
        "agent-a",
        Target::Many(vec!["r1".into(), "r2".into(), "r3".into()]),
        "analyze",
        serde_json::json!({}),
    );
    message.route = Some(RouteInfo {
        path: Vec::new(),
        hops: 0,
        strategy: Some(RoutingStrategy::CapabilityAware),
        max_hops: None,
    });
    message.capabilities = Some(vec!["data-analysis@2.0.0".parse().unwrap()]);

    let route = stack.router.route(&message).unwrap();
    assert_eq!(route.target(), "r3", "lowest load among compatible peers");
    assert_eq!(route.path, vec!["agent-a", "r3"]);

    // r2's 1.8.0 can never satisfy 2.0.0 even alone.
    message.to = Target::One("r2".into());
    let err = stack.router.route(&message).unwrap_err();
    assert_eq!(err.kind(), A2aErrorKind::CapabilityNotFound);

    activator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Scenario 3 — Cost ceiling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cost_ceiling_blocks_before_any_transmission() {
    let (activator, stack) = setup_stack("agent-a").await;

    let coder = AgentCard::new("coder", "coder", v("1.0.0"))
        .with_service(ServiceDescriptor {
            name: "generateCode".into(),
            method: "generateCode".into(),
            parameters: None,
            returns: None,
            cost: 20,
            latency_ms: 100,
            reliability: 0.99,
        })
        .with_endpoint(Endpoint {
            protocol: TransportKind::Tcp,
            address: "127.0.0.1".into(),
            port: Some(9),
            path: None,
            secure: false,
            max_connections: None,
        });
    stack.registry.register(coder, None).unwrap();

    let mut message = Message::request(
        "agent-a",
        Target::One("coder".into()),
        "generateCode",
        serde_json::json!({ "spec": "fizzbuzz" }),
    );
    message.route = Some(RouteInfo {
        path: Vec::new(),
        hops: 0,
        strategy: Some(RoutingStrategy::CostOptimized),
        max_hops: None,
    });
    message.context = Some(MessageContext {
        max_cost: Some(10),
        ..MessageContext::default()
    });

    let err = stack.send(message).await.unwrap_err();
    assert_eq!(err.kind(), A2aErrorKind::ResourceExhausted);

    // Nothing was transmitted: the pool never opened a connection.
    assert_eq!(stack.transport.pool().len(), 0);

    activator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Scenario 4 — Broadcast with partial failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_aggregates_successes_and_failures() {
    let (activator, stack) = setup_stack("agent-a").await;

    let live1 = spawn_tcp_agent("live-1").await;
    let live2 = spawn_tcp_agent("live-2").await;
    stack.registry.register(tcp_card("live-1", live1), None).unwrap();
    stack.registry.register(tcp_card("live-2", live2), None).unwrap();
    stack.registry.register(dead_card("dead-1"), None).unwrap();
    stack.registry.register(dead_card("dead-2"), None).unwrap();

    let mut message = Message::request(
        "agent-a",
        Target::Broadcast,
        "announce",
        serde_json::json!({}),
    );
    message.context = Some(MessageContext {
        partial_success: Some(true),
        timeout_ms: Some(2_000),
        ..MessageContext::default()
    });

    let outcome = stack.broadcast(message).await.unwrap();

    assert_eq!(outcome.responses.len(), 2, "both live peers answered");
    assert_eq!(outcome.failures.len(), 2, "both dead peers reported");
    for failure in &outcome.failures {
        assert!(failure.peer_id.starts_with("dead-"));
        assert_eq!(
            failure.error.data.error_type,
            A2aErrorKind::AgentUnavailable
        );
    }

    activator.shutdown().await;
}

#[tokio::test]
async fn broadcast_to_empty_mesh_is_an_empty_success() {
    let (activator, stack) = setup_stack("agent-a").await;

    let mut message = Message::request(
        "agent-a",
        Target::Broadcast,
        "announce",
        serde_json::json!({}),
    );
    message.context = Some(MessageContext {
        partial_success: Some(true),
        ..MessageContext::default()
    });

    let outcome = stack.broadcast(message).await.unwrap();
    assert!(outcome.responses.is_empty());
    assert!(outcome.failures.is_empty());

    activator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Scenario 5 — TTL expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ttl_expiry_removes_the_peer_everywhere() {
    let (activator, stack) = setup_stack("agent-a").await;

    let durable = AgentCard::new("durable", "durable", v("1.0.0"))
        .with_capability(Capability::new("compute", v("1.0.0")));
    let ephemeral = AgentCard::new("ephemeral", "ephemeral", v("1.0.0"))
        .with_capability(Capability::new("compute", v("1.0.0")));

    stack.registry.register(durable, None).unwrap();
    stack
        .registry
        .register(ephemeral, Some(Duration::from_millis(150)))
        .unwrap();

    let before = stack
        .discovery
        .discover(&DiscoveryQuery::default())
        .unwrap()
        .total_found;
    assert_eq!(before, 2);

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Read-side expiry: get returns None and purges indexes.
    assert!(stack.registry.get("ephemeral").is_none());
    assert!(!stack.registry.indexes().references("ephemeral"));

    let after = stack
        .discovery
        .discover(&DiscoveryQuery::default())
        .unwrap()
        .total_found;
    assert_eq!(after, before - 1);
    assert!(stack.registry.get("durable").is_some());

    activator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Scenario 6 — Reconnect under fault
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_after_killed_connection_reconnects_within_retry_budget() {
    let (activator, stack) = setup_stack("agent-a").await;
    let addr = spawn_tcp_agent("agent-b").await;
    stack.registry.register(tcp_card("agent-b", addr), None).unwrap();

    // Warm the connection, then kill it out from under the stack.
    let first = Message::request(
        "agent-a",
        Target::One("agent-b".into()),
        "ping",
        serde_json::json!({}),
    );
    stack.send(first).await.unwrap();

    let pooled = stack.transport.pool().for_peer("agent-b").unwrap();
    stack.transport.disconnect(&pooled.id).await;

    // The very next send must transparently re-dial.
    let second = Message::request(
        "agent-a",
        Target::One("agent-b".into()),
        "ping",
        serde_json::json!({}),
    );
    let response = stack.send(second).await.unwrap();
    assert_eq!(response.result, Some(serde_json::json!({ "echo": "ping" })));

    assert!(activator.fallbacks_used().is_empty());

    activator.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cross-cutting invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unregister_purges_every_index() {
    let (activator, stack) = setup_stack("agent-a").await;

    let card = AgentCard::new("worker", "worker", v("1.0.0"))
        .with_capability(Capability::new("compute", v("1.0.0")))
        .with_service(ServiceDescriptor {
            name: "run".into(),
            method: "agent.run".into(),
            parameters: None,
            returns: None,
            cost: 1,
            latency_ms: 10,
            reliability: 1.0,
        })
        .with_agent_type("worker");
    stack.registry.register(card, None).unwrap();

    assert!(stack.registry.indexes().with_capability("compute").contains("worker"));
    assert!(stack.registry.indexes().with_service("agent.run").contains("worker"));
    assert!(stack.registry.indexes().of_type("worker").contains("worker"));

    stack.registry.unregister("worker");
    assert!(!stack.registry.indexes().references("worker"));

    activator.shutdown().await;
}

#[tokio::test]
async fn two_isolated_activators_coexist_in_one_process() {
    let (activator_a, stack_a) = setup_stack("mesh-a").await;
    let (activator_b, stack_b) = setup_stack("mesh-b").await;

    stack_a
        .registry
        .register(AgentCard::new("only-in-a", "x", v("1.0.0")), None)
        .unwrap();

    assert_eq!(stack_a.registry.live_count(), 1);
    assert_eq!(stack_b.registry.live_count(), 0, "registries are isolated");

    activator_a.shutdown().await;
    assert_eq!(stack_a.registry.live_count(), 0);
    // B is untouched by A's teardown.
    assert!(activator_b.stack().is_some());
    activator_b.shutdown().await;
}
