//! # External RPC Bridge
//!
//! Translates A2A requests into calls on an external tool-RPC system
//! (an MCP-style tool server, typically) and maps the results back into
//! A2A responses. The bridge implements the same [`MessageTransport`]
//! contract as the real transport, so upstream code addresses it exactly
//! like a peer: it registers a synthetic agent card and the router routes
//! to it without knowing the difference.
//!
//! Dependency direction is one-way: the bridge knows about the registry
//! and the transport trait; neither knows about the bridge.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::card::{AgentCard, Capability, Endpoint, ServiceDescriptor};
use crate::error::{A2aError, A2aResult};
use crate::message::Message;
use crate::registry::AgentRegistry;
use crate::transport::{MessageTransport, TransportKind};

// ---------------------------------------------------------------------------
// Tool RPC Client
// ---------------------------------------------------------------------------

/// The external tool-calling system the bridge fronts. Implementations
/// live in the embedding process; the core only needs call semantics.
#[async_trait]
pub trait ToolRpcClient: Send + Sync {
    /// Invokes a named tool with JSON arguments.
    async fn call_tool(&self, tool: &str, arguments: serde_json::Value)
        -> A2aResult<serde_json::Value>;
    /// Name of the bridged system, used in the synthetic card.
    fn system_name(&self) -> &str;
    /// Whether the system is currently reachable.
    async fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Method Mapping
// ---------------------------------------------------------------------------

/// One declarative parameter transform, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ParamTransform {
    /// Renames a top-level key.
    Rename {
        /// Existing key.
        from: String,
        /// New key.
        to: String,
    },
    /// Injects a constant value under a key.
    Inject {
        /// Key to set.
        key: String,
        /// Value to inject.
        value: serde_json::Value,
    },
    /// Wraps the whole object under a single key.
    Nest {
        /// The wrapping key.
        under: String,
    },
}

/// Mapping from one A2A method to one external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodMap {
    /// The A2A method name peers call.
    pub a2a_method: String,
    /// The external tool invoked.
    pub tool_name: String,
    /// Parameter transforms, applied in order.
    #[serde(default)]
    pub transforms: Vec<ParamTransform>,
    /// Dotted path into the tool result to unwrap as the A2A result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_path: Option<String>,
    /// Declared cost for the service descriptor on the synthetic card.
    #[serde(default)]
    pub cost: u64,
}

impl MethodMap {
    /// A mapping with no transforms.
    pub fn new(a2a_method: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            a2a_method: a2a_method.into(),
            tool_name: tool_name.into(),
            transforms: Vec::new(),
            response_path: None,
            cost: 0,
        }
    }

    /// Applies the declared transforms to a params object.
    pub fn map_params(&self, params: serde_json::Value) -> serde_json::Value {
        let mut current = params;
        for transform in &self.transforms {
            current = match transform {
                ParamTransform::Rename { from, to } => {
                    if let serde_json::Value::Object(mut map) = current {
                        if let Some(value) = map.remove(from) {
                            map.insert(to.clone(), value);
                        }
                        serde_json::Value::Object(map)
                    } else {
                        current
                    }
                }
                ParamTransform::Inject { key, value } => {
                    if let serde_json::Value::Object(mut map) = current {
                        map.insert(key.clone(), value.clone());
                        serde_json::Value::Object(map)
                    } else {
                        current
                    }
                }
                ParamTransform::Nest { under } => {
                    let mut wrapped = serde_json::Map::new();
                    wrapped.insert(under.clone(), current);
                    serde_json::Value::Object(wrapped)
                }
            };
        }
        current
    }

    /// Unwraps the declared response path from a tool result.
    pub fn map_response(&self, result: serde_json::Value) -> serde_json::Value {
        let Some(path) = &self.response_path else {
            return result;
        };
        let mut current = &result;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return serde_json::Value::Null,
            }
        }
        current.clone()
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// The bridge itself: a method table in front of a [`ToolRpcClient`].
pub struct RpcBridge {
    agent_id: String,
    client: Arc<dyn ToolRpcClient>,
    methods: HashMap<String, MethodMap>,
}

impl RpcBridge {
    /// Creates a bridge advertising itself as `agent_id`.
    pub fn new(agent_id: impl Into<String>, client: Arc<dyn ToolRpcClient>) -> Self {
        Self {
            agent_id: agent_id.into(),
            client,
            methods: HashMap::new(),
        }
    }

    /// Adds a method mapping.
    pub fn with_method(mut self, map: MethodMap) -> Self {
        self.methods.insert(map.a2a_method.clone(), map);
        self
    }

    /// The synthetic peer id the bridge answers as.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Whether the bridged system currently answers.
    pub async fn is_available(&self) -> bool {
        self.client.is_available().await
    }

    /// The synthetic card advertising every mapped method as a service.
    pub fn synthetic_card(&self) -> AgentCard {
        let mut card = AgentCard::new(
            self.agent_id.clone(),
            format!("bridge:{}", self.client.system_name()),
            Version::new(1, 0, 0),
        )
        .with_agent_type("bridge")
        .with_endpoint(Endpoint {
            protocol: TransportKind::Http,
            address: format!("bridge://{}", self.client.system_name()),
            port: None,
            path: None,
            secure: false,
            max_connections: None,
        });

        for map in self.methods.values() {
            card = card
                .with_capability(Capability::new(map.a2a_method.clone(), Version::new(1, 0, 0)))
                .with_service(ServiceDescriptor {
                    name: map.a2a_method.clone(),
                    method: map.a2a_method.clone(),
                    parameters: None,
                    returns: None,
                    cost: map.cost,
                    latency_ms: 100,
                    reliability: 0.99,
                });
        }
        card
    }

    /// Registers (or refreshes) the synthetic card in the registry.
    pub fn register_with(&self, registry: &AgentRegistry) -> A2aResult<()> {
        let card = self.synthetic_card();
        match registry.register(card.clone(), None) {
            Ok(_) => Ok(()),
            Err(A2aError::AlreadyRegistered { .. }) => registry.update(card).map(|_| ()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageTransport for RpcBridge {
    async fn send_request(&self, message: Message) -> A2aResult<Message> {
        let method = message
            .method
            .as_deref()
            .ok_or_else(|| A2aError::Protocol("bridge request requires a method".into()))?;
        let map = self
            .methods
            .get(method)
            .ok_or_else(|| A2aError::CapabilityNotFound {
                capability: method.to_string(),
            })?;

        let params = map.map_params(message.params.clone().unwrap_or(serde_json::json!({})));
        debug!(method, tool = %map.tool_name, "bridging request");

        match self.client.call_tool(&map.tool_name, params).await {
            Ok(result) => Ok(Message::response_to(
                &message,
                self.agent_id.clone(),
                map.map_response(result),
            )),
            Err(e) => Ok(Message::error_response(
                &message,
                self.agent_id.clone(),
                e.to_wire(&self.agent_id),
            )),
        }
    }

    async fn send_notification(&self, message: Message) -> A2aResult<()> {
        let Some(method) = message.method.as_deref() else {
            return Ok(());
        };
        if let Some(map) = self.methods.get(method) {
            let params = map.map_params(message.params.clone().unwrap_or(serde_json::json!({})));
            let _ = self.client.call_tool(&map.tool_name, params).await?;
        }
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "bridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Target;
    use parking_lot::Mutex;

    struct FakeTools {
        calls: Mutex<Vec<(String, serde_json::Value)>>,
        available: bool,
    }

    impl FakeTools {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                available: true,
            })
        }
    }

    #[async_trait]
    impl ToolRpcClient for FakeTools {
        async fn call_tool(
            &self,
            tool: &str,
            arguments: serde_json::Value,
        ) -> A2aResult<serde_json::Value> {
            self.calls.lock().push((tool.to_string(), arguments));
            if tool == "broken_tool" {
                return Err(A2aError::Internal("tool exploded".into()));
            }
            Ok(serde_json::json!({ "content": { "text": "tool says hi" } }))
        }

        fn system_name(&self) -> &str {
            "toolbox"
        }

        async fn is_available(&self) -> bool {
            self.available
        }
    }

    fn bridge(tools: Arc<FakeTools>) -> RpcBridge {
        RpcBridge::new("bridge:toolbox", tools).with_method(MethodMap {
            a2a_method: "agent.search".into(),
            tool_name: "web_search".into(),
            transforms: vec![
                ParamTransform::Rename {
                    from: "query".into(),
                    to: "q".into(),
                },
                ParamTransform::Inject {
                    key: "source".into(),
                    value: serde_json::json!("a2a"),
                },
            ],
            response_path: Some("content.text".into()),
            cost: 3,
        })
    }

    fn request(method: &str) -> Message {
        Message::request(
            "node-a",
            Target::One("bridge:toolbox".into()),
            method,
            serde_json::json!({"query": "rust"}),
        )
    }

    #[tokio::test]
    async fn request_is_translated_and_response_unwrapped() {
        let tools = FakeTools::new();
        let bridge = bridge(Arc::clone(&tools));

        let response = bridge.send_request(request("agent.search")).await.unwrap();
        assert_eq!(response.result, Some(serde_json::json!("tool says hi")));

        let calls = tools.calls.lock();
        let (tool, args) = &calls[0];
        assert_eq!(tool, "web_search");
        assert_eq!(args["q"], "rust");
        assert_eq!(args["source"], "a2a");
        assert!(args.get("query").is_none(), "renamed key removed");
    }

    #[tokio::test]
    async fn unmapped_method_is_capability_not_found() {
        let bridge = bridge(FakeTools::new());
        let err = bridge.send_request(request("agent.unknown")).await.unwrap_err();
        assert!(matches!(err, A2aError::CapabilityNotFound { .. }));
    }

    #[tokio::test]
    async fn tool_failure_becomes_an_error_response() {
        let bridge = RpcBridge::new("bridge:toolbox", FakeTools::new())
            .with_method(MethodMap::new("agent.boom", "broken_tool"));

        let response = bridge.send_request(request("agent.boom")).await.unwrap();
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.data.error_type, crate::error::A2aErrorKind::InternalError);
    }

    #[test]
    fn nest_transform_wraps_params() {
        let map = MethodMap {
            transforms: vec![ParamTransform::Nest {
                under: "input".into(),
            }],
            ..MethodMap::new("m", "t")
        };
        let out = map.map_params(serde_json::json!({"a": 1}));
        assert_eq!(out, serde_json::json!({"input": {"a": 1}}));
    }

    #[test]
    fn missing_response_path_yields_null() {
        let map = MethodMap {
            response_path: Some("no.such.path".into()),
            ..MethodMap::new("m", "t")
        };
        assert_eq!(
            map.map_response(serde_json::json!({"x": 1})),
            serde_json::Value::Null
        );
    }

    #[test]
    fn synthetic_card_advertises_every_method() {
        let bridge = bridge(FakeTools::new());
        let card = bridge.synthetic_card();

        assert_eq!(card.id, "bridge:toolbox");
        assert_eq!(card.metadata.agent_type, "bridge");
        assert!(card.capability("agent.search").is_some());
        assert_eq!(card.service("agent.search").unwrap().cost, 3);
        assert!(!card.endpoints.is_empty());
        assert!(card.validate().is_ok());
    }

    #[test]
    fn register_with_is_idempotent() {
        let registry = AgentRegistry::new();
        let bridge = bridge(FakeTools::new());

        bridge.register_with(&registry).unwrap();
        bridge.register_with(&registry).unwrap();
        assert_eq!(registry.live_count(), 1);
        assert!(registry.get("bridge:toolbox").is_some());
    }
}
