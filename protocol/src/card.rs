//! # Agent Cards
//!
//! An agent card is the descriptor a peer advertises to the mesh: identity,
//! versioned capabilities, concrete RPC services with declared economics
//! (cost/latency/reliability), reachable endpoints, and liveness metadata.
//! The registry stores cards; the discovery service and router select among
//! them.
//!
//! ## Version semantics
//!
//! Capability matching is semver-compatible: the candidate's major version
//! must equal the required major, and the candidate's `(minor, patch)` must
//! be at least the required pair. Pre-release and build metadata never
//! satisfy a requirement — `2.0.0-rc1` does not match a required `2.0.0`,
//! in either direction.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{A2aError, A2aResult};
use crate::message::now_millis;
use crate::transport::TransportKind;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A named, versioned ability a peer claims to provide, independent of any
/// specific RPC method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Capability name, unique within a card.
    pub name: String,
    /// Semantic version of the capability contract.
    pub version: Version,
    /// Free-form parameter schema or defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Resources the capability needs to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Capabilities this one requires on the same card.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Capabilities this one cannot coexist with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

impl Capability {
    /// Creates a capability with just a name and version.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            parameters: None,
            resources: None,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Semver-compatible match against a required version.
    pub fn satisfies(&self, required: &Version) -> bool {
        semver_compatible(&self.version, required)
    }
}

/// Declared resource envelope for a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Memory floor in MiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// CPU cores, fractional allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<f64>,
    /// Whether a GPU is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
}

/// Returns true when `candidate` can serve a requirement pinned to
/// `required` under the compatible-match rule.
pub fn semver_compatible(candidate: &Version, required: &Version) -> bool {
    if !candidate.pre.is_empty() || !required.pre.is_empty() {
        return false;
    }
    candidate.major == required.major
        && (candidate.minor, candidate.patch) >= (required.minor, required.patch)
}

// ---------------------------------------------------------------------------
// Capability Requirement
// ---------------------------------------------------------------------------

/// A requirement the recipient of a message (or a discovery query) must
/// satisfy. On the wire this is a plain string: `"web-research"` matches
/// any version; `"data-analysis@2.0.0"` applies the semver rule.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequirement {
    /// Required capability name.
    pub name: String,
    /// Required version; `None` matches any.
    pub version: Option<Version>,
}

impl CapabilityRequirement {
    /// An unversioned requirement.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    /// A versioned requirement.
    pub fn versioned(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version: Some(version),
        }
    }

    /// Whether `capability` satisfies this requirement.
    pub fn matched_by(&self, capability: &Capability) -> bool {
        if capability.name != self.name {
            return false;
        }
        match &self.version {
            None => true,
            Some(required) => capability.satisfies(required),
        }
    }
}

impl FromStr for CapabilityRequirement {
    type Err = A2aError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            None => Ok(Self::named(s)),
            Some((name, version)) => {
                let version = Version::parse(version).map_err(|e| {
                    A2aError::Validation(format!("bad capability version {:?}: {}", version, e))
                })?;
                Ok(Self::versioned(name, version))
            }
        }
    }
}

impl fmt::Display for CapabilityRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            None => f.write_str(&self.name),
            Some(v) => write!(f, "{}@{}", self.name, v),
        }
    }
}

impl Serialize for CapabilityRequirement {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CapabilityRequirement {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Service & Endpoint
// ---------------------------------------------------------------------------

/// A concrete RPC a peer exposes, with its declared economics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    /// Service name.
    pub name: String,
    /// JSON-RPC method name invoked for this service.
    pub method: String,
    /// Parameter schema or example.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Declared return type, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    /// Declared cost per invocation, in caller-defined units.
    pub cost: u64,
    /// Declared typical latency in milliseconds.
    pub latency_ms: u64,
    /// Declared reliability in `[0, 1]`.
    pub reliability: f64,
}

/// A network address on a particular wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Wire protocol for this endpoint.
    pub protocol: TransportKind,
    /// Host, IP, or URL depending on the protocol.
    pub address: String,
    /// Port; `None` when the address embeds it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// URL path for WebSocket/HTTP endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether TLS is required.
    #[serde(default)]
    pub secure: bool,
    /// Connection cap the peer is willing to accept from us.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Operational status a peer self-reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Accepting work.
    Online,
    /// Accepting work but near capacity.
    Busy,
    /// At capacity; excluded from load-balanced selection.
    Overloaded,
    /// Not accepting work.
    Offline,
}

/// Coarse trust classification used by the security hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Unknown peer; signatures required when security is on.
    Untrusted,
    /// Known peer with an exchanged key.
    Basic,
    /// Peer whose key has been verified out of band.
    Verified,
    /// Peer exempt from verification.
    Trusted,
}

/// Liveness and load metadata attached to a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    /// Agent type tag used by the type index (e.g. "researcher", "coder").
    pub agent_type: String,
    /// Self-reported status.
    pub status: AgentStatus,
    /// Load in `[0, 1]`.
    pub load: f64,
    /// Unix ms when the card was first created.
    pub created_at: u64,
    /// Unix ms when the peer was last seen alive.
    pub last_seen: u64,
    /// Free-form metrics blob the peer chooses to publish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    /// Hex-encoded Ed25519 public key for signature verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Trust classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<TrustLevel>,
}

impl Default for AgentMetadata {
    fn default() -> Self {
        let now = now_millis();
        Self {
            agent_type: "generic".to_string(),
            status: AgentStatus::Online,
            load: 0.0,
            created_at: now,
            last_seen: now,
            metrics: None,
            public_key: None,
            trust_level: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent Card
// ---------------------------------------------------------------------------

/// The full descriptor a peer advertises to the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Peer id, unique within a registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Card version.
    pub version: Version,
    /// Advertised capabilities; names unique within the card.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Exposed RPC services.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    /// Reachable endpoints.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Liveness and load metadata.
    #[serde(default)]
    pub metadata: AgentMetadata,
}

impl AgentCard {
    /// Creates a minimal card. Fill in capabilities/services/endpoints with
    /// the `with_*` builders.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version,
            capabilities: Vec::new(),
            services: Vec::new(),
            endpoints: Vec::new(),
            metadata: AgentMetadata::default(),
        }
    }

    /// Adds a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Adds a service.
    pub fn with_service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// Adds an endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Sets the agent type tag.
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.metadata.agent_type = agent_type.into();
        self
    }

    /// Sets the reported load.
    pub fn with_load(mut self, load: f64) -> Self {
        self.metadata.load = load;
        self
    }

    /// Validates the invariants the registry requires before accepting a
    /// card: non-empty id and name, capability names unique, loads in
    /// range.
    pub fn validate(&self) -> A2aResult<()> {
        if self.id.is_empty() {
            return Err(A2aError::Validation("card id must be non-empty".into()));
        }
        if self.name.is_empty() {
            return Err(A2aError::Validation("card name must be non-empty".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for cap in &self.capabilities {
            if cap.name.is_empty() {
                return Err(A2aError::Validation("capability name must be non-empty".into()));
            }
            if !seen.insert(cap.name.as_str()) {
                return Err(A2aError::Validation(format!(
                    "duplicate capability {:?} on card {}",
                    cap.name, self.id
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.metadata.load) {
            return Err(A2aError::Validation(format!(
                "load {} outside [0, 1] on card {}",
                self.metadata.load, self.id
            )));
        }

        Ok(())
    }

    /// Finds a capability by name.
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Finds a service by name or RPC method.
    pub fn service(&self, name_or_method: &str) -> Option<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|s| s.name == name_or_method || s.method == name_or_method)
    }

    /// Whether this card satisfies every requirement in the set.
    pub fn satisfies_all(&self, requirements: &[CapabilityRequirement]) -> bool {
        requirements
            .iter()
            .all(|req| self.capabilities.iter().any(|cap| req.matched_by(cap)))
    }

    /// The best-matching capability for a requirement: highest
    /// `(minor, patch)` among compatible candidates.
    pub fn best_match(&self, requirement: &CapabilityRequirement) -> Option<&Capability> {
        self.capabilities
            .iter()
            .filter(|cap| requirement.matched_by(cap))
            .max_by_key(|cap| (cap.version.minor, cap.version.patch))
    }

    /// Whether the peer should be excluded from load-balanced selection.
    pub fn is_selectable(&self) -> bool {
        !matches!(
            self.metadata.status,
            AgentStatus::Overloaded | AgentStatus::Offline
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn semver_compatible_rule() {
        // Same major, candidate >= required.
        assert!(semver_compatible(&v("2.1.0"), &v("2.0.0")));
        assert!(semver_compatible(&v("2.0.0"), &v("2.0.0")));
        assert!(semver_compatible(&v("2.0.5"), &v("2.0.3")));

        // Candidate below required.
        assert!(!semver_compatible(&v("1.8.0"), &v("2.0.0")));
        assert!(!semver_compatible(&v("2.0.0"), &v("2.1.0")));

        // Major mismatch in either direction.
        assert!(!semver_compatible(&v("3.0.0"), &v("2.0.0")));

        // Pre-release never matches.
        assert!(!semver_compatible(&v("2.0.0-rc1"), &v("2.0.0")));
        assert!(!semver_compatible(&v("2.1.0"), &v("2.0.0-rc1")));
    }

    #[test]
    fn requirement_parsing() {
        let plain: CapabilityRequirement = "web-research".parse().unwrap();
        assert_eq!(plain.name, "web-research");
        assert!(plain.version.is_none());

        let pinned: CapabilityRequirement = "data-analysis@2.0.0".parse().unwrap();
        assert_eq!(pinned.name, "data-analysis");
        assert_eq!(pinned.version, Some(v("2.0.0")));

        assert!("x@not-a-version".parse::<CapabilityRequirement>().is_err());
    }

    #[test]
    fn requirement_serde_is_a_string() {
        let req = CapabilityRequirement::versioned("data-analysis", v("2.0.0"));
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, "\"data-analysis@2.0.0\"");

        let recovered: CapabilityRequirement = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, req);
    }

    #[test]
    fn unversioned_requirement_matches_any_version() {
        let card = AgentCard::new("r2", "researcher", v("1.0.0"))
            .with_capability(Capability::new("data-analysis", v("1.8.0")));

        assert!(card.satisfies_all(&[CapabilityRequirement::named("data-analysis")]));
        assert!(!card.satisfies_all(&[CapabilityRequirement::versioned(
            "data-analysis",
            v("2.0.0")
        )]));
    }

    #[test]
    fn card_validation() {
        let ok = AgentCard::new("a", "alpha", v("0.1.0"));
        assert!(ok.validate().is_ok());

        let empty_id = AgentCard::new("", "alpha", v("0.1.0"));
        assert!(empty_id.validate().is_err());

        let dup = AgentCard::new("a", "alpha", v("0.1.0"))
            .with_capability(Capability::new("x", v("1.0.0")))
            .with_capability(Capability::new("x", v("2.0.0")));
        assert!(dup.validate().is_err());

        let bad_load = AgentCard::new("a", "alpha", v("0.1.0")).with_load(1.5);
        assert!(bad_load.validate().is_err());
    }

    #[test]
    fn selectability_follows_status() {
        let mut card = AgentCard::new("a", "alpha", v("0.1.0"));
        assert!(card.is_selectable());

        card.metadata.status = AgentStatus::Overloaded;
        assert!(!card.is_selectable());

        card.metadata.status = AgentStatus::Busy;
        assert!(card.is_selectable());
    }

    #[test]
    fn card_round_trips_with_camel_case_keys() {
        let card = AgentCard::new("a", "alpha", v("0.1.0"))
            .with_capability(Capability::new("web-research", v("1.2.0")))
            .with_service(ServiceDescriptor {
                name: "search".into(),
                method: "agent.search".into(),
                parameters: None,
                returns: Some("SearchResult".into()),
                cost: 5,
                latency_ms: 200,
                reliability: 0.99,
            })
            .with_endpoint(Endpoint {
                protocol: TransportKind::WebSocket,
                address: "127.0.0.1".into(),
                port: Some(9851),
                path: Some("/a2a".into()),
                secure: false,
                max_connections: None,
            });

        let json = serde_json::to_string(&card).unwrap();
        assert!(json.contains("\"latencyMs\""));
        assert!(json.contains("\"agentType\""));
        assert!(json.contains("\"lastSeen\""));

        let recovered: AgentCard = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, card);
    }
}
