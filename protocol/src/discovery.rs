//! # Discovery Service
//!
//! Filter-based queries on top of the registry. A query names required
//! capabilities, an agent type, a hop-distance ceiling, and field filters;
//! the service composes candidate sets from the registry indexes and
//! evaluates filters against a pre-declared schema of addressable card
//! fields.
//!
//! Field addressing is deliberately closed: dotted paths resolve through
//! [`field_value`], and a path outside [`ADDRESSABLE_FIELDS`] is rejected
//! when the query is validated — not silently at evaluation time. A field
//! that is addressable but absent on a particular card evaluates to
//! not-match rather than an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::card::{AgentCard, CapabilityRequirement};
use crate::error::{A2aError, A2aResult};
use crate::registry::AgentRegistry;
use crate::router::topology::TopologyGraph;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Comparison operator in a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Greater-than (numbers; strings lexicographically).
    Gt,
    /// Less-than.
    Lt,
    /// Greater-or-equal.
    Gte,
    /// Less-or-equal.
    Lte,
    /// Membership: the card value is one of the listed values.
    In,
    /// Substring or element containment.
    Contains,
}

/// One field constraint: `{field, operator, value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Dotted path into the card (e.g. `metadata.load`).
    pub field: String,
    /// Comparison operator.
    pub operator: FilterOp,
    /// Right-hand value.
    pub value: serde_json::Value,
}

/// The closed set of dotted paths filters may address.
pub const ADDRESSABLE_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "version",
    "metadata.agentType",
    "metadata.status",
    "metadata.load",
    "metadata.createdAt",
    "metadata.lastSeen",
    "metadata.trustLevel",
];

/// Resolves an addressable path on a card. `None` when the card has no
/// value there (e.g. an unset trust level).
pub fn field_value(card: &AgentCard, path: &str) -> Option<serde_json::Value> {
    match path {
        "id" => Some(serde_json::Value::String(card.id.clone())),
        "name" => Some(serde_json::Value::String(card.name.clone())),
        "description" => Some(serde_json::Value::String(card.description.clone())),
        "version" => Some(serde_json::Value::String(card.version.to_string())),
        "metadata.agentType" => Some(serde_json::Value::String(
            card.metadata.agent_type.clone(),
        )),
        "metadata.status" => serde_json::to_value(card.metadata.status).ok(),
        "metadata.load" => serde_json::Number::from_f64(card.metadata.load)
            .map(serde_json::Value::Number),
        "metadata.createdAt" => Some(serde_json::Value::from(card.metadata.created_at)),
        "metadata.lastSeen" => Some(serde_json::Value::from(card.metadata.last_seen)),
        "metadata.trustLevel" => card
            .metadata
            .trust_level
            .and_then(|t| serde_json::to_value(t).ok()),
        _ => None,
    }
}

impl Filter {
    /// Whether `card` passes this filter. Missing values never match.
    pub fn matches(&self, card: &AgentCard) -> bool {
        let Some(actual) = field_value(card, &self.field) else {
            return false;
        };

        match self.operator {
            FilterOp::Eq => actual == self.value,
            FilterOp::Ne => actual != self.value,
            FilterOp::Gt => compare(&actual, &self.value)
                .map(|o| o == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            FilterOp::Lt => compare(&actual, &self.value)
                .map(|o| o == std::cmp::Ordering::Less)
                .unwrap_or(false),
            FilterOp::Gte => compare(&actual, &self.value)
                .map(|o| o != std::cmp::Ordering::Less)
                .unwrap_or(false),
            FilterOp::Lte => compare(&actual, &self.value)
                .map(|o| o != std::cmp::Ordering::Greater)
                .unwrap_or(false),
            FilterOp::In => match &self.value {
                serde_json::Value::Array(options) => options.contains(&actual),
                _ => false,
            },
            FilterOp::Contains => match (&actual, &self.value) {
                (serde_json::Value::String(haystack), serde_json::Value::String(needle)) => {
                    haystack.contains(needle.as_str())
                }
                (serde_json::Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
        }
    }
}

/// Ordering between two JSON scalars, when one exists.
fn compare(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => {
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (serde_json::Value::String(x), serde_json::Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Query & Result
// ---------------------------------------------------------------------------

/// A discovery query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryQuery {
    /// Capabilities every returned card must advertise. `name@x.y.z`
    /// entries apply the semver-compatible rule; bare names match any
    /// version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<CapabilityRequirement>>,
    /// Restrict to one agent type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Restrict to peers within this many hops of the local peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<usize>,
    /// Field filters, all of which must pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
}

impl DiscoveryQuery {
    /// Validates the query up front: every filter path must be in the
    /// addressable schema.
    pub fn validate(&self) -> A2aResult<()> {
        if let Some(filters) = &self.filters {
            for filter in filters {
                if !ADDRESSABLE_FIELDS.contains(&filter.field.as_str()) {
                    return Err(A2aError::Validation(format!(
                        "unknown filter field {:?}",
                        filter.field
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What a discovery query returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Matching cards.
    pub agents: Vec<AgentCard>,
    /// `agents.len()`, kept explicit for wire compatibility.
    pub total_found: usize,
    /// Query evaluation time in milliseconds.
    #[serde(rename = "searchTime")]
    pub search_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Filter-based discovery over a registry, optionally distance-aware when
/// given the router's topology view.
pub struct DiscoveryService {
    registry: Arc<AgentRegistry>,
    local_agent_id: String,
    topology: Option<Arc<TopologyGraph>>,
}

impl DiscoveryService {
    /// Creates a discovery service over `registry`. `local_agent_id` is the
    /// origin for distance filtering.
    pub fn new(registry: Arc<AgentRegistry>, local_agent_id: impl Into<String>) -> Self {
        Self {
            registry,
            local_agent_id: local_agent_id.into(),
            topology: None,
        }
    }

    /// Attaches the topology view used for `maxDistance` filtering. Without
    /// it, every known peer counts as one hop away.
    pub fn with_topology(mut self, topology: Arc<TopologyGraph>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Runs a query and returns the matching cards.
    pub fn discover(&self, query: &DiscoveryQuery) -> A2aResult<DiscoveryResult> {
        query.validate()?;
        let started = Instant::now();

        // Start from all live entries.
        let live = self.registry.list();
        let mut candidates: HashSet<String> = live.keys().cloned().collect();

        // Intersect with the capability index per required capability.
        if let Some(requirements) = &query.capabilities {
            for requirement in requirements {
                let holders = self.registry.indexes().with_capability(&requirement.name);
                candidates.retain(|id| holders.contains(id));
            }
        }

        // Intersect with the type index.
        if let Some(agent_type) = &query.agent_type {
            let typed = self.registry.indexes().of_type(agent_type);
            candidates.retain(|id| typed.contains(id));
        }

        let mut agents: Vec<AgentCard> = candidates
            .into_iter()
            .filter_map(|id| live.get(&id).cloned())
            .collect();

        // Version matching applies only when a version was supplied.
        if let Some(requirements) = &query.capabilities {
            agents.retain(|card| card.satisfies_all(requirements));
        }

        // Field filters.
        if let Some(filters) = &query.filters {
            agents.retain(|card| filters.iter().all(|f| f.matches(card)));
        }

        // Distance ceiling.
        if let Some(max_distance) = query.max_distance {
            agents.retain(|card| self.distance_to(&card.id) <= max_distance);
        }

        // Deterministic output order.
        agents.sort_by(|a, b| a.id.cmp(&b.id));

        let result = DiscoveryResult {
            total_found: agents.len(),
            agents,
            search_time_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            total = result.total_found,
            elapsed_ms = result.search_time_ms,
            "discovery query evaluated"
        );
        Ok(result)
    }

    /// Hops from the local peer to `agent_id`. Unknown topology distances
    /// default to one hop (the peer is directly known); unreachable peers
    /// report `usize::MAX`.
    fn distance_to(&self, agent_id: &str) -> usize {
        if agent_id == self.local_agent_id {
            return 0;
        }
        match &self.topology {
            Some(graph) => graph
                .hop_distance(&self.local_agent_id, agent_id)
                .unwrap_or(usize::MAX),
            None => 1,
        }
    }
}
