//! # Message Router
//!
//! Given a message, compute a [`Route`] — an ordered peer path from the
//! local agent to a delivery target — under one of five strategies, then
//! hand it to the transport. The router never mutates registry state: it
//! maintains its own derived view (topology graph, unreachable cool-downs,
//! route cache) driven by [`RegistryEvent`]s, and reads loads straight off
//! the live cards.
//!
//! Selection is synchronous on materialized data. The only async surface
//! is the event pump that keeps the derived view current.

pub mod cache;
pub mod strategy;
pub mod topology;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::card::AgentCard;
use crate::config::{DEFAULT_MAX_HOPS, ROUTE_CACHE_CAPACITY, UNREACHABLE_COOLDOWN};
use crate::error::{A2aError, A2aErrorKind, A2aResult};
use crate::message::{Message, RouteInfo, Target};
use crate::metrics::{MetricKey, MetricsCore};
use crate::registry::{AgentRegistry, RegistryEvent};

use cache::{CacheKey, RouteCache};
use strategy::{pick_capability_aware, pick_cost_optimized, pick_load_balanced, RoutingStrategy};
use topology::TopologyGraph;

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// An ordered list of peer ids a message will traverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// `path[0]` is the local peer; `path[last]` is the delivery target.
    pub path: Vec<String>,
    /// `path.len() - 1`.
    pub hops: usize,
    /// Strategy that produced the path (after any fallback).
    pub strategy: RoutingStrategy,
    /// Hop ceiling the path was computed under.
    pub max_hops: usize,
    /// True when selection had to accept an overloaded candidate.
    pub degraded: bool,
}

impl Route {
    /// The delivery target.
    pub fn target(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// The first peer the transport should write to.
    pub fn next_hop(&self) -> Option<&str> {
        self.path.get(1).map(String::as_str)
    }

    /// The wire form stamped onto the message.
    pub fn to_info(&self) -> RouteInfo {
        RouteInfo {
            path: self.path.clone(),
            hops: self.hops,
            strategy: Some(self.strategy),
            max_hops: Some(self.max_hops),
        }
    }

    /// Enforces the route invariants: local origin, consistent hop count,
    /// hop ceiling, no repeated peer.
    fn validate(&self, local_id: &str) -> A2aResult<()> {
        if self.path.first().map(String::as_str) != Some(local_id) {
            return Err(A2aError::Routing(format!(
                "route must originate at the local peer {}",
                local_id
            )));
        }
        if self.hops != self.path.len().saturating_sub(1) {
            return Err(A2aError::Routing("route hop count is inconsistent".into()));
        }
        if self.hops > self.max_hops {
            return Err(A2aError::Routing(format!(
                "route of {} hops exceeds maxHops {}",
                self.hops, self.max_hops
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for hop in &self.path {
            if !seen.insert(hop.as_str()) {
                return Err(A2aError::Routing(format!(
                    "route contains a cycle through {}",
                    hop
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Router Metrics Report
// ---------------------------------------------------------------------------

/// Snapshot of the router's operational counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterMetricsReport {
    /// Routes computed since startup.
    pub total_routed: u64,
    /// Successful deliveries over recorded outcomes; 1.0 when nothing has
    /// been recorded yet.
    pub success_rate: f64,
    /// Recorded failures, keyed by error kind.
    pub errors_by_kind: HashMap<String, u64>,
    /// Mean route computation time in milliseconds.
    pub avg_routing_time_ms: f64,
    /// Route computations per strategy.
    pub strategy_usage: HashMap<String, u64>,
    /// Route computations per hop count.
    pub hop_distribution: HashMap<usize, u64>,
    /// Live per-agent load, straight off the registry.
    pub agent_loads: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Message Router
// ---------------------------------------------------------------------------

/// The strategy-driven peer and path selector.
pub struct MessageRouter {
    local_id: String,
    default_strategy: RoutingStrategy,
    default_max_hops: usize,
    registry: Arc<AgentRegistry>,
    topology: Arc<TopologyGraph>,
    cache: RouteCache,
    unreachable: DashMap<String, Instant>,
    cooldown: Duration,
    round_robin: AtomicUsize,
    metrics: Arc<MetricsCore>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("local_id", &self.local_id)
            .field("default_strategy", &self.default_strategy)
            .finish()
    }
}

impl MessageRouter {
    /// Creates a router for `local_id` over `registry`, reporting into
    /// `metrics`.
    pub fn new(
        local_id: impl Into<String>,
        registry: Arc<AgentRegistry>,
        metrics: Arc<MetricsCore>,
    ) -> Self {
        let local_id = local_id.into();
        let topology = Arc::new(TopologyGraph::new());
        topology.add_peer(&local_id);

        Self {
            local_id,
            default_strategy: RoutingStrategy::Direct,
            default_max_hops: DEFAULT_MAX_HOPS,
            registry,
            topology,
            cache: RouteCache::new(ROUTE_CACHE_CAPACITY),
            unreachable: DashMap::new(),
            cooldown: UNREACHABLE_COOLDOWN,
            round_robin: AtomicUsize::new(0),
            metrics,
            event_pump: Mutex::new(None),
        }
    }

    /// Overrides the defaults the activator derives from the topology.
    pub fn with_defaults(mut self, strategy: RoutingStrategy, max_hops: usize) -> Self {
        self.default_strategy = strategy;
        self.default_max_hops = max_hops;
        self
    }

    /// Overrides the unreachable cool-down, mainly for tests.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// The local peer id.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Shared view of the topology graph (discovery uses it for distance).
    pub fn topology(&self) -> Arc<TopologyGraph> {
        Arc::clone(&self.topology)
    }

    // -- derived view maintenance -------------------------------------------

    /// Applies one registry event to the derived view.
    pub fn apply_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::Registered { agent_id } => {
                self.topology.add_peer(agent_id);
                // A registered card with an endpoint is directly dialable.
                if self
                    .registry
                    .get(agent_id)
                    .map(|c| !c.endpoints.is_empty())
                    .unwrap_or(false)
                {
                    self.topology.connect(&self.local_id, agent_id);
                }
                self.unreachable.remove(agent_id);
                self.cache.invalidate_agent(agent_id);
            }
            RegistryEvent::Updated { agent_id } => {
                self.cache.invalidate_agent(agent_id);
            }
            RegistryEvent::Unregistered { agent_id } => {
                self.topology.remove_peer(agent_id);
                self.unreachable.remove(agent_id);
                self.cache.invalidate_agent(agent_id);
            }
            RegistryEvent::MetricsUpdated { .. } => {
                // Loads are read live off the cards; nothing cached to drop.
            }
        }
    }

    /// Spawns the event pump feeding [`MessageRouter::apply_event`].
    pub fn start_event_pump(self: Arc<Self>) {
        let mut events = self.registry.subscribe();
        let router = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => router.apply_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "router event pump lagged; rebuilding view");
                        router.cache.clear();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.event_pump.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Records a transport adjacency (both peers become graph nodes).
    pub fn note_adjacency(&self, a: &str, b: &str) {
        self.topology.connect(a, b);
    }

    /// Marks a peer unreachable for the cool-down interval. Called by the
    /// transport when a connection enters `failed`.
    pub fn mark_unreachable(&self, agent_id: &str) {
        warn!(agent = %agent_id, "peer marked unreachable");
        self.unreachable.insert(agent_id.to_string(), Instant::now());
        self.cache.invalidate_agent(agent_id);
    }

    /// Whether a peer is inside its unreachable cool-down.
    pub fn is_unreachable(&self, agent_id: &str) -> bool {
        let since = match self.unreachable.get(agent_id) {
            Some(entry) => *entry.value(),
            None => return false,
        };
        if since.elapsed() < self.cooldown {
            true
        } else {
            self.unreachable.remove(agent_id);
            false
        }
    }

    // -- routing -------------------------------------------------------------

    /// Computes a route for a unicast or ranked-set message.
    ///
    /// Broadcast messages do not produce a single route; expand them with
    /// [`MessageRouter::broadcast_targets`] and route each delivery
    /// individually.
    pub fn route(&self, message: &Message) -> A2aResult<Route> {
        let started = Instant::now();

        let requested = message.route.as_ref().and_then(|r| r.strategy);
        let strategy = requested.unwrap_or(match &message.to {
            Target::One(_) => RoutingStrategy::Direct,
            _ => self.default_strategy,
        });
        let max_hops = message
            .route
            .as_ref()
            .and_then(|r| r.max_hops)
            .unwrap_or(self.default_max_hops);

        let candidate_ids: Vec<String> = match &message.to {
            Target::One(id) => vec![id.clone()],
            Target::Many(ids) => ids.clone(),
            Target::Broadcast => {
                return Err(A2aError::Routing(
                    "broadcast messages fan out per peer; no single route exists".into(),
                ))
            }
        };
        if candidate_ids.is_empty() {
            return Err(A2aError::Routing("empty target set".into()));
        }

        // Cache probe. Only topology-determined strategies are cacheable;
        // load- and cost-sensitive picks must see fresh cards.
        let cache_key = CacheKey::new(&candidate_ids, strategy);
        if matches!(
            strategy,
            RoutingStrategy::Direct | RoutingStrategy::ShortestPath
        ) {
            if let Some(route) = self.cache.get(&cache_key) {
                if !self.is_unreachable(route.target()) {
                    self.record_route_computed(&route, started);
                    trace!(target = route.target(), "route served from cache");
                    return Ok(route);
                }
            }
        }

        let outcome = self.select(strategy, &candidate_ids, message, max_hops);

        // Fallback: a strategy that found no candidate degrades to direct
        // when the target names one concrete, single-hop-reachable peer.
        let route = match outcome {
            Ok(route) => route,
            Err(err) if self.fallback_applies(&err, strategy) => {
                match message.to.single() {
                    Some(single)
                        if self.topology.are_adjacent(&self.local_id, single)
                            && self.registry.get(single).is_some()
                            && !self.is_unreachable(single) =>
                    {
                        debug!(target = single, from_strategy = %strategy, "falling back to direct");
                        self.direct_route(single, max_hops)?
                    }
                    _ => return Err(self.record_route_error(err)),
                }
            }
            Err(err) => return Err(self.record_route_error(err)),
        };

        route.validate(&self.local_id)?;

        if matches!(
            route.strategy,
            RoutingStrategy::Direct | RoutingStrategy::ShortestPath
        ) {
            self.cache.put(cache_key, route.clone());
        }
        self.record_route_computed(&route, started);
        Ok(route)
    }

    /// Expands a broadcast: every live peer except the sender, restricted
    /// to capability-satisfying peers when the message carries
    /// requirements.
    pub fn broadcast_targets(&self, message: &Message) -> Vec<String> {
        let mut targets: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|(id, _)| *id != message.from && *id != self.local_id)
            .filter(|(_, card)| match &message.capabilities {
                Some(requirements) => card.satisfies_all(requirements),
                None => true,
            })
            .map(|(id, _)| id)
            .collect();
        targets.sort();
        targets
    }

    /// Records a delivery outcome against a computed route.
    pub fn record_outcome(&self, route: &Route, outcome: Result<(), &A2aError>) {
        let target = route.target().to_string();
        self.metrics
            .incr_counter(MetricKey::peer("router", &target, "sent"), 1);
        match outcome {
            Ok(()) => {
                self.metrics
                    .incr_counter(MetricKey::component("router", "delivered"), 1);
            }
            Err(err) => {
                let kind = err.kind();
                self.metrics
                    .incr_counter(MetricKey::component("router", "failed"), 1);
                self.metrics.incr_counter(
                    MetricKey::component("router", format!("error:{}", kind)),
                    1,
                );
                self.metrics
                    .incr_counter(MetricKey::peer("router", &target, "errors"), 1);
                if kind == A2aErrorKind::AgentUnavailable {
                    self.mark_unreachable(&target);
                }
            }
        }
    }

    /// Snapshot of routing metrics for observers.
    pub fn metrics_report(&self) -> RouterMetricsReport {
        let total_routed = self
            .metrics
            .counter(&MetricKey::component("router", "total_routed"));
        let delivered = self
            .metrics
            .counter(&MetricKey::component("router", "delivered"));
        let failed = self.metrics.counter(&MetricKey::component("router", "failed"));

        let recorded = delivered + failed;
        let success_rate = if recorded == 0 {
            1.0
        } else {
            delivered as f64 / recorded as f64
        };

        let time_sum_us = self
            .metrics
            .counter(&MetricKey::component("router", "routing_time_us"));
        let avg_routing_time_ms = if total_routed == 0 {
            0.0
        } else {
            (time_sum_us as f64 / total_routed as f64) / 1000.0
        };

        let mut errors_by_kind = HashMap::new();
        let mut strategy_usage = HashMap::new();
        let mut hop_distribution = HashMap::new();
        for (key, value) in self.metrics.counter_snapshot() {
            if let Some(kind) = key.strip_prefix("router:error:") {
                errors_by_kind.insert(kind.to_string(), value);
            } else if let Some(strategy) = key.strip_prefix("router:strategy:") {
                strategy_usage.insert(strategy.to_string(), value);
            } else if let Some(hops) = key.strip_prefix("router:hops:") {
                if let Ok(hops) = hops.parse() {
                    hop_distribution.insert(hops, value);
                }
            }
        }

        let agent_loads = self
            .registry
            .list()
            .into_iter()
            .map(|(id, card)| (id, card.metadata.load))
            .collect();

        RouterMetricsReport {
            total_routed,
            success_rate,
            errors_by_kind,
            avg_routing_time_ms,
            strategy_usage,
            hop_distribution,
            agent_loads,
        }
    }

    /// Stops the event pump and clears derived state.
    pub fn shutdown(&self) {
        if let Some(handle) = self.event_pump.lock().take() {
            handle.abort();
        }
        self.cache.clear();
        self.unreachable.clear();
    }

    // -- selection internals -------------------------------------------------

    fn select(
        &self,
        strategy: RoutingStrategy,
        candidate_ids: &[String],
        message: &Message,
        max_hops: usize,
    ) -> A2aResult<Route> {
        match strategy {
            RoutingStrategy::Direct => {
                let target = candidate_ids
                    .first()
                    .filter(|_| candidate_ids.len() == 1)
                    .ok_or_else(|| {
                        A2aError::Routing("direct routing requires a single target".into())
                    })?;
                self.direct_route(target, max_hops)
            }
            RoutingStrategy::ShortestPath => self.shortest_path_route(candidate_ids, max_hops),
            RoutingStrategy::LoadBalanced => {
                let candidates = self.live_candidates(candidate_ids, message);
                let rr = self.round_robin.fetch_add(1, Ordering::Relaxed);
                let pick = pick_load_balanced(&candidates, |id| self.error_rate(id), rr)
                    .ok_or_else(|| A2aError::CapabilityNotFound {
                        capability: "any selectable candidate".into(),
                    })?;
                let mut route = self.single_hop(&pick.agent_id, RoutingStrategy::LoadBalanced, max_hops);
                route.degraded = pick.degraded;
                Ok(route)
            }
            RoutingStrategy::CapabilityAware => {
                let requirements = message.capabilities.clone().unwrap_or_default();
                let candidates = self.live_candidates(candidate_ids, message);
                let picked = pick_capability_aware(&candidates, &requirements).ok_or_else(|| {
                    A2aError::CapabilityNotFound {
                        capability: requirements
                            .first()
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "any".into()),
                    }
                })?;
                Ok(self.single_hop(&picked.id, RoutingStrategy::CapabilityAware, max_hops))
            }
            RoutingStrategy::CostOptimized => {
                let service = message.method.as_deref().ok_or_else(|| {
                    A2aError::Routing("cost-optimized routing requires a method".into())
                })?;
                let max_cost = message.context.as_ref().and_then(|c| c.max_cost);
                let candidates = self.live_candidates(candidate_ids, message);
                let picked = pick_cost_optimized(&candidates, service, max_cost)?;
                Ok(self.single_hop(&picked.id, RoutingStrategy::CostOptimized, max_hops))
            }
        }
    }

    /// Live, reachable cards for the candidate ids, filtered by the
    /// message's capability requirements when present.
    fn live_candidates(&self, candidate_ids: &[String], message: &Message) -> Vec<AgentCard> {
        candidate_ids
            .iter()
            .filter(|id| !self.is_unreachable(id))
            .filter_map(|id| self.registry.get(id))
            .filter(|card| match &message.capabilities {
                Some(requirements) => card.satisfies_all(requirements),
                None => true,
            })
            .collect()
    }

    fn direct_route(&self, target: &str, max_hops: usize) -> A2aResult<Route> {
        let card = self
            .registry
            .get(target)
            .ok_or_else(|| A2aError::AgentUnavailable {
                agent_id: target.to_string(),
            })?;
        if self.is_unreachable(target) || card.endpoints.is_empty() {
            return Err(A2aError::AgentUnavailable {
                agent_id: target.to_string(),
            });
        }
        Ok(self.single_hop(target, RoutingStrategy::Direct, max_hops))
    }

    fn shortest_path_route(&self, candidate_ids: &[String], max_hops: usize) -> A2aResult<Route> {
        let cards = self.registry.list();
        let weight = |peer: &str| {
            cards
                .get(peer)
                .map(|card| {
                    let latency = card
                        .services
                        .iter()
                        .map(|s| s.latency_ms)
                        .min()
                        .unwrap_or(0);
                    (card.metadata.load, latency)
                })
                .unwrap_or((0.0, 0))
        };

        let mut best: Option<Vec<String>> = None;
        for target in candidate_ids {
            if self.is_unreachable(target) || !cards.contains_key(target) {
                continue;
            }
            if let Some(path) = self
                .topology
                .shortest_path(&self.local_id, target, max_hops, &weight)
            {
                let better = match &best {
                    None => true,
                    Some(current) => path.len() < current.len(),
                };
                if better {
                    best = Some(path);
                }
            }
        }

        let path = best.ok_or_else(|| {
            A2aError::Routing(format!("no path within {} hops", max_hops))
        })?;
        Ok(Route {
            hops: path.len() - 1,
            path,
            strategy: RoutingStrategy::ShortestPath,
            max_hops,
            degraded: false,
        })
    }

    fn single_hop(&self, target: &str, strategy: RoutingStrategy, max_hops: usize) -> Route {
        Route {
            path: vec![self.local_id.clone(), target.to_string()],
            hops: 1,
            strategy,
            max_hops,
            degraded: false,
        }
    }

    fn fallback_applies(&self, err: &A2aError, strategy: RoutingStrategy) -> bool {
        strategy != RoutingStrategy::Direct
            && matches!(
                err,
                A2aError::CapabilityNotFound { .. } | A2aError::Routing(_)
            )
    }

    /// Per-peer delivery error rate from recorded outcomes.
    fn error_rate(&self, agent_id: &str) -> f64 {
        let sent = self
            .metrics
            .counter(&MetricKey::peer("router", agent_id, "sent"));
        if sent == 0 {
            return 0.0;
        }
        let errors = self
            .metrics
            .counter(&MetricKey::peer("router", agent_id, "errors"));
        errors as f64 / sent as f64
    }

    fn record_route_computed(&self, route: &Route, started: Instant) {
        self.metrics
            .incr_counter(MetricKey::component("router", "total_routed"), 1);
        self.metrics.incr_counter(
            MetricKey::component("router", format!("strategy:{}", route.strategy)),
            1,
        );
        self.metrics.incr_counter(
            MetricKey::component("router", format!("hops:{}", route.hops)),
            1,
        );
        let elapsed_us = started.elapsed().as_micros() as u64;
        self.metrics
            .incr_counter(MetricKey::component("router", "routing_time_us"), elapsed_us);
        self.metrics.observe(
            MetricKey::component("router", "routing_time_ms"),
            elapsed_us as f64 / 1000.0,
        );
    }

    fn record_route_error(&self, err: A2aError) -> A2aError {
        self.metrics.incr_counter(
            MetricKey::component("router", format!("route_error:{}", err.kind())),
            1,
        );
        err
    }
}
