//! # Routing Strategies
//!
//! The five peer-selection policies and their pure selection functions.
//! Everything here is synchronous over already-materialized cards; the
//! router supplies candidates and interprets the result.

use serde::{Deserialize, Serialize};

use crate::card::{AgentCard, CapabilityRequirement};
use crate::error::{A2aError, A2aResult};

/// Strategy the router uses to pick peers and paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// One concrete target, one hop.
    Direct,
    /// BFS over the topology graph, fewest hops first.
    ShortestPath,
    /// Least-loaded candidate, error rate and round-robin as tie-breaks.
    LoadBalanced,
    /// Restrict to capability-satisfying candidates, prefer newer versions.
    CapabilityAware,
    /// Cheapest declared service cost under the caller's ceiling.
    CostOptimized,
}

impl RoutingStrategy {
    /// The snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::ShortestPath => "shortest_path",
            Self::LoadBalanced => "load_balanced",
            Self::CapabilityAware => "capability_aware",
            Self::CostOptimized => "cost_optimized",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Load-Balanced Selection
// ---------------------------------------------------------------------------

/// Outcome of load-balanced selection.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancedPick {
    /// Chosen peer id.
    pub agent_id: String,
    /// True when every candidate was overloaded and the least-bad one was
    /// chosen anyway.
    pub degraded: bool,
}

/// Picks the least-loaded selectable candidate.
///
/// Offline peers are never chosen. Overloaded peers are excluded unless
/// everyone is overloaded, in which case the least loaded of them is
/// returned and the pick is marked degraded. Ties on load break by lowest
/// recent error rate, then round-robin over the still-tied set.
pub fn pick_load_balanced(
    candidates: &[AgentCard],
    error_rate: impl Fn(&str) -> f64,
    round_robin: usize,
) -> Option<LoadBalancedPick> {
    let online: Vec<&AgentCard> = candidates
        .iter()
        .filter(|c| c.metadata.status != crate::card::AgentStatus::Offline)
        .collect();
    if online.is_empty() {
        return None;
    }

    let selectable: Vec<&AgentCard> = online
        .iter()
        .copied()
        .filter(|c| c.is_selectable())
        .collect();

    let (pool, degraded) = if selectable.is_empty() {
        (online, true)
    } else {
        (selectable, false)
    };

    // Scale to integral milli-units so ties are exact, not float-fuzzy.
    let scale = |x: f64| (x.clamp(0.0, 1.0) * 1000.0).round() as u64;
    let key = |c: &AgentCard| (scale(c.metadata.load), scale(error_rate(&c.id)));

    let best = pool.iter().map(|c| key(c)).min()?;
    let mut tied: Vec<&AgentCard> = pool.into_iter().filter(|c| key(c) == best).collect();
    tied.sort_by(|a, b| a.id.cmp(&b.id));

    let chosen = tied[round_robin % tied.len()];
    Some(LoadBalancedPick {
        agent_id: chosen.id.clone(),
        degraded,
    })
}

// ---------------------------------------------------------------------------
// Capability-Aware Selection
// ---------------------------------------------------------------------------

/// Picks the best candidate advertising every required capability.
///
/// Among satisfying candidates, prefer the higher matched `(minor, patch)`
/// versions (compared requirement by requirement), then the lower minimum
/// service cost, then the lower load.
pub fn pick_capability_aware<'a>(
    candidates: &'a [AgentCard],
    requirements: &[CapabilityRequirement],
) -> Option<&'a AgentCard> {
    let matching: Vec<&AgentCard> = candidates
        .iter()
        .filter(|c| c.satisfies_all(requirements))
        .collect();

    matching.into_iter().min_by(|a, b| {
        matched_versions(b, requirements)
            .cmp(&matched_versions(a, requirements))
            .then_with(|| min_cost(a).cmp(&min_cost(b)))
            .then_with(|| {
                a.metadata
                    .load
                    .partial_cmp(&b.metadata.load)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// The `(minor, patch)` pairs this card matches each versioned requirement
/// with, in requirement order.
fn matched_versions(card: &AgentCard, requirements: &[CapabilityRequirement]) -> Vec<(u64, u64)> {
    requirements
        .iter()
        .filter(|r| r.version.is_some())
        .filter_map(|r| card.best_match(r))
        .map(|cap| (cap.version.minor, cap.version.patch))
        .collect()
}

/// Lowest declared service cost on the card; peers without services are
/// treated as free.
fn min_cost(card: &AgentCard) -> u64 {
    card.services.iter().map(|s| s.cost).min().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Cost-Optimized Selection
// ---------------------------------------------------------------------------

/// Picks the cheapest provider of `service` (name or RPC method).
///
/// Fails with `capability_not_found` when nobody offers the service, and
/// with `resource_exhausted` when the cheapest offer exceeds `max_cost`.
pub fn pick_cost_optimized<'a>(
    candidates: &'a [AgentCard],
    service: &str,
    max_cost: Option<u64>,
) -> A2aResult<&'a AgentCard> {
    let offers: Vec<(&AgentCard, u64)> = candidates
        .iter()
        .filter_map(|c| c.service(service).map(|s| (c, s.cost)))
        .collect();

    let (card, cost) = offers
        .into_iter()
        .min_by(|(a, ca), (b, cb)| {
            ca.cmp(cb)
                .then_with(|| {
                    a.metadata
                        .load
                        .partial_cmp(&b.metadata.load)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        })
        .ok_or_else(|| A2aError::CapabilityNotFound {
            capability: service.to_string(),
        })?;

    if let Some(ceiling) = max_cost {
        if cost > ceiling {
            return Err(A2aError::CostCeilingExceeded {
                cheapest: cost,
                max_cost: ceiling,
            });
        }
    }

    Ok(card)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{AgentStatus, Capability, ServiceDescriptor};
    use semver::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn card(id: &str, load: f64) -> AgentCard {
        AgentCard::new(id, id, v("1.0.0")).with_load(load)
    }

    fn with_service(card: AgentCard, name: &str, cost: u64) -> AgentCard {
        card.with_service(ServiceDescriptor {
            name: name.into(),
            method: format!("agent.{}", name),
            parameters: None,
            returns: None,
            cost,
            latency_ms: 50,
            reliability: 0.99,
        })
    }

    #[test]
    fn strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&RoutingStrategy::ShortestPath).unwrap(),
            "\"shortest_path\""
        );
        let s: RoutingStrategy = serde_json::from_str("\"load_balanced\"").unwrap();
        assert_eq!(s, RoutingStrategy::LoadBalanced);
    }

    #[test]
    fn load_balanced_picks_lowest_load() {
        let candidates = vec![card("a", 0.8), card("b", 0.2), card("c", 0.5)];
        let pick = pick_load_balanced(&candidates, |_| 0.0, 0).unwrap();
        assert_eq!(pick.agent_id, "b");
        assert!(!pick.degraded);
    }

    #[test]
    fn load_balanced_excludes_offline_and_overloaded() {
        let mut offline = card("a", 0.0);
        offline.metadata.status = AgentStatus::Offline;
        let mut overloaded = card("b", 0.1);
        overloaded.metadata.status = AgentStatus::Overloaded;
        let ok = card("c", 0.9);

        let pick = pick_load_balanced(&[offline, overloaded, ok], |_| 0.0, 0).unwrap();
        assert_eq!(pick.agent_id, "c");
        assert!(!pick.degraded);
    }

    #[test]
    fn all_overloaded_degrades_to_least_loaded() {
        let mut a = card("a", 0.95);
        a.metadata.status = AgentStatus::Overloaded;
        let mut b = card("b", 0.85);
        b.metadata.status = AgentStatus::Overloaded;

        let pick = pick_load_balanced(&[a, b], |_| 0.0, 0).unwrap();
        assert_eq!(pick.agent_id, "b");
        assert!(pick.degraded);
    }

    #[test]
    fn only_offline_candidates_yield_none() {
        let mut a = card("a", 0.0);
        a.metadata.status = AgentStatus::Offline;
        assert!(pick_load_balanced(&[a], |_| 0.0, 0).is_none());
    }

    #[test]
    fn load_ties_break_by_error_rate_then_round_robin() {
        let candidates = vec![card("a", 0.5), card("b", 0.5), card("c", 0.5)];

        // `b` has the lowest error rate.
        let pick = pick_load_balanced(
            &candidates,
            |id| if id == "b" { 0.0 } else { 0.3 },
            0,
        )
        .unwrap();
        assert_eq!(pick.agent_id, "b");

        // All equal: round-robin walks the tied set.
        let first = pick_load_balanced(&candidates, |_| 0.0, 0).unwrap();
        let second = pick_load_balanced(&candidates, |_| 0.0, 1).unwrap();
        let third = pick_load_balanced(&candidates, |_| 0.0, 2).unwrap();
        assert_eq!(first.agent_id, "a");
        assert_eq!(second.agent_id, "b");
        assert_eq!(third.agent_id, "c");
    }

    #[test]
    fn capability_aware_requires_all_and_prefers_newer() {
        let r1 = card("r1", 0.75)
            .with_capability(Capability::new("web-research", v("1.2.0")))
            .with_capability(Capability::new("data-analysis", v("2.0.0")));
        let r2 = card("r2", 0.2).with_capability(Capability::new("data-analysis", v("1.8.0")));
        let r3 = card("r3", 0.1).with_capability(Capability::new("data-analysis", v("2.0.0")));
        let candidates = vec![r1, r2, r3];

        let req = vec![CapabilityRequirement::versioned("data-analysis", v("2.0.0"))];
        // r1 and r3 tie on version; equal cost (none declared); lower load wins.
        let picked = pick_capability_aware(&candidates, &req).unwrap();
        assert_eq!(picked.id, "r3");

        // Newer minor wins over lower load.
        let newer = card("r4", 0.9).with_capability(Capability::new("data-analysis", v("2.3.0")));
        let mut candidates = candidates;
        candidates.push(newer);
        let picked = pick_capability_aware(&candidates, &req).unwrap();
        assert_eq!(picked.id, "r4");
    }

    #[test]
    fn capability_aware_returns_none_when_nobody_satisfies() {
        let only_old = card("r2", 0.2).with_capability(Capability::new("data-analysis", v("1.8.0")));
        let req = vec![CapabilityRequirement::versioned("data-analysis", v("2.0.0"))];
        assert!(pick_capability_aware(&[only_old], &req).is_none());
    }

    #[test]
    fn cost_optimized_picks_cheapest() {
        let a = with_service(card("a", 0.2), "generateCode", 20);
        let b = with_service(card("b", 0.2), "generateCode", 8);
        let cards = [a, b];
        let picked = pick_cost_optimized(&cards, "generateCode", None).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn cost_ceiling_enforced() {
        let coder = with_service(card("coder", 0.1), "generateCode", 20);
        let err = pick_cost_optimized(&[coder], "generateCode", Some(10)).unwrap_err();
        assert!(matches!(err, A2aError::CostCeilingExceeded { cheapest: 20, max_cost: 10 }));
    }

    #[test]
    fn missing_service_is_capability_not_found() {
        let a = with_service(card("a", 0.2), "summarize", 5);
        let err = pick_cost_optimized(&[a], "generateCode", Some(100)).unwrap_err();
        assert!(matches!(err, A2aError::CapabilityNotFound { .. }));
    }
}
