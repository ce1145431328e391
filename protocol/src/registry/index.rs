//! # Card Indexes
//!
//! Three inverted structures mapping name → set of peer ids: capability
//! index, service index (keyed by both service name and RPC method), and
//! type index. The registry owns these and mutates them under its write
//! path; every relation in an index corresponds to a live entry.
//!
//! `apply_diff` is the interesting part: on `update(card)` only the
//! set-difference between old and new cards touches the maps, so an
//! unchanged card is a no-op on indexes.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::card::AgentCard;

/// The registry's inverted indexes.
#[derive(Debug, Default)]
pub struct CardIndexes {
    by_capability: DashMap<String, HashSet<String>>,
    by_service: DashMap<String, HashSet<String>>,
    by_type: DashMap<String, HashSet<String>>,
}

impl CardIndexes {
    /// Creates empty indexes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every relation on `card`.
    pub fn insert(&self, card: &AgentCard) {
        for cap in &card.capabilities {
            self.by_capability
                .entry(cap.name.clone())
                .or_default()
                .insert(card.id.clone());
        }
        for svc in &card.services {
            self.by_service
                .entry(svc.name.clone())
                .or_default()
                .insert(card.id.clone());
            self.by_service
                .entry(svc.method.clone())
                .or_default()
                .insert(card.id.clone());
        }
        self.by_type
            .entry(card.metadata.agent_type.clone())
            .or_default()
            .insert(card.id.clone());
    }

    /// Remove every relation on `card`. Keys left empty are dropped.
    pub fn remove(&self, card: &AgentCard) {
        for cap in &card.capabilities {
            Self::remove_relation(&self.by_capability, &cap.name, &card.id);
        }
        for svc in &card.services {
            Self::remove_relation(&self.by_service, &svc.name, &card.id);
            Self::remove_relation(&self.by_service, &svc.method, &card.id);
        }
        Self::remove_relation(&self.by_type, &card.metadata.agent_type, &card.id);
    }

    /// Re-index the difference between `old` and `new` (same agent id).
    /// Relations present on both cards are untouched.
    pub fn apply_diff(&self, old: &AgentCard, new: &AgentCard) {
        let id = &new.id;

        let old_caps: HashSet<&str> = old.capabilities.iter().map(|c| c.name.as_str()).collect();
        let new_caps: HashSet<&str> = new.capabilities.iter().map(|c| c.name.as_str()).collect();
        for removed in old_caps.difference(&new_caps) {
            Self::remove_relation(&self.by_capability, removed, id);
        }
        for added in new_caps.difference(&old_caps) {
            self.by_capability
                .entry((*added).to_string())
                .or_default()
                .insert(id.clone());
        }

        let old_svcs: HashSet<&str> = old
            .services
            .iter()
            .flat_map(|s| [s.name.as_str(), s.method.as_str()])
            .collect();
        let new_svcs: HashSet<&str> = new
            .services
            .iter()
            .flat_map(|s| [s.name.as_str(), s.method.as_str()])
            .collect();
        for removed in old_svcs.difference(&new_svcs) {
            Self::remove_relation(&self.by_service, removed, id);
        }
        for added in new_svcs.difference(&old_svcs) {
            self.by_service
                .entry((*added).to_string())
                .or_default()
                .insert(id.clone());
        }

        if old.metadata.agent_type != new.metadata.agent_type {
            Self::remove_relation(&self.by_type, &old.metadata.agent_type, id);
            self.by_type
                .entry(new.metadata.agent_type.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    /// Peer ids advertising `capability`.
    pub fn with_capability(&self, capability: &str) -> HashSet<String> {
        self.by_capability
            .get(capability)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Peer ids exposing a service by name or RPC method.
    pub fn with_service(&self, name_or_method: &str) -> HashSet<String> {
        self.by_service
            .get(name_or_method)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Peer ids of a given agent type.
    pub fn of_type(&self, agent_type: &str) -> HashSet<String> {
        self.by_type
            .get(agent_type)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Whether any index still references `agent_id`. Test support for the
    /// no-dangling-relations invariant.
    pub fn references(&self, agent_id: &str) -> bool {
        self.by_capability
            .iter()
            .chain(self.by_service.iter())
            .chain(self.by_type.iter())
            .any(|entry| entry.value().contains(agent_id))
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.by_capability.clear();
        self.by_service.clear();
        self.by_type.clear();
    }

    fn remove_relation(map: &DashMap<String, HashSet<String>>, key: &str, agent_id: &str) {
        let emptied = match map.get_mut(key) {
            Some(mut set) => {
                set.remove(agent_id);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            map.remove_if(key, |_, set| set.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{AgentCard, Capability, ServiceDescriptor};
    use semver::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn svc(name: &str, method: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.into(),
            method: method.into(),
            parameters: None,
            returns: None,
            cost: 1,
            latency_ms: 10,
            reliability: 1.0,
        }
    }

    fn card(id: &str) -> AgentCard {
        AgentCard::new(id, id, v("1.0.0"))
            .with_capability(Capability::new("web-research", v("1.2.0")))
            .with_service(svc("search", "agent.search"))
            .with_agent_type("researcher")
    }

    #[test]
    fn insert_and_query_all_three_indexes() {
        let indexes = CardIndexes::new();
        indexes.insert(&card("r1"));

        assert!(indexes.with_capability("web-research").contains("r1"));
        assert!(indexes.with_service("search").contains("r1"));
        assert!(indexes.with_service("agent.search").contains("r1"));
        assert!(indexes.of_type("researcher").contains("r1"));
        assert!(indexes.with_capability("nope").is_empty());
    }

    #[test]
    fn remove_leaves_no_dangling_references() {
        let indexes = CardIndexes::new();
        let c = card("r1");
        indexes.insert(&c);
        indexes.remove(&c);

        assert!(!indexes.references("r1"));
        assert!(indexes.with_capability("web-research").is_empty());
    }

    #[test]
    fn diff_touches_only_changed_relations() {
        let indexes = CardIndexes::new();
        let old = card("r1");
        indexes.insert(&old);

        // Same capability, new service, new type.
        let new = AgentCard::new("r1", "r1", v("1.0.0"))
            .with_capability(Capability::new("web-research", v("1.2.0")))
            .with_service(svc("summarize", "agent.summarize"))
            .with_agent_type("analyst");
        indexes.apply_diff(&old, &new);

        assert!(indexes.with_capability("web-research").contains("r1"));
        assert!(indexes.with_service("agent.summarize").contains("r1"));
        assert!(indexes.with_service("agent.search").is_empty());
        assert!(indexes.of_type("analyst").contains("r1"));
        assert!(indexes.of_type("researcher").is_empty());
    }

    #[test]
    fn unchanged_card_diff_is_a_no_op() {
        let indexes = CardIndexes::new();
        let c = card("r1");
        indexes.insert(&c);
        indexes.apply_diff(&c, &c.clone());

        assert!(indexes.with_capability("web-research").contains("r1"));
        assert!(indexes.of_type("researcher").contains("r1"));
    }

    #[test]
    fn shared_keys_keep_other_agents() {
        let indexes = CardIndexes::new();
        indexes.insert(&card("r1"));
        indexes.insert(&card("r2"));

        indexes.remove(&card("r1"));

        assert!(!indexes.references("r1"));
        assert!(indexes.with_capability("web-research").contains("r2"));
    }
}
