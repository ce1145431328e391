//! # Mesh Topology
//!
//! The declared shape of the peer mesh and the live adjacency graph the
//! router runs path search over. The graph holds peers (registered agents)
//! and undirected edges (known transport adjacencies); `shortest_path` is a
//! uniform-cost search whose cost is lexicographic `(hops, aggregate load,
//! aggregate latency)`, which gives BFS-minimal hop counts with the
//! documented tie-breaks for free.

use std::collections::{BinaryHeap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::strategy::RoutingStrategy;

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Declared mesh shape. Informs the default routing strategy and hop limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Tree-like delegation; paths may be long.
    Hierarchical,
    /// Fully connected working set.
    Mesh,
    /// Each peer forwards to its neighbor.
    Ring,
    /// Everything relays through a hub.
    Star,
}

impl Topology {
    /// The routing strategy this topology defaults to.
    pub fn default_strategy(&self) -> RoutingStrategy {
        match self {
            Topology::Hierarchical => RoutingStrategy::ShortestPath,
            Topology::Mesh => RoutingStrategy::LoadBalanced,
            Topology::Ring => RoutingStrategy::ShortestPath,
            Topology::Star => RoutingStrategy::Direct,
        }
    }

    /// The hop ceiling this topology defaults to.
    pub fn default_max_hops(&self) -> usize {
        match self {
            Topology::Hierarchical => 5,
            Topology::Mesh => 3,
            Topology::Ring => 10,
            Topology::Star => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Topology Graph
// ---------------------------------------------------------------------------

/// Weight inputs for path tie-breaking: `(load, declared latency ms)`.
pub type PeerWeight = (f64, u64);

/// The router's live adjacency view.
#[derive(Debug, Default)]
pub struct TopologyGraph {
    adjacency: RwLock<HashMap<String, HashSet<String>>>,
}

impl TopologyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer with no edges. Idempotent.
    pub fn add_peer(&self, peer: &str) {
        self.adjacency.write().entry(peer.to_string()).or_default();
    }

    /// Removes a peer and every edge touching it.
    pub fn remove_peer(&self, peer: &str) {
        let mut adj = self.adjacency.write();
        adj.remove(peer);
        for neighbors in adj.values_mut() {
            neighbors.remove(peer);
        }
    }

    /// Records an undirected transport adjacency between `a` and `b`.
    pub fn connect(&self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let mut adj = self.adjacency.write();
        adj.entry(a.to_string()).or_default().insert(b.to_string());
        adj.entry(b.to_string()).or_default().insert(a.to_string());
    }

    /// Removes the edge between `a` and `b`, keeping both peers.
    pub fn disconnect(&self, a: &str, b: &str) {
        let mut adj = self.adjacency.write();
        if let Some(n) = adj.get_mut(a) {
            n.remove(b);
        }
        if let Some(n) = adj.get_mut(b) {
            n.remove(a);
        }
    }

    /// Whether the graph knows `peer`.
    pub fn contains(&self, peer: &str) -> bool {
        self.adjacency.read().contains_key(peer)
    }

    /// Whether an edge exists between `a` and `b`.
    pub fn are_adjacent(&self, a: &str, b: &str) -> bool {
        self.adjacency
            .read()
            .get(a)
            .map(|n| n.contains(b))
            .unwrap_or(false)
    }

    /// Direct neighbors of `peer`, sorted for determinism.
    pub fn neighbors(&self, peer: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .adjacency
            .read()
            .get(peer)
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Number of known peers.
    pub fn peer_count(&self) -> usize {
        self.adjacency.read().len()
    }

    /// Minimum hop count from `from` to `to`, or `None` when unreachable.
    pub fn hop_distance(&self, from: &str, to: &str) -> Option<usize> {
        self.shortest_path(from, to, usize::MAX, |_| (0.0, 0))
            .map(|path| path.len() - 1)
    }

    /// Lowest-cost path from `from` to `to` under `max_hops`.
    ///
    /// Cost order is lexicographic: fewest hops first, then lowest
    /// aggregate load, then lowest aggregate declared latency, then peer id
    /// for a stable result. `peer_weight` supplies `(load, latency)` per
    /// peer; the origin's weight never counts.
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_hops: usize,
        peer_weight: impl Fn(&str) -> PeerWeight,
    ) -> Option<Vec<String>> {
        let adj = self.adjacency.read();
        if !adj.contains_key(from) || !adj.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        // Load is scaled to integral milli-units so the cost tuple is Ord.
        let scaled = |peer: &str| -> (u64, u64) {
            let (load, latency) = peer_weight(peer);
            ((load.clamp(0.0, 1.0) * 1000.0) as u64, latency)
        };

        #[derive(PartialEq, Eq)]
        struct Visit {
            cost: (usize, u64, u64),
            peer: String,
            path: Vec<String>,
        }
        impl Ord for Visit {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                // Reversed: BinaryHeap is a max-heap, we want cheapest first.
                other
                    .cost
                    .cmp(&self.cost)
                    .then_with(|| other.peer.cmp(&self.peer))
            }
        }
        impl PartialOrd for Visit {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut best: HashMap<String, (usize, u64, u64)> = HashMap::new();
        let mut heap = BinaryHeap::new();
        heap.push(Visit {
            cost: (0, 0, 0),
            peer: from.to_string(),
            path: vec![from.to_string()],
        });

        while let Some(Visit { cost, peer, path }) = heap.pop() {
            if peer == to {
                return Some(path);
            }
            if let Some(known) = best.get(&peer) {
                if *known < cost {
                    continue;
                }
            }
            if cost.0 >= max_hops {
                continue;
            }

            let Some(neighbors) = adj.get(&peer) else {
                continue;
            };
            for next in neighbors {
                if path.contains(next) {
                    continue;
                }
                let (load, latency) = scaled(next);
                let next_cost = (cost.0 + 1, cost.1 + load, cost.2 + latency);
                let improved = best
                    .get(next)
                    .map(|known| next_cost < *known)
                    .unwrap_or(true);
                if improved {
                    best.insert(next.clone(), next_cost);
                    let mut next_path = path.clone();
                    next_path.push(next.clone());
                    heap.push(Visit {
                        cost: next_cost,
                        peer: next.clone(),
                        path: next_path,
                    });
                }
            }
        }

        None
    }
}
