//! # Route Cache
//!
//! Bounded LRU over recently computed routes, keyed by (target set,
//! strategy). Registry events invalidate every cached route that touches
//! the affected peer, so a stale path never outlives the membership change
//! that broke it.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::strategy::RoutingStrategy;
use super::Route;

/// Cache key: the rendered target set plus the strategy that computed the
/// route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Sorted, comma-joined target ids.
    pub targets: String,
    /// Strategy the route was computed under.
    pub strategy: RoutingStrategy,
}

impl CacheKey {
    /// Builds a key from a target id list (order-insensitive).
    pub fn new(targets: &[String], strategy: RoutingStrategy) -> Self {
        let mut sorted: Vec<&str> = targets.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        Self {
            targets: sorted.join(","),
            strategy,
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    routes: HashMap<CacheKey, Route>,
    order: VecDeque<CacheKey>,
}

/// The bounded LRU itself.
#[derive(Debug)]
pub struct RouteCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl RouteCache {
    /// Creates a cache holding at most `capacity` routes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Looks up a route, refreshing its recency on hit.
    pub fn get(&self, key: &CacheKey) -> Option<Route> {
        let mut inner = self.inner.lock();
        let route = inner.routes.get(key).cloned()?;
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.clone());
        Some(route)
    }

    /// Inserts a route, evicting the least recently used beyond capacity.
    pub fn put(&self, key: CacheKey, route: Route) {
        let mut inner = self.inner.lock();
        if inner.routes.insert(key.clone(), route).is_none() {
            inner.order.push_back(key);
        } else {
            inner.order.retain(|k| *k != key);
            inner.order.push_back(key);
        }

        while inner.routes.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.routes.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Drops every cached route whose path contains `agent_id`.
    pub fn invalidate_agent(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .routes
            .iter()
            .filter(|(_, route)| route.path.iter().any(|hop| hop == agent_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            inner.routes.remove(&key);
            inner.order.retain(|k| *k != key);
        }
    }

    /// Drops everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.routes.clear();
        inner.order.clear();
    }

    /// Number of cached routes.
    pub fn len(&self) -> usize {
        self.inner.lock().routes.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &[&str]) -> Route {
        Route {
            path: path.iter().map(|s| s.to_string()).collect(),
            hops: path.len() - 1,
            strategy: RoutingStrategy::Direct,
            max_hops: 3,
            degraded: false,
        }
    }

    #[test]
    fn put_get_round_trip() {
        let cache = RouteCache::new(4);
        let key = CacheKey::new(&["b".into()], RoutingStrategy::Direct);
        cache.put(key.clone(), route(&["a", "b"]));

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.path, vec!["a", "b"]);
        assert!(cache
            .get(&CacheKey::new(&["c".into()], RoutingStrategy::Direct))
            .is_none());
    }

    #[test]
    fn key_is_order_insensitive() {
        let k1 = CacheKey::new(&["b".into(), "a".into()], RoutingStrategy::LoadBalanced);
        let k2 = CacheKey::new(&["a".into(), "b".into()], RoutingStrategy::LoadBalanced);
        assert_eq!(k1, k2);
    }

    #[test]
    fn lru_eviction_prefers_stale_entries() {
        let cache = RouteCache::new(2);
        let ka = CacheKey::new(&["a".into()], RoutingStrategy::Direct);
        let kb = CacheKey::new(&["b".into()], RoutingStrategy::Direct);
        let kc = CacheKey::new(&["c".into()], RoutingStrategy::Direct);

        cache.put(ka.clone(), route(&["x", "a"]));
        cache.put(kb.clone(), route(&["x", "b"]));

        // Touch `a` so `b` is the LRU victim.
        cache.get(&ka);
        cache.put(kc.clone(), route(&["x", "c"]));

        assert!(cache.get(&ka).is_some());
        assert!(cache.get(&kb).is_none());
        assert!(cache.get(&kc).is_some());
    }

    #[test]
    fn invalidation_removes_routes_touching_the_agent() {
        let cache = RouteCache::new(8);
        let via_m = CacheKey::new(&["d".into()], RoutingStrategy::ShortestPath);
        let direct = CacheKey::new(&["e".into()], RoutingStrategy::Direct);
        cache.put(via_m.clone(), route(&["a", "m", "d"]));
        cache.put(direct.clone(), route(&["a", "e"]));

        cache.invalidate_agent("m");

        assert!(cache.get(&via_m).is_none());
        assert!(cache.get(&direct).is_some());
    }
}
