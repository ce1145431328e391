//! # Metrics Core
//!
//! In-process record/read primitives the rest of the core feeds: counters,
//! gauges, and bounded-sample histograms keyed by
//! `(component, peer?, label)`. The router reads these for load-aware
//! decisions; external observers subscribe to events and export elsewhere —
//! no exporter lives in the core.
//!
//! Histogram values sit in fixed-capacity rings (oldest overwritten first)
//! so percentile queries stay O(capacity) regardless of uptime. Reads are
//! snapshots: callers get copies, never references into live buffers.

use std::collections::HashMap;
use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::METRICS_RING_CAPACITY;

// ---------------------------------------------------------------------------
// Metric Key
// ---------------------------------------------------------------------------

/// Addressing for a metric series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// Emitting component ("transport", "router", "registry", ...).
    pub component: String,
    /// Peer the series is about, when per-peer.
    pub peer: Option<String>,
    /// Series label ("messages_sent", "routing_time_ms", ...).
    pub label: String,
}

impl MetricKey {
    /// A component-wide series.
    pub fn component(component: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            peer: None,
            label: label.into(),
        }
    }

    /// A per-peer series.
    pub fn peer(
        component: impl Into<String>,
        peer: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            peer: Some(peer.into()),
            label: label.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer {
            Some(peer) => write!(f, "{}:{}:{}", self.component, peer, self.label),
            None => write!(f, "{}:{}", self.component, self.label),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample Ring
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of histogram samples.
#[derive(Debug, Clone)]
struct SampleRing {
    samples: Vec<f64>,
    capacity: usize,
    next: usize,
    full: bool,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            full: false,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
            self.full = true;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    /// Sorted copy for percentile math.
    fn sorted(&self) -> Vec<f64> {
        let mut copy = self.samples.clone();
        copy.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        copy
    }
}

/// Percentile summary of one histogram series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentiles {
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Samples currently retained.
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Metrics Core
// ---------------------------------------------------------------------------

/// The shared metrics store. Cheap to clone-by-Arc at the embedding layer;
/// all interior state is sharded maps with per-entry locking.
#[derive(Debug)]
pub struct MetricsCore {
    counters: DashMap<MetricKey, u64>,
    gauges: DashMap<MetricKey, f64>,
    histograms: DashMap<MetricKey, SampleRing>,
    ring_capacity: usize,
}

impl Default for MetricsCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCore {
    /// Creates a store with the default ring capacity.
    pub fn new() -> Self {
        Self::with_ring_capacity(METRICS_RING_CAPACITY)
    }

    /// Creates a store retaining `capacity` samples per histogram series.
    pub fn with_ring_capacity(capacity: usize) -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            ring_capacity: capacity.max(1),
        }
    }

    /// Increments a counter by `by`.
    pub fn incr_counter(&self, key: MetricKey, by: u64) {
        *self.counters.entry(key).or_insert(0) += by;
    }

    /// Sets a gauge to `value`.
    pub fn set_gauge(&self, key: MetricKey, value: f64) {
        self.gauges.insert(key, value);
    }

    /// Records one histogram observation.
    pub fn observe(&self, key: MetricKey, value: f64) {
        self.histograms
            .entry(key)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value);
    }

    /// Current counter value; zero when never incremented.
    pub fn counter(&self, key: &MetricKey) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Current gauge value, if ever set.
    pub fn gauge(&self, key: &MetricKey) -> Option<f64> {
        self.gauges.get(key).map(|v| *v)
    }

    /// Percentile summary for a histogram series, if it has samples.
    pub fn percentiles(&self, key: &MetricKey) -> Option<Percentiles> {
        let ring = self.histograms.get(key)?;
        if ring.len() == 0 {
            return None;
        }
        let sorted = ring.sorted();
        Some(Percentiles {
            p50: percentile_of(&sorted, 0.50),
            p95: percentile_of(&sorted, 0.95),
            p99: percentile_of(&sorted, 0.99),
            count: sorted.len(),
        })
    }

    /// A copy of every counter, keyed by rendered name.
    pub fn counter_snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }

    /// A copy of every gauge, keyed by rendered name.
    pub fn gauge_snapshot(&self) -> HashMap<String, f64> {
        self.gauges
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }

    /// Drops every series. Used by activator teardown and tests.
    pub fn clear(&self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
    }
}

/// Nearest-rank percentile on a sorted slice.
fn percentile_of(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((quantile * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
