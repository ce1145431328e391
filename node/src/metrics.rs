//! # Prometheus Metrics
//!
//! Exposes operational metrics for the mesh node. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port. The
//! protocol library keeps its own in-core counters for routing decisions;
//! this registry is the node's export surface on top of them.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! they do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total messages routed by this node.
    pub messages_routed_total: IntCounter,
    /// Total messages delivered successfully.
    pub messages_delivered_total: IntCounter,
    /// Total delivery failures.
    pub messages_failed_total: IntCounter,
    /// Agents currently live in the registry.
    pub registered_agents: IntGauge,
    /// Open transport connections.
    pub open_connections: IntGauge,
    /// Histogram of route computation time in seconds.
    pub routing_time_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("lattice".into()), None)
            .expect("failed to create prometheus registry");

        let messages_routed_total = IntCounter::new(
            "messages_routed_total",
            "Total messages routed by this node",
        )
        .expect("metric creation");
        registry
            .register(Box::new(messages_routed_total.clone()))
            .expect("metric registration");

        let messages_delivered_total = IntCounter::new(
            "messages_delivered_total",
            "Total messages delivered successfully",
        )
        .expect("metric creation");
        registry
            .register(Box::new(messages_delivered_total.clone()))
            .expect("metric registration");

        let messages_failed_total =
            IntCounter::new("messages_failed_total", "Total delivery failures")
                .expect("metric creation");
        registry
            .register(Box::new(messages_failed_total.clone()))
            .expect("metric registration");

        let registered_agents = IntGauge::new(
            "registered_agents",
            "Agents currently live in the registry",
        )
        .expect("metric creation");
        registry
            .register(Box::new(registered_agents.clone()))
            .expect("metric registration");

        let open_connections = IntGauge::new("open_connections", "Open transport connections")
            .expect("metric creation");
        registry
            .register(Box::new(open_connections.clone()))
            .expect("metric registration");

        let routing_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "routing_time_seconds",
                "Route computation time in seconds",
            )
            .buckets(vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(routing_time_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            messages_routed_total,
            messages_delivered_total,
            messages_failed_total,
            registered_agents,
            open_connections,
            routing_time_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers via state.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
