// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # LATTICE Mesh Node
//!
//! Entry point for the `lattice-node` binary. Parses CLI arguments,
//! initializes logging and metrics, activates the protocol stack, and
//! serves the HTTP/WS API plus the framed TCP peer listener.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the mesh node
//! - `init`    — initialize the data directory and write a default config
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

use lattice_protocol::activator::{ActivationRequest, ProtocolActivator};
use lattice_protocol::card::{AgentCard, Capability, Endpoint};
use lattice_protocol::config::{MeshConfig, TransportEndpointConfig, PROTOCOL_FINGERPRINT};
use lattice_protocol::message::now_millis;
use lattice_protocol::metrics::MetricKey;
use lattice_protocol::registry::snapshot::SnapshotStore;
use lattice_protocol::router::topology::Topology;
use lattice_protocol::transport::TransportKind;

use cli::{Commands, LatticeNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// How often the node refreshes its own heartbeat and the export gauges.
const HOUSEKEEPING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LatticeNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — Full node startup sequence
// ---------------------------------------------------------------------------

/// Starts the full mesh node.
///
/// Startup sequence:
/// 1.  Initialize logging
/// 2.  Load or synthesize the mesh configuration
/// 3.  Construct the activator and activate the requested protocol
/// 4.  Restore the registry snapshot, if one exists
/// 5.  Register the local agent card
/// 6.  Start the RPC/WS API server
/// 7.  Start the framed TCP peer listener
/// 8.  Start the Prometheus metrics server
/// 9.  Start housekeeping (heartbeat + gauge sync)
/// 10. Await shutdown signal, snapshot, and tear down
async fn run_node(args: cli::RunArgs) -> Result<()> {
    // --- 1. Logging ---
    let log_filter = format!(
        "lattice_node={level},lattice_protocol={level},tower_http=info",
        level = args.log_level
    );
    logging::init_logging(&log_filter, LogFormat::from_str_lossy(&args.log_format));

    // --- 2. Configuration ---
    let topology = parse_topology(&args.topology)?;
    let mut config = load_config(args.config.as_deref(), &args.data_dir)?;
    if let Some(agent_id) = &args.agent_id {
        config.agent_id = agent_id.clone();
    }
    if config.agent_id.is_empty() {
        config.agent_id = format!("lattice-{}", &uuid::Uuid::new_v4().to_string()[..8]);
    }
    config.topology = topology;
    if config.transports.is_empty() {
        config.transports = vec![
            TransportEndpointConfig {
                kind: TransportKind::WebSocket,
                host: "0.0.0.0".into(),
                port: args.rpc_port,
                path: Some("/ws".into()),
                tls: None,
                auth: None,
                keepalive_secs: None,
                compression: false,
            },
            TransportEndpointConfig {
                kind: TransportKind::Tcp,
                host: "0.0.0.0".into(),
                port: args.mesh_port,
                path: None,
                tls: None,
                auth: None,
                keepalive_secs: None,
                compression: false,
            },
        ];
    }

    tracing::info!(
        agent_id = %config.agent_id,
        rpc_port = args.rpc_port,
        mesh_port = args.mesh_port,
        metrics_port = args.metrics_port,
        topology = ?config.topology,
        protocol = %args.protocol,
        "starting lattice-node"
    );

    // --- 3. Activate ---
    let activator = Arc::new(
        ProtocolActivator::new(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid mesh configuration: {}", e))?,
    );
    let result = activator
        .activate(ActivationRequest {
            protocol_name: args.protocol.clone(),
            topology,
        })
        .await;
    if !result.success {
        anyhow::bail!(
            "activation of {} failed: {}",
            args.protocol,
            result.error.unwrap_or_else(|| "unknown".into())
        );
    }
    if !result.fallbacks_used.is_empty() {
        tracing::warn!(fallbacks = ?result.fallbacks_used, "running in degraded mode");
    }
    let stack = activator
        .stack()
        .ok_or_else(|| anyhow::anyhow!("activation produced no stack"))?;

    // --- 4. Snapshot restore ---
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data dir {}", args.data_dir.display()))?;
    let snapshot = SnapshotStore::open(args.data_dir.join("registry"))
        .map_err(|e| anyhow::anyhow!("failed to open snapshot store: {}", e))?;
    match snapshot.restore_into(&stack.registry) {
        Ok(restored) if restored > 0 => {
            tracing::info!(entries = restored, "registry snapshot restored")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "snapshot restore failed; starting empty"),
    }

    // --- 5. Local card ---
    let local_card = build_local_card(&config, args.rpc_port, args.mesh_port);
    match stack.registry.register(local_card.clone(), None) {
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "local card registration failed"),
    }

    // --- 6. RPC/WS API server ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let state = api::AppState {
        stack: stack.clone(),
        activator: Arc::clone(&activator),
        local_card,
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: now_millis(),
        metrics: Arc::clone(&node_metrics),
    };

    // Inbound pump: peer requests arriving over links this node dialed.
    let inbound_pump = stack.transport.take_inbound().map(|mut inbound| {
        let pump_state = state.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                if let Some(response) = api::handle_a2a(&pump_state, envelope.message).await {
                    let _ = pump_state
                        .stack
                        .transport
                        .send_notification_on(&envelope.connection_id, response)
                        .await;
                }
            }
        })
    });

    let rpc_addr = format!("0.0.0.0:{}", args.rpc_port);
    let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", rpc_addr))?;
    let rpc_server = tokio::spawn(axum::serve(rpc_listener, api::create_router(state.clone())).into_future());

    // --- 7. Framed TCP peer listener ---
    let mesh_addr = format!("0.0.0.0:{}", args.mesh_port);
    let mesh_listener = tokio::net::TcpListener::bind(&mesh_addr)
        .await
        .with_context(|| format!("failed to bind mesh listener on {}", mesh_addr))?;
    let mesh_server = tokio::spawn(api::serve_mesh_listener(state.clone(), mesh_listener));

    // --- 8. Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    let metrics_server = tokio::spawn(axum::serve(metrics_listener, metrics_router).into_future());

    // --- 9. Housekeeping ---
    let housekeeping = {
        let stack = stack.clone();
        let node_metrics = Arc::clone(&node_metrics);
        let agent_id = config.agent_id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
            loop {
                ticker.tick().await;
                stack.registry.heartbeat(&agent_id);

                let report = stack.router.metrics_report();
                node_metrics
                    .registered_agents
                    .set(stack.registry.live_count() as i64);
                node_metrics
                    .open_connections
                    .set(stack.transport.pool().len() as i64);
                sync_counter(&node_metrics.messages_routed_total, report.total_routed);
                sync_counter(
                    &node_metrics.messages_delivered_total,
                    stack
                        .metrics
                        .counter(&MetricKey::component("router", "delivered")),
                );
                sync_counter(
                    &node_metrics.messages_failed_total,
                    stack
                        .metrics
                        .counter(&MetricKey::component("router", "failed")),
                );
            }
        })
    };

    // Discovery driver: periodically re-announce the local card so late
    // joiners learn about this node without being asked.
    let announcer = if config.discovery_enabled {
        let stack = stack.clone();
        let card = state.local_card.clone();
        let interval = std::time::Duration::from_secs(config.discovery_interval_secs.max(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = stack.announce(card.clone()).await {
                    tracing::debug!(error = %e, "announce failed");
                }
            }
        }))
    } else {
        None
    };

    print_banner(&config.agent_id, args.rpc_port, args.mesh_port, args.metrics_port);

    // --- 10. Await shutdown ---
    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");

    match snapshot.save(&stack.registry) {
        Ok(saved) => tracing::info!(entries = saved, "registry snapshot written"),
        Err(e) => tracing::warn!(error = %e, "snapshot save failed"),
    }

    housekeeping.abort();
    if let Some(announcer) = announcer {
        announcer.abort();
    }
    if let Some(pump) = inbound_pump {
        pump.abort();
    }
    rpc_server.abort();
    mesh_server.abort();
    metrics_server.abort();
    activator.shutdown().await;
    tracing::info!("node stopped");
    Ok(())
}

/// Prometheus counters are monotonic; bump by the observed delta only.
fn sync_counter(counter: &prometheus::IntCounter, observed_total: u64) {
    let current = counter.get();
    if observed_total > current {
        counter.inc_by(observed_total - current);
    }
}

fn parse_topology(value: &str) -> Result<Topology> {
    match value.to_lowercase().as_str() {
        "hierarchical" => Ok(Topology::Hierarchical),
        "mesh" => Ok(Topology::Mesh),
        "ring" => Ok(Topology::Ring),
        "star" => Ok(Topology::Star),
        other => anyhow::bail!(
            "unknown topology {:?} (expected hierarchical, mesh, ring, or star)",
            other
        ),
    }
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<MeshConfig> {
    let candidate: Option<PathBuf> = explicit
        .map(Path::to_path_buf)
        .or_else(|| Some(data_dir.join("mesh.json")).filter(|p| p.exists()));

    match candidate {
        Some(path) if path.exists() => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            let config: MeshConfig = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?;
            tracing::info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        Some(path) => anyhow::bail!("config file {} does not exist", path.display()),
        None => Ok(MeshConfig::default()),
    }
}

/// Builds the card this node advertises to peers.
fn build_local_card(config: &MeshConfig, rpc_port: u16, mesh_port: u16) -> AgentCard {
    AgentCard::new(
        config.agent_id.clone(),
        config.agent_id.clone(),
        semver::Version::parse(env!("CARGO_PKG_VERSION"))
            .unwrap_or_else(|_| semver::Version::new(0, 1, 0)),
    )
    .with_agent_type("node")
    .with_capability(Capability::new(
        "mesh-routing",
        semver::Version::new(1, 0, 0),
    ))
    .with_endpoint(Endpoint {
        protocol: TransportKind::WebSocket,
        address: "127.0.0.1".into(),
        port: Some(rpc_port),
        path: Some("/ws".into()),
        secure: false,
        max_connections: None,
    })
    .with_endpoint(Endpoint {
        protocol: TransportKind::Tcp,
        address: "127.0.0.1".into(),
        port: Some(mesh_port),
        path: None,
        secure: false,
        max_connections: None,
    })
}

fn print_banner(agent_id: &str, rpc_port: u16, mesh_port: u16, metrics_port: u16) {
    println!();
    println!("  LATTICE mesh node {}", env!("CARGO_PKG_VERSION"));
    println!("  agent id : {}", agent_id);
    println!("  rpc/ws   : http://127.0.0.1:{}", rpc_port);
    println!("  mesh     : tcp://127.0.0.1:{}", mesh_port);
    println!("  metrics  : http://127.0.0.1:{}/metrics", metrics_port);
    println!();
}

// ---------------------------------------------------------------------------
// init / status / version
// ---------------------------------------------------------------------------

fn init_node(args: cli::InitArgs) -> Result<()> {
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create {}", args.data_dir.display()))?;

    let config_path = args.data_dir.join("mesh.json");
    if config_path.exists() {
        anyhow::bail!("{} already exists; refusing to overwrite", config_path.display());
    }

    let config = MeshConfig {
        agent_id: args.agent_id,
        ..MeshConfig::default()
    };
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!("initialized {}", config_path.display());
    Ok(())
}

async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    let status: serde_json::Value = response
        .json()
        .await
        .context("status response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn print_version() {
    println!(
        "lattice-node {} ({})",
        env!("CARGO_PKG_VERSION"),
        PROTOCOL_FINGERPRINT
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_parsing() {
        assert_eq!(parse_topology("mesh").unwrap(), Topology::Mesh);
        assert_eq!(parse_topology("STAR").unwrap(), Topology::Star);
        assert_eq!(parse_topology("ring").unwrap(), Topology::Ring);
        assert!(parse_topology("pentagram").is_err());
    }

    #[test]
    fn init_writes_a_config_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("node");

        init_node(cli::InitArgs {
            data_dir: data_dir.clone(),
            agent_id: "alpha".to_string(),
        })
        .unwrap();

        let config_path = data_dir.join("mesh.json");
        let raw = std::fs::read_to_string(&config_path).unwrap();
        let config: MeshConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(config.agent_id, "alpha");

        // A second init must not clobber the existing configuration.
        let again = init_node(cli::InitArgs {
            data_dir,
            agent_id: "beta".to_string(),
        });
        assert!(again.is_err());
    }

    #[test]
    fn config_loading_paths() {
        let dir = tempfile::tempdir().unwrap();

        // Nothing on disk: built-in defaults.
        let config = load_config(None, dir.path()).unwrap();
        assert!(config.agent_id.is_empty());

        // An explicitly named file that does not exist is an error, not a
        // silent fallback.
        assert!(load_config(Some(&dir.path().join("nope.json")), dir.path()).is_err());

        // mesh.json in the data directory is picked up implicitly.
        let config = MeshConfig {
            agent_id: "beta".to_string(),
            ..MeshConfig::default()
        };
        std::fs::write(
            dir.path().join("mesh.json"),
            serde_json::to_string(&config).unwrap(),
        )
        .unwrap();
        let loaded = load_config(None, dir.path()).unwrap();
        assert_eq!(loaded.agent_id, "beta");
    }

    #[test]
    fn local_card_advertises_both_listeners() {
        let config = MeshConfig {
            agent_id: "gamma".to_string(),
            ..MeshConfig::default()
        };
        let card = build_local_card(&config, 9850, 9851);

        assert_eq!(card.id, "gamma");
        assert!(card.validate().is_ok());
        assert_eq!(card.endpoints.len(), 2);
        assert!(card
            .endpoints
            .iter()
            .any(|e| e.protocol == TransportKind::WebSocket && e.port == Some(9850)));
        assert!(card
            .endpoints
            .iter()
            .any(|e| e.protocol == TransportKind::Tcp && e.port == Some(9851)));
    }
}
