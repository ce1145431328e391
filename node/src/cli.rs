//! # CLI Interface
//!
//! Defines the command-line argument structure for `lattice-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// LATTICE mesh node.
///
/// A full participant in a LATTICE agent mesh: registers agent cards,
/// answers discovery queries, routes and relays messages, and serves the
/// JSON-RPC API for local callers.
#[derive(Parser, Debug)]
#[command(
    name = "lattice-node",
    about = "LATTICE mesh node",
    version,
    propagate_version = true
)]
pub struct LatticeNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the mesh node.
    Run(RunArgs),
    /// Initialize a new node — creates the data directory and writes a
    /// default mesh configuration.
    Init(InitArgs),
    /// Query the status of a running node via its RPC endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the mesh configuration file (JSON).
    ///
    /// When omitted, the node looks for `mesh.json` in the data directory
    /// and falls back to built-in defaults.
    #[arg(long, short = 'c', env = "LATTICE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the node data directory where registry snapshots live.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "LATTICE_DATA_DIR", default_value = ".lattice")]
    pub data_dir: PathBuf,

    /// This node's agent id on the mesh. Overrides the config file.
    #[arg(long, env = "LATTICE_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Port for the JSON-RPC API and WebSocket peer endpoint.
    #[arg(long, env = "LATTICE_RPC_PORT", default_value_t = 9850)]
    pub rpc_port: u16,

    /// Port for the framed TCP/gRPC peer listener.
    #[arg(long, env = "LATTICE_MESH_PORT", default_value_t = 9851)]
    pub mesh_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LATTICE_METRICS_PORT", default_value_t = 9852)]
    pub metrics_port: u16,

    /// Mesh topology: hierarchical, mesh, ring, or star.
    #[arg(long, default_value = "mesh")]
    pub topology: String,

    /// Protocol to activate: a2a or hybrid.
    #[arg(long, default_value = "a2a")]
    pub protocol: String,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "LATTICE_DATA_DIR", default_value = ".lattice")]
    pub data_dir: PathBuf,

    /// Agent id to write into the generated configuration.
    #[arg(long, default_value = "lattice-node")]
    pub agent_id: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// RPC endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9850")]
    pub rpc_url: String,
}
