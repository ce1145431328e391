// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # LATTICE Protocol — Core Library
//!
//! The agent-to-agent coordination substrate: everything a peer process
//! embeds to participate in a dynamic mesh of cooperating agents. Wire
//! codec, transports, the agent registry with capability-indexed discovery,
//! the strategy-driven message router, and the activator that composes the
//! lot — with fallbacks — into a running protocol stack.
//!
//! ## Architecture
//!
//! The modules mirror the actual layers of the substrate:
//!
//! - **message** — JSON-RPC 2.0 envelopes with A2A extensions, plus the
//!   length-prefixed binary framing for stream transports.
//! - **transport** — Connections, pooling, retries, and the WebSocket /
//!   HTTP / TCP / gRPC-framed connectors.
//! - **card** — Agent cards: capabilities (semver), services, endpoints.
//! - **registry** — TTL-bounded card storage with inverted indexes and
//!   snapshot persistence.
//! - **discovery** — Filter-based queries over the registry.
//! - **router** — Strategy-driven peer and path selection.
//! - **activator** — Composes the above, negotiates topology, loads
//!   fallbacks, tears everything down again.
//! - **bridge** — Adapter fronting an external tool-RPC system as a peer.
//! - **security** — Ed25519 message-signing hooks.
//! - **metrics** — Per-peer/per-route counters feeding routing decisions.
//! - **config** — Protocol constants and the mesh configuration surface.
//!
//! ## Design stance
//!
//! 1. No global singletons: every component is an explicit instance with a
//!    teardown path, so tests run many isolated meshes in one process.
//! 2. Async is confined to the transport and the background sweepers;
//!    lookups, filters, and route selection are synchronous on
//!    materialized data.
//! 3. If it touches the wire, it has tests.

pub mod activator;
pub mod bridge;
pub mod card;
pub mod config;
pub mod discovery;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod security;
pub mod transport;

pub use activator::{ActivationRequest, ActivationResult, MeshStack, ProtocolActivator};
pub use card::AgentCard;
pub use error::{A2aError, A2aErrorKind, A2aResult};
pub use message::{Message, MessageType, Target};
