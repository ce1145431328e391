//! # Agent Registry
//!
//! Authoritative store of agent cards with TTL-bounded liveness. The
//! registry exclusively owns its entries and the three inverted indexes;
//! mutations are serialized under a single write lock so that card removal
//! is atomic with index removal, and reads take only a short read lock.
//!
//! Lifecycle: entries expire at `expiresAt`. Expiry is enforced both
//! lazily (a `get` of an expired entry unregisters it on the spot) and by
//! a background sweeper spawned with [`AgentRegistry::start_sweeper`].
//!
//! Consumers — the router above all — track membership through the
//! [`RegistryEvent`] broadcast channel rather than polling. Producers are
//! single-owner; listeners must not call back into the registry from the
//! event handler.

pub mod index;
pub mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::card::AgentCard;
use crate::config::{DEFAULT_AGENT_TTL, REGISTRY_CLEANUP_INTERVAL};
use crate::error::{A2aError, A2aResult};
use crate::message::now_millis;

use index::CardIndexes;

/// Capacity of the registry event channel. Slow subscribers lag and drop,
/// they never block registration.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Entry & Events
// ---------------------------------------------------------------------------

/// One registered agent with its lease bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// The advertised card.
    pub card: AgentCard,
    /// Unix ms at registration.
    pub registration_time: u64,
    /// Unix ms past which the entry is dead.
    pub expires_at: u64,
    /// Unix ms of the last heartbeat.
    pub last_heartbeat: u64,
}

impl RegistryEntry {
    /// Whether the lease has run out at `now`.
    pub fn expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Membership changes broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A new card was accepted.
    Registered {
        /// The registered peer.
        agent_id: String,
    },
    /// An existing card changed.
    Updated {
        /// The updated peer.
        agent_id: String,
    },
    /// A card was removed (explicitly or by expiry).
    Unregistered {
        /// The removed peer.
        agent_id: String,
    },
    /// A peer's reported load changed.
    MetricsUpdated {
        /// The peer whose load changed.
        agent_id: String,
        /// The new load in `[0, 1]`.
        load: f64,
    },
}

/// What `register` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    /// Always true on the success path; kept for wire compatibility.
    pub registered: bool,
    /// The registered peer id.
    pub agent_id: String,
    /// Unix ms lease expiry.
    pub expires_at: u64,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The agent-card registry.
///
/// Explicitly constructed per process — tests run several isolated
/// instances side by side. Call [`AgentRegistry::shutdown`] to stop the
/// sweeper when tearing an instance down.
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    indexes: CardIndexes,
    events: broadcast::Sender<RegistryEvent>,
    default_ttl: Duration,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("live", &self.entries.read().len())
            .finish()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Creates a registry with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_AGENT_TTL)
    }

    /// Creates a registry whose leases default to `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            indexes: CardIndexes::new(),
            events,
            default_ttl: ttl,
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// Subscribes to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Registers a card under a lease of `ttl` (default TTL when `None`).
    ///
    /// Fails with [`A2aError::AlreadyRegistered`] on a duplicate id and
    /// [`A2aError::Validation`] on a malformed card.
    pub fn register(
        &self,
        card: AgentCard,
        ttl: Option<Duration>,
    ) -> A2aResult<RegistrationReceipt> {
        card.validate()?;

        let now = now_millis();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = now + ttl.as_millis() as u64;
        let agent_id = card.id.clone();

        {
            let mut entries = self.entries.write();
            if let Some(existing) = entries.get(&agent_id) {
                if !existing.expired_at(now) {
                    return Err(A2aError::AlreadyRegistered { agent_id });
                }
                // Expired but unswept: evict in place, then accept.
                self.indexes.remove(&existing.card);
                entries.remove(&agent_id);
            }

            self.indexes.insert(&card);
            entries.insert(
                agent_id.clone(),
                RegistryEntry {
                    card,
                    registration_time: now,
                    expires_at,
                    last_heartbeat: now,
                },
            );
        }

        info!(agent = %agent_id, expires_at, "agent registered");
        let _ = self.events.send(RegistryEvent::Registered {
            agent_id: agent_id.clone(),
        });

        Ok(RegistrationReceipt {
            registered: true,
            agent_id,
            expires_at,
        })
    }

    /// Removes a card and all its index relations. Returns false when the
    /// id was not present.
    pub fn unregister(&self, agent_id: &str) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            match entries.remove(agent_id) {
                Some(entry) => {
                    self.indexes.remove(&entry.card);
                    true
                }
                None => false,
            }
        };

        if removed {
            info!(agent = %agent_id, "agent unregistered");
            let _ = self.events.send(RegistryEvent::Unregistered {
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }

    /// Replaces an existing card, re-indexing only the diff, and refreshes
    /// the heartbeat. Returns false when the agent is not registered.
    pub fn update(&self, mut card: AgentCard) -> A2aResult<bool> {
        card.validate()?;
        let now = now_millis();
        card.metadata.last_seen = now;

        let updated = {
            let mut entries = self.entries.write();
            match entries.get_mut(&card.id) {
                Some(entry) if !entry.expired_at(now) => {
                    self.indexes.apply_diff(&entry.card, &card);
                    entry.card = card.clone();
                    entry.last_heartbeat = now;
                    true
                }
                _ => false,
            }
        };

        if updated {
            debug!(agent = %card.id, "agent card updated");
            let _ = self.events.send(RegistryEvent::Updated { agent_id: card.id });
        }
        Ok(updated)
    }

    /// Refreshes `lastHeartbeat` and `metadata.lastSeen`. Does not extend
    /// the lease.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        let now = now_millis();
        let mut entries = self.entries.write();
        match entries.get_mut(agent_id) {
            Some(entry) if !entry.expired_at(now) => {
                entry.last_heartbeat = now;
                entry.card.metadata.last_seen = now;
                true
            }
            _ => false,
        }
    }

    /// Updates a peer's reported load and notifies subscribers. Used by
    /// peers pushing metrics and by the node's local load reporter.
    pub fn set_load(&self, agent_id: &str, load: f64) -> bool {
        let updated = {
            let mut entries = self.entries.write();
            match entries.get_mut(agent_id) {
                Some(entry) => {
                    entry.card.metadata.load = load.clamp(0.0, 1.0);
                    true
                }
                None => false,
            }
        };
        if updated {
            let _ = self.events.send(RegistryEvent::MetricsUpdated {
                agent_id: agent_id.to_string(),
                load,
            });
        }
        updated
    }

    /// Fetches a live card. An expired entry is unregistered on read and
    /// `None` is returned.
    pub fn get(&self, agent_id: &str) -> Option<AgentCard> {
        let now = now_millis();
        let expired = {
            let entries = self.entries.read();
            match entries.get(agent_id) {
                Some(entry) if !entry.expired_at(now) => return Some(entry.card.clone()),
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            warn!(agent = %agent_id, "entry expired on read");
            self.unregister(agent_id);
        }
        None
    }

    /// All live cards, keyed by id.
    pub fn list(&self) -> HashMap<String, AgentCard> {
        let now = now_millis();
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| !e.expired_at(now))
            .map(|(id, e)| (id.clone(), e.card.clone()))
            .collect()
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        let now = now_millis();
        self.entries
            .read()
            .values()
            .filter(|e| !e.expired_at(now))
            .count()
    }

    /// Read access to the indexes for the discovery service.
    pub fn indexes(&self) -> &CardIndexes {
        &self.indexes
    }

    /// Copies out every entry, live or not, for snapshotting.
    pub fn export_entries(&self) -> Vec<RegistryEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Replaces registry contents with `entries`, rebuilding indexes from
    /// scratch. Used when loading a snapshot; index divergence is a
    /// violated invariant, so the rebuild is unconditional.
    pub fn import_entries(&self, imported: Vec<RegistryEntry>) {
        let mut entries = self.entries.write();
        entries.clear();
        self.indexes.clear();
        for entry in imported {
            self.indexes.insert(&entry.card);
            entries.insert(entry.card.id.clone(), entry);
        }
    }

    /// Removes every entry whose lease ran out. Returns the expired ids.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = now_millis();
        let expired: Vec<String> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, e)| e.expired_at(now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        for agent_id in &expired {
            self.unregister(agent_id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "sweeper expired entries");
        }
        expired
    }

    /// Spawns the background sweeper at `interval` (default cleanup
    /// interval when `None`). Idempotent: a second call replaces the task.
    pub fn start_sweeper(self: Arc<Self>, interval: Option<Duration>) {
        let interval = interval.unwrap_or(REGISTRY_CLEANUP_INTERVAL);
        let registry = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep_expired();
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the sweeper and clears all state.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.entries.write().clear();
        self.indexes.clear();
    }
}
