//! # Registry Snapshots
//!
//! Persists registry entries (card + registration timestamps + TTL) into a
//! local sled tree so a restarted node can repopulate its view without any
//! live peer present. Indexes are never persisted — they are rebuilt from
//! entries on load, which doubles as the recovery path for index
//! divergence.

use std::path::Path;

use tracing::info;

use crate::error::{A2aError, A2aResult};

use super::{AgentRegistry, RegistryEntry};

/// Tree name inside the sled database.
const SNAPSHOT_TREE: &str = "registry_snapshot";

/// sled-backed snapshot store.
pub struct SnapshotStore {
    tree: sled::Tree,
}

impl SnapshotStore {
    /// Opens (or creates) the snapshot database at `path`.
    pub fn open(path: impl AsRef<Path>) -> A2aResult<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| A2aError::Internal(format!("failed to open snapshot db: {}", e)))?;
        let tree = db
            .open_tree(SNAPSHOT_TREE)
            .map_err(|e| A2aError::Internal(format!("failed to open snapshot tree: {}", e)))?;
        Ok(Self { tree })
    }

    /// Writes every current entry of `registry`, replacing the previous
    /// snapshot wholesale. Returns the number of entries written.
    pub fn save(&self, registry: &AgentRegistry) -> A2aResult<usize> {
        self.tree
            .clear()
            .map_err(|e| A2aError::Internal(format!("failed to clear snapshot: {}", e)))?;

        let entries = registry.export_entries();
        for entry in &entries {
            let bytes =
                serde_json::to_vec(entry).map_err(|e| A2aError::Serialization(e.to_string()))?;
            self.tree
                .insert(entry.card.id.as_bytes(), bytes)
                .map_err(|e| A2aError::Internal(format!("snapshot write failed: {}", e)))?;
        }
        self.tree
            .flush()
            .map_err(|e| A2aError::Internal(format!("snapshot flush failed: {}", e)))?;

        info!(entries = entries.len(), "registry snapshot written");
        Ok(entries.len())
    }

    /// Reads all persisted entries.
    pub fn load(&self) -> A2aResult<Vec<RegistryEntry>> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) =
                item.map_err(|e| A2aError::Internal(format!("snapshot read failed: {}", e)))?;
            let entry: RegistryEntry = serde_json::from_slice(&bytes)
                .map_err(|e| A2aError::Serialization(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Loads the snapshot into `registry`, replacing its contents and
    /// rebuilding indexes. Returns the number of entries restored.
    pub fn restore_into(&self, registry: &AgentRegistry) -> A2aResult<usize> {
        let entries = self.load()?;
        let count = entries.len();
        registry.import_entries(entries);
        info!(entries = count, "registry snapshot restored");
        Ok(count)
    }
}
