//! Device-local entity store seam.
//!
//! The engine never owns the application's database; it reads and writes
//! entities through [`LocalStore`]. [`MemoryLocalStore`] is a complete
//! implementation for tests and for embedding without persistence.

use crate::error::SyncResult;
use lexisync_protocol::{Entity, EntityTable, LocalId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Auxiliary per-user blobs delivered by a full pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryState {
    /// Gamification state.
    pub gamification: Value,
    /// Achievements.
    pub achievements: Value,
    /// Settings.
    pub settings: Value,
}

/// Read/write access to the device's entity store.
pub trait LocalStore: Send + Sync {
    /// Inserts or replaces an entity, keyed by table and local id.
    fn upsert(&self, entity: Entity) -> SyncResult<()>;

    /// Removes an entity. Removing a missing entity is not an error.
    fn remove(&self, table: EntityTable, local_id: &LocalId) -> SyncResult<()>;

    /// Looks up one entity.
    fn get(&self, table: EntityTable, local_id: &LocalId) -> SyncResult<Option<Entity>>;

    /// Returns the local ids of every entity in a table.
    fn local_ids(&self, table: EntityTable) -> SyncResult<Vec<LocalId>>;

    /// Stores the auxiliary blobs from a full pull.
    fn put_auxiliary(&self, state: AuxiliaryState) -> SyncResult<()>;
}

/// An in-memory local store.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    tables: RwLock<HashMap<EntityTable, BTreeMap<LocalId, Entity>>>,
    auxiliary: RwLock<Option<AuxiliaryState>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every entity in a table, ordered by local id.
    pub fn all(&self, table: EntityTable) -> Vec<Entity> {
        self.tables
            .read()
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of entities in a table.
    pub fn count(&self, table: EntityTable) -> usize {
        self.tables.read().get(&table).map_or(0, BTreeMap::len)
    }

    /// Returns the auxiliary blobs, if a full pull stored them.
    pub fn auxiliary(&self) -> Option<AuxiliaryState> {
        self.auxiliary.read().clone()
    }
}

impl LocalStore for MemoryLocalStore {
    fn upsert(&self, entity: Entity) -> SyncResult<()> {
        self.tables
            .write()
            .entry(entity.table())
            .or_default()
            .insert(entity.local_id().clone(), entity);
        Ok(())
    }

    fn remove(&self, table: EntityTable, local_id: &LocalId) -> SyncResult<()> {
        if let Some(rows) = self.tables.write().get_mut(&table) {
            rows.remove(local_id);
        }
        Ok(())
    }

    fn get(&self, table: EntityTable, local_id: &LocalId) -> SyncResult<Option<Entity>> {
        Ok(self
            .tables
            .read()
            .get(&table)
            .and_then(|rows| rows.get(local_id))
            .cloned())
    }

    fn local_ids(&self, table: EntityTable) -> SyncResult<Vec<LocalId>> {
        Ok(self
            .tables
            .read()
            .get(&table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn put_auxiliary(&self, state: AuxiliaryState) -> SyncResult<()> {
        *self.auxiliary.write() = Some(state);
        Ok(())
    }
}
