//! Identity cache: one live instance per stored entity id.
//!
//! Every path that turns an id into an in-memory entity goes through this
//! map, so two lookups for the same id always return the identical `Arc` and
//! mutations made through one handle are visible through every other. Only
//! this component may create, evict, or re-point the id-to-instance mapping.
//!
//! The cache is an explicit service owned by each `WorldStore`, never a
//! process-wide singleton, so tests construct isolated caches per case.
//! Entries leave only via `evict`/`evict_all`; there is no LRU pressure,
//! because evicting a live entry would break the one-instance invariant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};

use crate::backend::WorldBackend;
use crate::errors::StoreError;
use crate::kinds::KindRegistry;
use crate::types::EntityId;
use crate::world::Entity;

pub struct IdentityCache {
    live: Mutex<HashMap<EntityId, Arc<Entity>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Return the resident instance for `id`, loading and registering it on
    /// first access. The load resolves `kind_path` through the registry,
    /// degrading to the base kind when the path no longer exists.
    pub(crate) fn get_or_load(
        &self,
        backend: &WorldBackend,
        kinds: &KindRegistry,
        id: EntityId,
    ) -> Result<Arc<Entity>, StoreError> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entity) = live.get(&id) {
            debug!("identity cache hit: #{}", id);
            return Ok(entity.clone());
        }
        debug!("identity cache miss: #{}", id);
        let record = backend.get_entity(id)?;
        let kind = kinds.resolve_or_base(&record.kind_path);
        let entity = Arc::new(Entity::loaded(record, kind));
        live.insert(id, entity.clone());
        Ok(entity)
    }

    /// Register a freshly created instance. Creation must insert before the
    /// handle escapes, so a concurrent lookup can never load a second
    /// representative.
    pub(crate) fn insert(&self, entity: Arc<Entity>) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.insert(entity.id(), entity);
    }

    /// Drop one instance. Returns whether it was resident.
    pub fn evict(&self, id: EntityId) -> bool {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.remove(&id).is_some()
    }

    /// Drop every cached instance. Meant for a full restart boundary; must
    /// not be called while entities are in active use.
    pub fn evict_all(&self) -> usize {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let count = live.len();
        live.clear();
        info!("identity cache cleared ({} instances)", count);
        count
    }

    /// Whether `id` currently has a resident instance.
    pub fn resident(&self, id: EntityId) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}
