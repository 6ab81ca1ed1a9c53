//! World store facade: entity lifecycle, handles, and wiring.
//!
//! `WorldStore` owns the storage backend, the identity cache, the kind
//! registry, and the injected lock evaluator. `EntityHandle` is the surface
//! collaborators hold: a cheap clone of the shared live instance plus the
//! store wiring needed to reach attributes and tags.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::attributes::{self, AttrCache};
use crate::backend::WorldBackend;
use crate::cache::IdentityCache;
use crate::containers::AttrValue;
use crate::errors::StoreError;
use crate::kinds::{KindRegistry, KindSpec};
use crate::locks::{basic_evaluator, AccessKind, LockEvaluator};
use crate::tags;
use crate::types::{
    EntityFields, EntityId, EntityPatch, EntityRecord, ALIAS_MARKER, PERMISSION_MARKER, TAG_MARKER,
};
use crate::value::{EntityRef, Storable, Value};

/// Shared wiring behind every store and handle clone.
pub(crate) struct WorldInner {
    pub(crate) backend: WorldBackend,
    pub(crate) cache: IdentityCache,
    pub(crate) kinds: KindRegistry,
    pub(crate) lock_eval: LockEvaluator,
}

/// The one live in-memory representative of a stored entity.
///
/// Constructed only by the identity cache (on load) or by `create_entity`
/// (which registers it before the handle escapes); nothing else may
/// instantiate a second representative for the same id.
pub struct Entity {
    id: EntityId,
    created_at: DateTime<Utc>,
    kind: Arc<KindSpec>,
    record: RwLock<EntityRecord>,
    attrs: Mutex<AttrCache>,
    live: AtomicBool,
}

impl Entity {
    pub(crate) fn loaded(record: EntityRecord, kind: Arc<KindSpec>) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            kind,
            attrs: Mutex::new(AttrCache::unloaded()),
            live: AtomicBool::new(true),
            record: RwLock::new(record),
        }
    }

    /// Freshly created entities start with a loaded-and-empty attribute
    /// cache: no rows can exist yet, so the first access skips the scan.
    pub(crate) fn fresh(record: EntityRecord, kind: Arc<KindSpec>) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            kind,
            attrs: Mutex::new(AttrCache::empty_loaded()),
            live: AtomicBool::new(true),
            record: RwLock::new(record),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn kind(&self) -> &KindSpec {
        &self.kind
    }

    pub(crate) fn attrs(&self) -> MutexGuard<'_, AttrCache> {
        self.attrs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record(&self) -> RwLockReadGuard<'_, EntityRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_mut(&self) -> RwLockWriteGuard<'_, EntityRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.live.store(false, Ordering::Release);
    }

    pub(crate) fn ensure_live(&self) -> Result<(), StoreError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!(
                "entity #{} was deleted",
                self.id
            )))
        }
    }
}

/// Helper builder so tests can easily create throwaway stores with custom
/// paths and lock evaluators.
pub struct WorldStoreBuilder {
    path: PathBuf,
    lock_eval: Option<LockEvaluator>,
}

impl WorldStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_eval: None,
        }
    }

    /// Inject the engine's lock predicate. Defaults to the built-in clause
    /// evaluator when not supplied.
    pub fn lock_evaluator<F>(mut self, eval: F) -> Self
    where
        F: Fn(&str, Option<&EntityHandle>, AccessKind) -> bool + Send + Sync + 'static,
    {
        self.lock_eval = Some(Arc::new(eval));
        self
    }

    pub fn open(self) -> Result<WorldStore, StoreError> {
        let backend = WorldBackend::open(&self.path)?;
        Ok(WorldStore {
            inner: Arc::new(WorldInner {
                backend,
                cache: IdentityCache::new(),
                kinds: KindRegistry::new(),
                lock_eval: self.lock_eval.unwrap_or_else(basic_evaluator),
            }),
        })
    }
}

/// Counts for operator inspection.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub entities: usize,
    pub attributes: usize,
    pub tags: usize,
    pub joins: usize,
    pub resident: usize,
}

/// Handle-producing facade over one opened world.
#[derive(Clone)]
pub struct WorldStore {
    inner: Arc<WorldInner>,
}

impl WorldStore {
    /// Open (or create) the store rooted at `path` with default wiring.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        WorldStoreBuilder::new(path).open()
    }

    pub fn builder(path: impl Into<PathBuf>) -> WorldStoreBuilder {
        WorldStoreBuilder::new(path)
    }

    /// Register a kind spec; subsequent creates and loads resolve against
    /// it.
    pub fn register_kind(&self, spec: KindSpec) -> Arc<KindSpec> {
        self.inner.kinds.register(spec)
    }

    /// Create and persist a new entity of `kind_path`, register its live
    /// instance, and materialize the kind's declared tags.
    pub fn create_entity(&self, kind_path: &str, key: &str) -> Result<EntityHandle, StoreError> {
        self.create_entity_with(kind_path, key, EntityFields::default())
    }

    pub fn create_entity_with(
        &self,
        kind_path: &str,
        key: &str,
        fields: EntityFields,
    ) -> Result<EntityHandle, StoreError> {
        if let Some(r) = &fields.location {
            self.inner.backend.validate_ref(&Value::Ref(r.clone()))?;
        }
        if let Some(r) = &fields.home {
            self.inner.backend.validate_ref(&Value::Ref(r.clone()))?;
        }
        let id = self.inner.backend.allocate_id()?;
        let record = EntityRecord::new(id, key, kind_path)
            .with_location(fields.location)
            .with_home(fields.home);
        let record = self.inner.backend.put_entity(record)?;
        let kind = self.inner.kinds.resolve_or_base(kind_path);
        let entity = Arc::new(Entity::fresh(record, kind.clone()));
        // Registered before the handle escapes: a concurrent lookup must
        // find this instance, never load a second one.
        self.inner.cache.insert(entity.clone());
        let handle = EntityHandle {
            inner: self.inner.clone(),
            entity,
        };
        for kind_tag in kind.kind_tags() {
            tags::add(
                &self.inner,
                &handle.entity,
                &kind_tag.name,
                kind_tag.category.as_deref(),
                TAG_MARKER,
            )?;
        }
        info!("created entity #{} ({:?}) as kind {}", id, key, kind_path);
        Ok(handle)
    }

    /// Resident-or-loaded handle for `id`. Fails with `NotFound` when no
    /// record exists.
    pub fn load_entity(&self, id: EntityId) -> Result<EntityHandle, StoreError> {
        let entity = self
            .inner
            .cache
            .get_or_load(&self.inner.backend, &self.inner.kinds, id)?;
        Ok(EntityHandle {
            inner: self.inner.clone(),
            entity,
        })
    }

    /// Resolve a stored reference, rejecting it if the target's creation
    /// stamp no longer matches the live record. Ids are never reused, so in
    /// practice a mismatch means the target was deleted.
    pub fn resolve_ref(&self, reference: &EntityRef) -> Result<EntityHandle, StoreError> {
        let handle = self.load_entity(reference.id)?;
        if handle.created_at() != reference.created_at {
            return Err(StoreError::Serialization(format!(
                "stale reference to entity #{}",
                reference.id
            )));
        }
        Ok(handle)
    }

    /// Entities joined to the plain tag `name` with no category.
    pub fn query_by_tag(&self, name: &str) -> Result<Vec<EntityHandle>, StoreError> {
        self.query_by_tag_with(name, None, TAG_MARKER)
    }

    pub fn query_by_tag_with(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<Vec<EntityHandle>, StoreError> {
        let ids = tags::query_ids(&self.inner, name, category, marker)?;
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_entity(id) {
                Ok(handle) => handles.push(handle),
                Err(StoreError::NotFound(_)) => {
                    warn!("tag {:?} joined to missing entity #{}", name, id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(handles)
    }

    /// Drop every cached live instance. Restart boundary only.
    pub fn evict_all(&self) -> usize {
        self.inner.cache.evict_all()
    }

    /// The identity cache backing this store.
    pub fn identity_cache(&self) -> &IdentityCache {
        &self.inner.cache
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entities: self.inner.backend.entity_count(),
            attributes: self.inner.backend.attribute_count(),
            tags: self.inner.backend.tag_count(),
            joins: self.inner.backend.join_count(),
            resident: self.inner.cache.len(),
        }
    }
}

/// Shared-instance handle to one entity. Clones are cheap and all alias the
/// same live representative; mutations through any handle are visible
/// through every other without explicit synchronization.
#[derive(Clone)]
pub struct EntityHandle {
    inner: Arc<WorldInner>,
    entity: Arc<Entity>,
}

impl EntityHandle {
    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.entity.created_at()
    }

    pub fn key(&self) -> String {
        self.entity.record().key.clone()
    }

    pub fn kind_path(&self) -> String {
        self.entity.record().kind_path.clone()
    }

    pub fn location(&self) -> Option<EntityRef> {
        self.entity.record().location.clone()
    }

    pub fn home(&self) -> Option<EntityRef> {
        self.entity.record().home.clone()
    }

    /// Descriptor for storing this entity inside attribute values.
    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            id: self.entity.id(),
            created_at: self.entity.created_at(),
        }
    }

    /// Partial save: only the fields present in `patch` are written.
    pub fn save(&self, patch: EntityPatch) -> Result<(), StoreError> {
        self.entity.ensure_live()?;
        if patch.is_empty() {
            return Ok(());
        }
        if let Some(Some(r)) = &patch.location {
            self.inner.backend.validate_ref(&Value::Ref(r.clone()))?;
        }
        if let Some(Some(r)) = &patch.home {
            self.inner.backend.validate_ref(&Value::Ref(r.clone()))?;
        }
        let mut record = self.entity.record_mut();
        let updated = self.inner.backend.update_entity(self.entity.id(), &patch)?;
        *record = updated;
        Ok(())
    }

    pub fn set_key(&self, key: &str) -> Result<(), StoreError> {
        self.save(EntityPatch::default().key(key))
    }

    pub fn set_location(&self, location: Option<EntityRef>) -> Result<(), StoreError> {
        self.save(EntityPatch::default().location(location))
    }

    pub fn set_home(&self, home: Option<EntityRef>) -> Result<(), StoreError> {
        self.save(EntityPatch::default().home(home))
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn attr_get(&self, name: &str) -> Result<Option<AttrValue>, StoreError> {
        self.attr_get_with(name, None, None)
    }

    pub fn attr_get_with(
        &self,
        name: &str,
        category: Option<&str>,
        requester: Option<&EntityHandle>,
    ) -> Result<Option<AttrValue>, StoreError> {
        attributes::get(&self.inner, &self.entity, name, category, requester)
    }

    /// Detached value with a caller-side fallback for misses.
    pub fn attr_get_or(
        &self,
        name: &str,
        default: impl Into<Value>,
    ) -> Result<Value, StoreError> {
        match self.attr_get(name)? {
            Some(attr) => attr.detach(),
            None => Ok(default.into()),
        }
    }

    pub fn attr_set(&self, name: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        attributes::set(&self.inner, &self.entity, name, None, value.into(), None, None)
    }

    pub fn attr_set_with(
        &self,
        name: &str,
        value: impl Into<Value>,
        category: Option<&str>,
        lock_string: Option<&str>,
        requester: Option<&EntityHandle>,
    ) -> Result<(), StoreError> {
        attributes::set(
            &self.inner,
            &self.entity,
            name,
            category,
            value.into(),
            lock_string,
            requester,
        )
    }

    pub fn attr_remove(&self, name: &str) -> Result<(), StoreError> {
        self.attr_remove_with(name, None, None)
    }

    pub fn attr_remove_with(
        &self,
        name: &str,
        category: Option<&str>,
        requester: Option<&EntityHandle>,
    ) -> Result<(), StoreError> {
        attributes::remove(&self.inner, &self.entity, name, category, requester)
    }

    /// Delete the materialized row so reads fall back to the kind's declared
    /// default. Returns whether a row existed.
    pub fn attr_reset(&self, name: &str) -> Result<bool, StoreError> {
        self.attr_reset_with(name, None, None)
    }

    pub fn attr_reset_with(
        &self,
        name: &str,
        category: Option<&str>,
        requester: Option<&EntityHandle>,
    ) -> Result<bool, StoreError> {
        attributes::reset(&self.inner, &self.entity, name, category, requester)
    }

    /// Materialized `(name, value)` pairs in one category bucket.
    pub fn attr_all(&self, category: Option<&str>) -> Result<Vec<(String, Value)>, StoreError> {
        attributes::all(&self.inner, &self.entity, category)
    }

    /// Materialized rows across every category.
    pub fn attr_all_any(&self) -> Result<Vec<(String, Option<String>, Value)>, StoreError> {
        attributes::all_any(&self.inner, &self.entity)
    }

    /// Store a custom aggregate through its [`Storable`] conversion.
    pub fn attr_set_obj<T: Storable>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        self.attr_set(name, value.to_stored()?)
    }

    /// Read a custom aggregate back through its [`Storable`] conversion.
    pub fn attr_get_obj<T: Storable>(&self, name: &str) -> Result<Option<T>, StoreError> {
        match self.attr_get(name)? {
            Some(attr) => Ok(Some(T::from_stored(&attr.detach()?)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Tags, aliases, permissions
    // ------------------------------------------------------------------

    pub fn tag_add(&self, name: &str) -> Result<bool, StoreError> {
        self.tag_add_with(name, None, TAG_MARKER)
    }

    pub fn tag_add_with(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<bool, StoreError> {
        tags::add(&self.inner, &self.entity, name, category, marker)
    }

    pub fn tag_remove(&self, name: &str) -> Result<(), StoreError> {
        self.tag_remove_with(name, None, TAG_MARKER)
    }

    pub fn tag_remove_with(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<(), StoreError> {
        tags::remove(&self.inner, &self.entity, name, category, marker)
    }

    pub fn tag_has(&self, name: &str) -> Result<bool, StoreError> {
        self.tag_has_with(name, None, TAG_MARKER)
    }

    pub fn tag_has_with(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<bool, StoreError> {
        tags::has(&self.inner, &self.entity, name, category, marker)
    }

    /// Every `(name, category, marker)` triple on this entity.
    pub fn tags(&self) -> Result<Vec<(String, Option<String>, String)>, StoreError> {
        tags::list(&self.inner, &self.entity)
    }

    pub fn alias_add(&self, alias: &str) -> Result<bool, StoreError> {
        self.tag_add_with(alias, None, ALIAS_MARKER)
    }

    pub fn alias_remove(&self, alias: &str) -> Result<(), StoreError> {
        self.tag_remove_with(alias, None, ALIAS_MARKER)
    }

    pub fn alias_has(&self, alias: &str) -> Result<bool, StoreError> {
        self.tag_has_with(alias, None, ALIAS_MARKER)
    }

    pub fn aliases(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tags()?
            .into_iter()
            .filter(|(_, _, marker)| marker == ALIAS_MARKER)
            .map(|(name, _, _)| name)
            .collect())
    }

    pub fn permission_add(&self, permission: &str) -> Result<bool, StoreError> {
        self.tag_add_with(permission, None, PERMISSION_MARKER)
    }

    pub fn permission_remove(&self, permission: &str) -> Result<(), StoreError> {
        self.tag_remove_with(permission, None, PERMISSION_MARKER)
    }

    pub fn permission_has(&self, permission: &str) -> Result<bool, StoreError> {
        self.tag_has_with(permission, None, PERMISSION_MARKER)
    }

    pub fn permissions(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tags()?
            .into_iter()
            .filter(|(_, _, marker)| marker == PERMISSION_MARKER)
            .map(|(name, _, _)| name)
            .collect())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Cascade attributes and tag joins, remove the record, and evict the
    /// live instance. Handles still pointing at this entity fail with
    /// `NotFound` afterwards.
    pub fn delete(&self) -> Result<(), StoreError> {
        self.entity.ensure_live()?;
        let id = self.entity.id();
        let attrs_removed = self.inner.backend.remove_attributes_for(id)?;
        let joins_removed = self.inner.backend.remove_joins_for(id)?;
        self.inner.backend.delete_entity(id)?;
        self.inner.cache.evict(id);
        self.entity.mark_deleted();
        info!(
            "deleted entity #{} ({} attributes, {} tag joins)",
            id, attrs_removed, joins_removed
        );
        Ok(())
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entity, &other.entity)
    }
}

impl Eq for EntityHandle {}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("id", &self.entity.id())
            .field("key", &self.entity.record().key)
            .finish()
    }
}
