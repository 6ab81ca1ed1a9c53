//! Attribute store: typed values keyed by `(name, category)` on an owner.
//!
//! The first attribute access on an entity loads all of its rows into a
//! per-entity cache; after that, reads (including misses that fall back to a
//! kind default) touch memory only. Writes go to storage first, then update
//! the cache in place, so the container proxies handed out earlier keep
//! aliasing the same root value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::debug;

use crate::containers::{lock_value, AttrValue, ContainerBinding, ListProxy, MapProxy, SetProxy};
use crate::errors::StoreError;
use crate::locks::AccessKind;
use crate::types::{AttrKey, AttributeRecord};
use crate::value::Value;
use crate::world::{Entity, EntityHandle, WorldInner};

/// One cached attribute row. `shared` is the root every proxy for this
/// attribute aliases.
pub(crate) struct CachedAttr {
    pub lock_string: Option<String>,
    pub created_at: DateTime<Utc>,
    pub shared: Arc<Mutex<Value>>,
}

/// Per-entity attribute cache. `loaded` flips once the owner's rows have
/// been read; freshly created entities start loaded-and-empty since they
/// cannot have rows yet.
pub(crate) struct AttrCache {
    loaded: bool,
    rows: HashMap<AttrKey, CachedAttr>,
}

impl AttrCache {
    pub(crate) fn unloaded() -> Self {
        Self {
            loaded: false,
            rows: HashMap::new(),
        }
    }

    pub(crate) fn empty_loaded() -> Self {
        Self {
            loaded: true,
            rows: HashMap::new(),
        }
    }
}

fn load_cache<'a>(
    inner: &WorldInner,
    entity: &'a Entity,
) -> Result<MutexGuard<'a, AttrCache>, StoreError> {
    let mut cache = entity.attrs();
    if !cache.loaded {
        let rows = inner.backend.attributes_for(entity.id())?;
        debug!(
            "loaded {} attribute rows for entity #{}",
            rows.len(),
            entity.id()
        );
        for row in rows {
            cache.rows.insert(
                AttrKey::new(&row.name, row.category.as_deref()),
                CachedAttr {
                    lock_string: row.lock_string,
                    created_at: row.created_at,
                    shared: Arc::new(Mutex::new(row.value)),
                },
            );
        }
        cache.loaded = true;
    }
    Ok(cache)
}

fn check_lock(
    inner: &WorldInner,
    lock_string: Option<&str>,
    requester: Option<&EntityHandle>,
    access: AccessKind,
    name: &str,
) -> Result<(), StoreError> {
    if let Some(lock) = lock_string {
        if !(inner.lock_eval)(lock, requester, access) {
            return Err(StoreError::AccessDenied(format!(
                "{} access to attribute {:?}",
                access.as_str(),
                name
            )));
        }
    }
    Ok(())
}

/// Read one attribute. A materialized row wins; otherwise the owning kind's
/// declared default is returned (detached, no row created); otherwise `None`.
pub(crate) fn get(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
    name: &str,
    category: Option<&str>,
    requester: Option<&EntityHandle>,
) -> Result<Option<AttrValue>, StoreError> {
    entity.ensure_live()?;
    let key = AttrKey::new(name, category);
    let cache = load_cache(inner, entity)?;
    if let Some(row) = cache.rows.get(&key) {
        check_lock(
            inner,
            row.lock_string.as_deref(),
            requester,
            AccessKind::Read,
            name,
        )?;
        let binding = ContainerBinding {
            inner: inner.clone(),
            entity: entity.clone(),
            key: key.clone(),
        };
        let guard = lock_value(&row.shared);
        let out = match &*guard {
            Value::List(_) => AttrValue::List(ListProxy::new(binding, row.shared.clone(), Vec::new())),
            Value::Map(_) => AttrValue::Map(MapProxy::new(binding, row.shared.clone(), Vec::new())),
            Value::Set(_) => AttrValue::Set(SetProxy::new(binding, row.shared.clone(), Vec::new())),
            plain => AttrValue::Value(plain.clone()),
        };
        return Ok(Some(out));
    }
    drop(cache);
    if let Some(default) = entity.kind().attr_default(name, category) {
        return Ok(Some(AttrValue::Value(default.clone())));
    }
    Ok(None)
}

/// Write one attribute. Always materializes a row, even when the value
/// equals the kind's declared default. A `lock_string` argument replaces the
/// stored lock; `None` preserves it.
pub(crate) fn set(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
    name: &str,
    category: Option<&str>,
    value: Value,
    lock_string: Option<&str>,
    requester: Option<&EntityHandle>,
) -> Result<(), StoreError> {
    entity.ensure_live()?;
    inner.backend.validate_ref(&value)?;
    let key = AttrKey::new(name, category);
    let mut cache = load_cache(inner, entity)?;
    let (existing_lock, created_at) = match cache.rows.get(&key) {
        Some(row) => {
            check_lock(
                inner,
                row.lock_string.as_deref(),
                requester,
                AccessKind::Write,
                name,
            )?;
            (row.lock_string.clone(), row.created_at)
        }
        None => (None, Utc::now()),
    };
    let lock_string = lock_string.map(str::to_string).or(existing_lock);

    let mut record = AttributeRecord::new(entity.id(), name, category, value.clone());
    record.lock_string = lock_string.clone();
    record.created_at = created_at;
    inner.backend.put_attribute(record)?;

    match cache.rows.get_mut(&key) {
        Some(row) => {
            *lock_value(&row.shared) = value;
            row.lock_string = lock_string;
        }
        None => {
            cache.rows.insert(
                key,
                CachedAttr {
                    lock_string,
                    created_at,
                    shared: Arc::new(Mutex::new(value)),
                },
            );
        }
    }
    Ok(())
}

/// Persistence entry point for container proxies: rewrite the whole stored
/// value for `key`, preserving the row's lock string. If the row was removed
/// after the proxy was handed out, it is re-materialized.
pub(crate) fn write_through(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
    key: &AttrKey,
    root: Value,
) -> Result<(), StoreError> {
    entity.ensure_live()?;
    inner.backend.validate_ref(&root)?;
    let mut cache = load_cache(inner, entity)?;
    let (lock_string, created_at, resident) = match cache.rows.get(key) {
        Some(row) => (row.lock_string.clone(), row.created_at, true),
        None => (None, Utc::now(), false),
    };

    let reinsert = if resident { None } else { Some(root.clone()) };
    let mut record =
        AttributeRecord::new(entity.id(), &key.name, key.category.as_deref(), root);
    record.lock_string = lock_string.clone();
    record.created_at = created_at;
    inner.backend.put_attribute(record)?;

    if let Some(value) = reinsert {
        cache.rows.insert(
            key.clone(),
            CachedAttr {
                lock_string,
                created_at,
                shared: Arc::new(Mutex::new(value)),
            },
        );
    }
    Ok(())
}

/// Remove one attribute row. Missing rows are a hard error: a remove that
/// silently does nothing would hide bugs in calling code.
pub(crate) fn remove(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
    name: &str,
    category: Option<&str>,
    requester: Option<&EntityHandle>,
) -> Result<(), StoreError> {
    entity.ensure_live()?;
    let key = AttrKey::new(name, category);
    let mut cache = load_cache(inner, entity)?;
    match cache.rows.get(&key) {
        Some(row) => check_lock(
            inner,
            row.lock_string.as_deref(),
            requester,
            AccessKind::Write,
            name,
        )?,
        None => {
            return Err(StoreError::NotFound(format!(
                "attribute {:?} on entity #{}",
                name,
                entity.id()
            )))
        }
    }
    inner.backend.remove_attribute(entity.id(), name, category)?;
    cache.rows.remove(&key);
    Ok(())
}

/// Re-sync to the kind's declared default by deleting the materialized row.
/// Writing the default value back is not equivalent: it leaves a row behind
/// that shadows later changes to the declaration. Returns whether a row
/// existed.
pub(crate) fn reset(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
    name: &str,
    category: Option<&str>,
    requester: Option<&EntityHandle>,
) -> Result<bool, StoreError> {
    entity.ensure_live()?;
    let key = AttrKey::new(name, category);
    let mut cache = load_cache(inner, entity)?;
    match cache.rows.get(&key) {
        Some(row) => check_lock(
            inner,
            row.lock_string.as_deref(),
            requester,
            AccessKind::Write,
            name,
        )?,
        None => return Ok(false),
    }
    let removed = inner.backend.remove_attribute(entity.id(), name, category)?;
    cache.rows.remove(&key);
    Ok(removed)
}

/// Materialized `(name, value)` pairs in one category bucket, name-sorted.
/// Declared-but-unmaterialized defaults are not listed.
pub(crate) fn all(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
    category: Option<&str>,
) -> Result<Vec<(String, Value)>, StoreError> {
    entity.ensure_live()?;
    let cache = load_cache(inner, entity)?;
    let mut out: Vec<(String, Value)> = cache
        .rows
        .iter()
        .filter(|(key, _)| key.category.as_deref() == category)
        .map(|(key, row)| (key.name.clone(), (*lock_value(&row.shared)).clone()))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Materialized rows across every category: `(name, category, value)`.
pub(crate) fn all_any(
    inner: &Arc<WorldInner>,
    entity: &Arc<Entity>,
) -> Result<Vec<(String, Option<String>, Value)>, StoreError> {
    entity.ensure_live()?;
    let cache = load_cache(inner, entity)?;
    let mut out: Vec<(String, Option<String>, Value)> = cache
        .rows
        .iter()
        .map(|(key, row)| {
            (
                key.name.clone(),
                key.category.clone(),
                (*lock_value(&row.shared)).clone(),
            )
        })
        .collect();
    out.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    Ok(out)
}
