//! Write-through proxies for container-valued attributes.
//!
//! Reading a stored list, map, or set does not hand back a detached copy: it
//! returns a proxy bound to `(owner, name, category)` whose in-place
//! mutations immediately persist the entire container value. Repeated reads
//! of the same attribute share one in-memory root, so two proxies obtained
//! independently alias the same storage row and see each other's mutations.
//! Extracting a nested sub-container yields another live proxy over the same
//! root with a longer path. Callers who want value semantics call
//! [`ListProxy::detach`] (or the map/set equivalents) for an inert copy.
//!
//! Lock strings are evaluated when the proxy is obtained through the
//! attribute surface; the write-through path itself does not re-evaluate
//! them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::attributes;
use crate::errors::StoreError;
use crate::types::AttrKey;
use crate::value::Value;
use crate::world::{Entity, WorldInner};

/// Lock a shared value, recovering the data from a poisoned mutex instead of
/// propagating the panic.
pub(crate) fn lock_value(shared: &Mutex<Value>) -> MutexGuard<'_, Value> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where a proxy writes back to: the attribute row it was read from.
pub(crate) struct ContainerBinding {
    pub(crate) inner: Arc<WorldInner>,
    pub(crate) entity: Arc<Entity>,
    pub(crate) key: AttrKey,
}

impl Clone for ContainerBinding {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            entity: self.entity.clone(),
            key: self.key.clone(),
        }
    }
}

/// One step from a container root down to a nested sub-container.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathStep {
    Index(usize),
    Key(Value),
}

fn shape_error(expected: &str, found: &Value) -> StoreError {
    StoreError::Serialization(format!(
        "container changed shape under proxy: expected {}, found {}",
        expected,
        found.type_name()
    ))
}

fn locate<'a>(root: &'a mut Value, path: &[PathStep]) -> Result<&'a mut Value, StoreError> {
    let mut cursor = root;
    for step in path {
        match step {
            PathStep::Index(index) => match cursor {
                Value::List(items) => {
                    cursor = items.get_mut(*index).ok_or_else(|| {
                        StoreError::Serialization(format!(
                            "container path index {} is out of bounds",
                            index
                        ))
                    })?;
                }
                other => return Err(shape_error("list", other)),
            },
            PathStep::Key(key) => match cursor {
                Value::Map(entries) => {
                    cursor = entries.get_mut(key).ok_or_else(|| {
                        StoreError::Serialization("container path key is gone".to_string())
                    })?;
                }
                other => return Err(shape_error("map", other)),
            },
        }
    }
    Ok(cursor)
}

fn locate_ref<'a>(root: &'a Value, path: &[PathStep]) -> Result<&'a Value, StoreError> {
    let mut cursor = root;
    for step in path {
        match step {
            PathStep::Index(index) => match cursor {
                Value::List(items) => {
                    cursor = items.get(*index).ok_or_else(|| {
                        StoreError::Serialization(format!(
                            "container path index {} is out of bounds",
                            index
                        ))
                    })?;
                }
                other => return Err(shape_error("list", other)),
            },
            PathStep::Key(key) => match cursor {
                Value::Map(entries) => {
                    cursor = entries.get(key).ok_or_else(|| {
                        StoreError::Serialization("container path key is gone".to_string())
                    })?;
                }
                other => return Err(shape_error("map", other)),
            },
        }
    }
    Ok(cursor)
}

/// Mutate the value at `path` under the root lock, then persist the whole
/// root through the attribute store.
fn mutate<R>(
    binding: &ContainerBinding,
    root: &Arc<Mutex<Value>>,
    path: &[PathStep],
    op: impl FnOnce(&mut Value) -> Result<R, StoreError>,
) -> Result<R, StoreError> {
    let (out, snapshot) = {
        let mut guard = lock_value(root);
        let target = locate(&mut guard, path)?;
        let out = op(target)?;
        (out, (*guard).clone())
    };
    attributes::write_through(&binding.inner, &binding.entity, &binding.key, snapshot)?;
    Ok(out)
}

fn read<R>(
    root: &Arc<Mutex<Value>>,
    path: &[PathStep],
    op: impl FnOnce(&Value) -> Result<R, StoreError>,
) -> Result<R, StoreError> {
    let guard = lock_value(root);
    let target = locate_ref(&guard, path)?;
    op(target)
}

fn as_list_ref(v: &Value) -> Result<&Vec<Value>, StoreError> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(shape_error("list", other)),
    }
}

fn as_list_mut(v: &mut Value) -> Result<&mut Vec<Value>, StoreError> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(shape_error("list", other)),
    }
}

fn as_map_ref(v: &Value) -> Result<&std::collections::BTreeMap<Value, Value>, StoreError> {
    match v {
        Value::Map(entries) => Ok(entries),
        other => Err(shape_error("map", other)),
    }
}

fn as_map_mut(v: &mut Value) -> Result<&mut std::collections::BTreeMap<Value, Value>, StoreError> {
    match v {
        Value::Map(entries) => Ok(entries),
        other => Err(shape_error("map", other)),
    }
}

fn as_set_ref(v: &Value) -> Result<&std::collections::BTreeSet<Value>, StoreError> {
    match v {
        Value::Set(members) => Ok(members),
        other => Err(shape_error("set", other)),
    }
}

fn as_set_mut(v: &mut Value) -> Result<&mut std::collections::BTreeSet<Value>, StoreError> {
    match v {
        Value::Set(members) => Ok(members),
        other => Err(shape_error("set", other)),
    }
}

/// Live proxy over a stored ordered sequence.
#[derive(Clone)]
pub struct ListProxy {
    binding: ContainerBinding,
    root: Arc<Mutex<Value>>,
    path: Vec<PathStep>,
}

impl ListProxy {
    pub(crate) fn new(
        binding: ContainerBinding,
        root: Arc<Mutex<Value>>,
        path: Vec<PathStep>,
    ) -> Self {
        Self {
            binding,
            root,
            path,
        }
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        read(&self.root, &self.path, |v| Ok(as_list_ref(v)?.len()))
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Detached copy of one element.
    pub fn get(&self, index: usize) -> Result<Option<Value>, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_list_ref(v)?.get(index).cloned())
        })
    }

    pub fn contains(&self, value: &Value) -> Result<bool, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_list_ref(v)?.contains(value))
        })
    }

    /// Detached copy of the whole sequence.
    pub fn to_vec(&self) -> Result<Vec<Value>, StoreError> {
        read(&self.root, &self.path, |v| Ok(as_list_ref(v)?.clone()))
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), StoreError> {
        let value = value.into();
        self.binding.inner.backend.validate_ref(&value)?;
        mutate(&self.binding, &self.root, &self.path, |v| {
            as_list_mut(v)?.push(value);
            Ok(())
        })
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), StoreError> {
        let value = value.into();
        self.binding.inner.backend.validate_ref(&value)?;
        mutate(&self.binding, &self.root, &self.path, |v| {
            let items = as_list_mut(v)?;
            if index > items.len() {
                return Err(StoreError::Serialization(format!(
                    "insert index {} is out of bounds for length {}",
                    index,
                    items.len()
                )));
            }
            items.insert(index, value);
            Ok(())
        })
    }

    /// Replace one element.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), StoreError> {
        let value = value.into();
        self.binding.inner.backend.validate_ref(&value)?;
        mutate(&self.binding, &self.root, &self.path, |v| {
            let items = as_list_mut(v)?;
            let len = items.len();
            let slot = items.get_mut(index).ok_or_else(|| {
                StoreError::Serialization(format!(
                    "index {} is out of bounds for length {}",
                    index, len
                ))
            })?;
            *slot = value;
            Ok(())
        })
    }

    pub fn remove(&self, index: usize) -> Result<Value, StoreError> {
        mutate(&self.binding, &self.root, &self.path, |v| {
            let items = as_list_mut(v)?;
            if index >= items.len() {
                return Err(StoreError::Serialization(format!(
                    "remove index {} is out of bounds for length {}",
                    index,
                    items.len()
                )));
            }
            Ok(items.remove(index))
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        mutate(&self.binding, &self.root, &self.path, |v| {
            as_list_mut(v)?.clear();
            Ok(())
        })
    }

    /// A live proxy for the nested list at `index`, if that element is a
    /// list. The result aliases this proxy's backing attribute.
    pub fn get_list(&self, index: usize) -> Result<Option<ListProxy>, StoreError> {
        let hit = read(&self.root, &self.path, |v| {
            Ok(as_list_ref(v)?
                .get(index)
                .map(|child| matches!(child, Value::List(_))))
        })?;
        Ok(match hit {
            Some(true) => Some(ListProxy::new(
                self.binding.clone(),
                self.root.clone(),
                self.extended(PathStep::Index(index)),
            )),
            _ => None,
        })
    }

    /// A live proxy for the nested map at `index`, if that element is a map.
    pub fn get_map(&self, index: usize) -> Result<Option<MapProxy>, StoreError> {
        let hit = read(&self.root, &self.path, |v| {
            Ok(as_list_ref(v)?
                .get(index)
                .map(|child| matches!(child, Value::Map(_))))
        })?;
        Ok(match hit {
            Some(true) => Some(MapProxy::new(
                self.binding.clone(),
                self.root.clone(),
                self.extended(PathStep::Index(index)),
            )),
            _ => None,
        })
    }

    /// A live proxy for the nested set at `index`, if that element is a set.
    pub fn get_set(&self, index: usize) -> Result<Option<SetProxy>, StoreError> {
        let hit = read(&self.root, &self.path, |v| {
            Ok(as_list_ref(v)?
                .get(index)
                .map(|child| matches!(child, Value::Set(_))))
        })?;
        Ok(match hit {
            Some(true) => Some(SetProxy::new(
                self.binding.clone(),
                self.root.clone(),
                self.extended(PathStep::Index(index)),
            )),
            _ => None,
        })
    }

    /// Inert, non-persisting copy of this container for callers who want
    /// value semantics.
    pub fn detach(&self) -> Result<Value, StoreError> {
        read(&self.root, &self.path, |v| Ok(v.clone()))
    }

    fn extended(&self, step: PathStep) -> Vec<PathStep> {
        let mut path = self.path.clone();
        path.push(step);
        path
    }
}

impl fmt::Debug for ListProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListProxy")
            .field("owner", &self.binding.entity.id())
            .field("attribute", &self.binding.key.name)
            .field("depth", &self.path.len())
            .finish()
    }
}

/// Live proxy over a stored key-unique mapping.
#[derive(Clone)]
pub struct MapProxy {
    binding: ContainerBinding,
    root: Arc<Mutex<Value>>,
    path: Vec<PathStep>,
}

impl MapProxy {
    pub(crate) fn new(
        binding: ContainerBinding,
        root: Arc<Mutex<Value>>,
        path: Vec<PathStep>,
    ) -> Self {
        Self {
            binding,
            root,
            path,
        }
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        read(&self.root, &self.path, |v| Ok(as_map_ref(v)?.len()))
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Detached copy of one entry's value.
    pub fn get(&self, key: &Value) -> Result<Option<Value>, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_map_ref(v)?.get(key).cloned())
        })
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_map_ref(v)?.contains_key(key))
        })
    }

    pub fn keys(&self) -> Result<Vec<Value>, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_map_ref(v)?.keys().cloned().collect())
        })
    }

    pub fn insert(
        &self,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let key = key.into();
        let value = value.into();
        self.binding.inner.backend.validate_ref(&key)?;
        self.binding.inner.backend.validate_ref(&value)?;
        mutate(&self.binding, &self.root, &self.path, |v| {
            Ok(as_map_mut(v)?.insert(key, value))
        })
    }

    pub fn remove(&self, key: &Value) -> Result<Option<Value>, StoreError> {
        mutate(&self.binding, &self.root, &self.path, |v| {
            Ok(as_map_mut(v)?.remove(key))
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        mutate(&self.binding, &self.root, &self.path, |v| {
            as_map_mut(v)?.clear();
            Ok(())
        })
    }

    /// A live proxy for the nested list under `key`, if that entry is a
    /// list. The result aliases this proxy's backing attribute.
    pub fn get_list(&self, key: &Value) -> Result<Option<ListProxy>, StoreError> {
        let hit = read(&self.root, &self.path, |v| {
            Ok(as_map_ref(v)?
                .get(key)
                .map(|child| matches!(child, Value::List(_))))
        })?;
        Ok(match hit {
            Some(true) => Some(ListProxy::new(
                self.binding.clone(),
                self.root.clone(),
                self.extended(PathStep::Key(key.clone())),
            )),
            _ => None,
        })
    }

    /// A live proxy for the nested map under `key`, if that entry is a map.
    pub fn get_map(&self, key: &Value) -> Result<Option<MapProxy>, StoreError> {
        let hit = read(&self.root, &self.path, |v| {
            Ok(as_map_ref(v)?
                .get(key)
                .map(|child| matches!(child, Value::Map(_))))
        })?;
        Ok(match hit {
            Some(true) => Some(MapProxy::new(
                self.binding.clone(),
                self.root.clone(),
                self.extended(PathStep::Key(key.clone())),
            )),
            _ => None,
        })
    }

    /// A live proxy for the nested set under `key`, if that entry is a set.
    pub fn get_set(&self, key: &Value) -> Result<Option<SetProxy>, StoreError> {
        let hit = read(&self.root, &self.path, |v| {
            Ok(as_map_ref(v)?
                .get(key)
                .map(|child| matches!(child, Value::Set(_))))
        })?;
        Ok(match hit {
            Some(true) => Some(SetProxy::new(
                self.binding.clone(),
                self.root.clone(),
                self.extended(PathStep::Key(key.clone())),
            )),
            _ => None,
        })
    }

    /// Inert, non-persisting copy of this container.
    pub fn detach(&self) -> Result<Value, StoreError> {
        read(&self.root, &self.path, |v| Ok(v.clone()))
    }

    fn extended(&self, step: PathStep) -> Vec<PathStep> {
        let mut path = self.path.clone();
        path.push(step);
        path
    }
}

impl fmt::Debug for MapProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProxy")
            .field("owner", &self.binding.entity.id())
            .field("attribute", &self.binding.key.name)
            .field("depth", &self.path.len())
            .finish()
    }
}

/// Live proxy over a stored set. Members are compared by the total value
/// order, so nested containers are valid members; they are returned detached
/// because mutating a member in place would change its identity within the
/// set.
#[derive(Clone)]
pub struct SetProxy {
    binding: ContainerBinding,
    root: Arc<Mutex<Value>>,
    path: Vec<PathStep>,
}

impl SetProxy {
    pub(crate) fn new(
        binding: ContainerBinding,
        root: Arc<Mutex<Value>>,
        path: Vec<PathStep>,
    ) -> Self {
        Self {
            binding,
            root,
            path,
        }
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        read(&self.root, &self.path, |v| Ok(as_set_ref(v)?.len()))
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, value: &Value) -> Result<bool, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_set_ref(v)?.contains(value))
        })
    }

    /// Detached members in value order.
    pub fn to_vec(&self) -> Result<Vec<Value>, StoreError> {
        read(&self.root, &self.path, |v| {
            Ok(as_set_ref(v)?.iter().cloned().collect())
        })
    }

    /// Returns false if the member was already present.
    pub fn insert(&self, value: impl Into<Value>) -> Result<bool, StoreError> {
        let value = value.into();
        self.binding.inner.backend.validate_ref(&value)?;
        mutate(&self.binding, &self.root, &self.path, |v| {
            Ok(as_set_mut(v)?.insert(value))
        })
    }

    /// Returns whether the member was present.
    pub fn remove(&self, value: &Value) -> Result<bool, StoreError> {
        mutate(&self.binding, &self.root, &self.path, |v| {
            Ok(as_set_mut(v)?.remove(value))
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        mutate(&self.binding, &self.root, &self.path, |v| {
            as_set_mut(v)?.clear();
            Ok(())
        })
    }

    /// Inert, non-persisting copy of this container.
    pub fn detach(&self) -> Result<Value, StoreError> {
        read(&self.root, &self.path, |v| Ok(v.clone()))
    }
}

impl fmt::Debug for SetProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetProxy")
            .field("owner", &self.binding.entity.id())
            .field("attribute", &self.binding.key.name)
            .field("depth", &self.path.len())
            .finish()
    }
}

/// What an attribute read hands back: scalars and references come out as
/// plain values; containers come out as live proxies.
pub enum AttrValue {
    Value(Value),
    List(ListProxy),
    Map(MapProxy),
    Set(SetProxy),
}

impl AttrValue {
    /// Detached plain value regardless of variant.
    pub fn detach(&self) -> Result<Value, StoreError> {
        match self {
            AttrValue::Value(v) => Ok(v.clone()),
            AttrValue::List(p) => p.detach(),
            AttrValue::Map(p) => p.detach(),
            AttrValue::Set(p) => p.detach(),
        }
    }

    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            AttrValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<ListProxy> {
        match self {
            AttrValue::List(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<MapProxy> {
        match self {
            AttrValue::Map(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<SetProxy> {
        match self {
            AttrValue::Set(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            AttrValue::List(p) => fmt::Debug::fmt(p, f),
            AttrValue::Map(p) => fmt::Debug::fmt(p, f),
            AttrValue::Set(p) => fmt::Debug::fmt(p, f),
        }
    }
}
