//! Tag store: shared, de-duplicated labels joined many-to-many to entities.
//!
//! A tag row exists once per `(name, category, kind_marker)` and is never
//! owned: entities point at it through payload-free joins, and removing a
//! join leaves the row in place for reuse. Membership queries scan the join
//! prefix, so their cost tracks the number of joined entities, not the size
//! of the world. Aliases and permission flags are ordinary tags under their
//! own markers.

use log::debug;

use crate::errors::StoreError;
use crate::types::EntityId;
use crate::world::{Entity, WorldInner};

/// Attach a tag, find-or-creating the shared row. Idempotent; returns
/// whether a new join was created.
pub(crate) fn add(
    inner: &WorldInner,
    entity: &Entity,
    name: &str,
    category: Option<&str>,
    marker: &str,
) -> Result<bool, StoreError> {
    entity.ensure_live()?;
    inner.backend.ensure_tag(name, category, marker)?;
    let joined = inner.backend.add_join(entity.id(), name, category, marker)?;
    if joined {
        debug!(
            "tagged entity #{} with {:?} (category {:?}, marker {})",
            entity.id(),
            name,
            category,
            marker
        );
    }
    Ok(joined)
}

/// Detach a tag. The join must exist; the shared row always survives.
pub(crate) fn remove(
    inner: &WorldInner,
    entity: &Entity,
    name: &str,
    category: Option<&str>,
    marker: &str,
) -> Result<(), StoreError> {
    entity.ensure_live()?;
    if !inner.backend.remove_join(entity.id(), name, category, marker)? {
        return Err(StoreError::NotFound(format!(
            "tag {:?} on entity #{}",
            name,
            entity.id()
        )));
    }
    debug!(
        "untagged entity #{} from {:?} (category {:?}, marker {})",
        entity.id(),
        name,
        category,
        marker
    );
    Ok(())
}

pub(crate) fn has(
    inner: &WorldInner,
    entity: &Entity,
    name: &str,
    category: Option<&str>,
    marker: &str,
) -> Result<bool, StoreError> {
    entity.ensure_live()?;
    inner.backend.has_join(entity.id(), name, category, marker)
}

/// Every `(name, category, marker)` triple joined to this entity.
pub(crate) fn list(
    inner: &WorldInner,
    entity: &Entity,
) -> Result<Vec<(String, Option<String>, String)>, StoreError> {
    entity.ensure_live()?;
    let joins = inner.backend.joins_for(entity.id())?;
    Ok(joins
        .into_iter()
        .map(|j| (j.name, j.category, j.kind_marker))
        .collect())
}

/// Ids joined to `(name, category, marker)`, in id order.
pub(crate) fn query_ids(
    inner: &WorldInner,
    name: &str,
    category: Option<&str>,
    marker: &str,
) -> Result<Vec<EntityId>, StoreError> {
    inner.backend.joined_entities(name, category, marker)
}
