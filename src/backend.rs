//! Sled-backed persistence for entity records, attribute rows, and tags.
//!
//! This is the only module that issues schema-level reads and writes. One
//! `sled::Db` holds named trees for each logical table; keys are string
//! prefixed so related rows scan together, and every mutation flushes before
//! returning.

use std::path::Path;

use log::debug;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use sled::IVec;

use crate::errors::StoreError;
use crate::types::{
    AttributeRecord, EntityId, EntityPatch, EntityRecord, TagRecord, ATTRIBUTE_SCHEMA_VERSION,
    ENTITY_SCHEMA_VERSION, TAG_SCHEMA_VERSION,
};
use crate::value::Value;

const TREE_ENTITIES: &str = "entities";
const TREE_ATTRIBUTES: &str = "attributes";
const TREE_TAGS: &str = "tags";
const TREE_META: &str = "meta";

const KEY_NEXT_ID: &[u8] = b"next_entity_id";

/// Characters escaped out of category and tag key segments so ':' stays a
/// reliable separator in tree keys.
const KEY_ESCAPE: &AsciiSet = &CONTROLS.add(b':').add(b'%');

fn escape_segment(s: &str) -> String {
    utf8_percent_encode(s, KEY_ESCAPE).to_string()
}

/// Encode `category` into a key segment. `None` (the explicit "no category"
/// marker) gets its own segment so it can never collide with a named
/// category, including the empty string.
fn category_segment(category: Option<&str>) -> String {
    match category {
        Some(c) => format!("c{}", escape_segment(c)),
        None => "n".to_string(),
    }
}

/// Reverse-join row value: enough to rebuild the forward join key during an
/// owner cascade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct JoinBack {
    pub name: String,
    pub category: Option<String>,
    pub kind_marker: String,
}

/// Sled-backed world storage. All higher components go through this type.
pub struct WorldBackend {
    _db: sled::Db,
    entities: sled::Tree,
    attributes: sled::Tree,
    tags: sled::Tree,
    meta: sled::Tree,
}

impl WorldBackend {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let entities = db.open_tree(TREE_ENTITIES)?;
        let attributes = db.open_tree(TREE_ATTRIBUTES)?;
        let tags = db.open_tree(TREE_TAGS)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self {
            _db: db,
            entities,
            attributes,
            tags,
            meta,
        })
    }

    fn entity_key(id: EntityId) -> Vec<u8> {
        format!("ent:{:020}", id).into_bytes()
    }

    fn attr_key(owner: EntityId, name: &str, category: Option<&str>) -> Vec<u8> {
        format!(
            "attr:{:020}:{}:{}",
            owner,
            category_segment(category),
            name
        )
        .into_bytes()
    }

    fn attr_owner_prefix(owner: EntityId) -> Vec<u8> {
        format!("attr:{:020}:", owner).into_bytes()
    }

    fn tag_key(name: &str, category: Option<&str>, marker: &str) -> Vec<u8> {
        format!(
            "tag:{}:{}:{}",
            escape_segment(marker),
            category_segment(category),
            escape_segment(name)
        )
        .into_bytes()
    }

    fn join_prefix(name: &str, category: Option<&str>, marker: &str) -> Vec<u8> {
        format!(
            "join:{}:{}:{}:",
            escape_segment(marker),
            category_segment(category),
            escape_segment(name)
        )
        .into_bytes()
    }

    fn join_key(entity: EntityId, name: &str, category: Option<&str>, marker: &str) -> Vec<u8> {
        let mut key = Self::join_prefix(name, category, marker);
        key.extend_from_slice(format!("{:020}", entity).as_bytes());
        key
    }

    fn rjoin_prefix(entity: EntityId) -> Vec<u8> {
        format!("rjoin:{:020}:", entity).into_bytes()
    }

    fn rjoin_key(entity: EntityId, name: &str, category: Option<&str>, marker: &str) -> Vec<u8> {
        format!(
            "rjoin:{:020}:{}:{}:{}",
            entity,
            escape_segment(marker),
            category_segment(category),
            escape_segment(name)
        )
        .into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, StoreError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    /// Allocate the next entity id. The counter lives in the meta tree and
    /// only ever moves forward, so ids are never reused even across deletes
    /// and restarts.
    pub fn allocate_id(&self) -> Result<EntityId, StoreError> {
        let bytes = self.meta.update_and_fetch(KEY_NEXT_ID, |old| {
            let next = old
                .and_then(|b| <[u8; 8]>::try_from(b).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0)
                + 1;
            Some(next.to_be_bytes().to_vec())
        })?;
        let bytes = bytes.ok_or_else(|| {
            StoreError::Serialization("id counter vanished during allocation".to_string())
        })?;
        let id = <[u8; 8]>::try_from(&bytes[..])
            .map(u64::from_be_bytes)
            .map_err(|_| StoreError::Serialization("id counter is corrupt".to_string()))?;
        self.meta.flush()?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Entity records
    // ------------------------------------------------------------------

    /// Insert or overwrite an entity record.
    pub fn put_entity(&self, mut record: EntityRecord) -> Result<EntityRecord, StoreError> {
        record.schema_version = ENTITY_SCHEMA_VERSION;
        let key = Self::entity_key(record.id);
        let bytes = Self::serialize(&record)?;
        self.entities.insert(key, bytes)?;
        self.entities.flush()?;
        Ok(record)
    }

    /// Fetch an entity record by id.
    pub fn get_entity(&self, id: EntityId) -> Result<EntityRecord, StoreError> {
        let key = Self::entity_key(id);
        let Some(bytes) = self.entities.get(&key)? else {
            return Err(StoreError::NotFound(format!("entity #{}", id)));
        };
        let record: EntityRecord = Self::deserialize(bytes)?;
        if record.schema_version != ENTITY_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "entity",
                expected: ENTITY_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    pub fn entity_exists(&self, id: EntityId) -> Result<bool, StoreError> {
        Ok(self.entities.contains_key(Self::entity_key(id))?)
    }

    /// Partial update: only the fields present in `patch` are changed. The
    /// write is a compare-and-swap against the bytes that were read, so a
    /// racing writer surfaces as `Conflict` instead of being silently
    /// overwritten.
    pub fn update_entity(
        &self,
        id: EntityId,
        patch: &EntityPatch,
    ) -> Result<EntityRecord, StoreError> {
        let key = Self::entity_key(id);
        let Some(old_bytes) = self.entities.get(&key)? else {
            return Err(StoreError::NotFound(format!("entity #{}", id)));
        };
        let mut record: EntityRecord = Self::deserialize(old_bytes.clone())?;
        if record.schema_version != ENTITY_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "entity",
                expected: ENTITY_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        if let Some(ref new_key) = patch.key {
            record.key = new_key.clone();
        }
        if let Some(ref location) = patch.location {
            record.location = location.clone();
        }
        if let Some(ref home) = patch.home {
            record.home = home.clone();
        }
        let new_bytes = Self::serialize(&record)?;
        match self
            .entities
            .compare_and_swap(&key, Some(old_bytes), Some(new_bytes))?
        {
            Ok(()) => {
                self.entities.flush()?;
                Ok(record)
            }
            Err(_) => Err(StoreError::Conflict(format!(
                "entity #{} changed during save",
                id
            ))),
        }
    }

    /// Remove an entity record. Attribute and tag cascades are the caller's
    /// responsibility and must run before this.
    pub fn delete_entity(&self, id: EntityId) -> Result<(), StoreError> {
        let key = Self::entity_key(id);
        let removed = self.entities.remove(&key)?;
        if removed.is_none() {
            return Err(StoreError::NotFound(format!("entity #{}", id)));
        }
        self.entities.flush()?;
        debug!("deleted entity record #{}", id);
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // ------------------------------------------------------------------
    // Attribute rows
    // ------------------------------------------------------------------

    /// Insert or overwrite an attribute row.
    pub fn put_attribute(&self, mut record: AttributeRecord) -> Result<(), StoreError> {
        record.schema_version = ATTRIBUTE_SCHEMA_VERSION;
        let key = Self::attr_key(record.owner, &record.name, record.category.as_deref());
        let bytes = Self::serialize(&record)?;
        self.attributes.insert(key, bytes)?;
        self.attributes.flush()?;
        Ok(())
    }

    pub fn get_attribute(
        &self,
        owner: EntityId,
        name: &str,
        category: Option<&str>,
    ) -> Result<Option<AttributeRecord>, StoreError> {
        let key = Self::attr_key(owner, name, category);
        let Some(bytes) = self.attributes.get(&key)? else {
            return Ok(None);
        };
        let record: AttributeRecord = Self::deserialize(bytes)?;
        if record.schema_version != ATTRIBUTE_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "attribute",
                expected: ATTRIBUTE_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    /// Remove one attribute row. Returns whether a row existed.
    pub fn remove_attribute(
        &self,
        owner: EntityId,
        name: &str,
        category: Option<&str>,
    ) -> Result<bool, StoreError> {
        let key = Self::attr_key(owner, name, category);
        let removed = self.attributes.remove(&key)?.is_some();
        if removed {
            self.attributes.flush()?;
        }
        Ok(removed)
    }

    /// All attribute rows owned by one entity.
    pub fn attributes_for(&self, owner: EntityId) -> Result<Vec<AttributeRecord>, StoreError> {
        let prefix = Self::attr_owner_prefix(owner);
        let mut rows = Vec::new();
        for entry in self.attributes.scan_prefix(&prefix) {
            let (_, bytes) = entry?;
            rows.push(Self::deserialize::<AttributeRecord>(bytes)?);
        }
        Ok(rows)
    }

    /// Owner cascade: drop every attribute row for `owner`. Returns how many
    /// rows went away.
    pub fn remove_attributes_for(&self, owner: EntityId) -> Result<usize, StoreError> {
        let prefix = Self::attr_owner_prefix(owner);
        let keys: Result<Vec<_>, _> = self
            .attributes
            .scan_prefix(&prefix)
            .map(|entry| entry.map(|(key, _)| key))
            .collect();
        let keys = keys?;
        let mut removed = 0usize;
        for key in &keys {
            if self.attributes.remove(key)?.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.attributes.flush()?;
        }
        Ok(removed)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    // ------------------------------------------------------------------
    // Tag rows and joins
    // ------------------------------------------------------------------

    /// Find-or-create the shared tag row for `(name, category, marker)`.
    pub fn ensure_tag(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<TagRecord, StoreError> {
        if let Some(existing) = self.get_tag(name, category, marker)? {
            return Ok(existing);
        }
        let record = TagRecord::new(name, category, marker);
        let key = Self::tag_key(name, category, marker);
        let bytes = Self::serialize(&record)?;
        self.tags.insert(key, bytes)?;
        self.tags.flush()?;
        debug!(
            "created tag row {:?} (category {:?}, marker {})",
            name, category, marker
        );
        Ok(record)
    }

    pub fn get_tag(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<Option<TagRecord>, StoreError> {
        let key = Self::tag_key(name, category, marker);
        let Some(bytes) = self.tags.get(&key)? else {
            return Ok(None);
        };
        let record: TagRecord = Self::deserialize(bytes)?;
        if record.schema_version != TAG_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "tag",
                expected: TAG_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    /// Create the join between an entity and a tag row. Returns false if the
    /// join already existed.
    pub fn add_join(
        &self,
        entity: EntityId,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<bool, StoreError> {
        let key = Self::join_key(entity, name, category, marker);
        if self.tags.contains_key(&key)? {
            return Ok(false);
        }
        let back = JoinBack {
            name: name.to_string(),
            category: category.map(str::to_string),
            kind_marker: marker.to_string(),
        };
        self.tags.insert(&key, Vec::<u8>::new())?;
        self.tags.insert(
            Self::rjoin_key(entity, name, category, marker),
            Self::serialize(&back)?,
        )?;
        self.tags.flush()?;
        Ok(true)
    }

    /// Remove the join only; the shared tag row always survives. Returns
    /// whether a join existed.
    pub fn remove_join(
        &self,
        entity: EntityId,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<bool, StoreError> {
        let key = Self::join_key(entity, name, category, marker);
        let removed = self.tags.remove(&key)?.is_some();
        if removed {
            self.tags
                .remove(Self::rjoin_key(entity, name, category, marker))?;
            self.tags.flush()?;
        }
        Ok(removed)
    }

    pub fn has_join(
        &self,
        entity: EntityId,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<bool, StoreError> {
        let key = Self::join_key(entity, name, category, marker);
        Ok(self.tags.contains_key(&key)?)
    }

    /// Ids of every entity joined to `(name, category, marker)`, in id order.
    pub fn joined_entities(
        &self,
        name: &str,
        category: Option<&str>,
        marker: &str,
    ) -> Result<Vec<EntityId>, StoreError> {
        let prefix = Self::join_prefix(name, category, marker);
        let mut ids = Vec::new();
        for entry in self.tags.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(idx) = text.rfind(':') {
                if let Ok(id) = text[idx + 1..].parse::<EntityId>() {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Every tag join held by one entity.
    pub(crate) fn joins_for(&self, entity: EntityId) -> Result<Vec<JoinBack>, StoreError> {
        let prefix = Self::rjoin_prefix(entity);
        let mut joins = Vec::new();
        for entry in self.tags.scan_prefix(&prefix) {
            let (_, bytes) = entry?;
            joins.push(Self::deserialize::<JoinBack>(bytes)?);
        }
        Ok(joins)
    }

    /// Owner cascade: drop every join held by `entity`. Tag rows survive.
    pub fn remove_joins_for(&self, entity: EntityId) -> Result<usize, StoreError> {
        let joins = self.joins_for(entity)?;
        let mut removed = 0usize;
        for join in &joins {
            if self.remove_join(entity, &join.name, join.category.as_deref(), &join.kind_marker)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn tag_count(&self) -> usize {
        self.tags
            .scan_prefix(b"tag:")
            .filter(|entry| entry.is_ok())
            .count()
    }

    pub fn join_count(&self) -> usize {
        self.tags
            .scan_prefix(b"join:")
            .filter(|entry| entry.is_ok())
            .count()
    }

    /// Attribute values are validated against live records before a write;
    /// this is the existence + freshness half of that check.
    pub fn validate_ref(&self, value: &Value) -> Result<(), StoreError> {
        match value {
            Value::Ref(r) => {
                let record = self.get_entity(r.id).map_err(|err| match err {
                    StoreError::NotFound(_) => StoreError::Serialization(format!(
                        "reference to missing entity #{}",
                        r.id
                    )),
                    other => other,
                })?;
                if record.created_at != r.created_at {
                    return Err(StoreError::Serialization(format!(
                        "stale reference to entity #{}",
                        r.id
                    )));
                }
                Ok(())
            }
            Value::List(items) => items.iter().try_for_each(|v| self.validate_ref(v)),
            Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
                self.validate_ref(k)?;
                self.validate_ref(v)
            }),
            Value::Set(members) => members.iter().try_for_each(|v| self.validate_ref(v)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_backend() -> (WorldBackend, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let backend = WorldBackend::open(dir.path()).expect("backend");
        (backend, dir)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let (backend, _dir) = open_backend();
        let a = backend.allocate_id().expect("id");
        let b = backend.allocate_id().expect("id");
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        let record = EntityRecord::new(b, "ghost", "core.Entity");
        backend.put_entity(record).expect("put");
        backend.delete_entity(b).expect("delete");
        let c = backend.allocate_id().expect("id");
        assert_eq!(c, 3, "deleted ids must not come back");
    }

    #[test]
    fn entity_round_trip_and_partial_update() {
        let (backend, _dir) = open_backend();
        let id = backend.allocate_id().expect("id");
        let record = backend
            .put_entity(EntityRecord::new(id, "chest", "game.Chest"))
            .expect("put");
        let fetched = backend.get_entity(id).expect("get");
        assert_eq!(fetched, record);

        let patched = backend
            .update_entity(id, &EntityPatch::default().key("dusty chest"))
            .expect("patch");
        assert_eq!(patched.key, "dusty chest");
        assert_eq!(patched.kind_path, "game.Chest", "untouched fields survive");
    }

    #[test]
    fn missing_entity_is_not_found() {
        let (backend, _dir) = open_backend();
        let err = backend.get_entity(42).expect_err("should miss");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn no_category_is_distinct_from_empty_category() {
        let (backend, _dir) = open_backend();
        backend
            .put_attribute(AttributeRecord::new(1, "color", None, Value::text("red")))
            .expect("put");
        backend
            .put_attribute(AttributeRecord::new(
                1,
                "color",
                Some(""),
                Value::text("blue"),
            ))
            .expect("put");

        let none = backend.get_attribute(1, "color", None).expect("get");
        let empty = backend.get_attribute(1, "color", Some("")).expect("get");
        assert_eq!(none.map(|r| r.value), Some(Value::text("red")));
        assert_eq!(empty.map(|r| r.value), Some(Value::text("blue")));
    }

    #[test]
    fn category_with_separator_does_not_bleed_between_scopes() {
        let (backend, _dir) = open_backend();
        backend
            .put_attribute(AttributeRecord::new(
                1,
                "x",
                Some("a:b"),
                Value::Int(1),
            ))
            .expect("put");
        let miss = backend.get_attribute(1, "b:x", Some("a")).expect("get");
        assert!(miss.is_none());
        let hit = backend.get_attribute(1, "x", Some("a:b")).expect("get");
        assert_eq!(hit.map(|r| r.value), Some(Value::Int(1)));
    }

    #[test]
    fn attribute_cascade_removes_only_the_owner() {
        let (backend, _dir) = open_backend();
        backend
            .put_attribute(AttributeRecord::new(1, "a", None, Value::Int(1)))
            .expect("put");
        backend
            .put_attribute(AttributeRecord::new(1, "b", None, Value::Int(2)))
            .expect("put");
        backend
            .put_attribute(AttributeRecord::new(2, "a", None, Value::Int(3)))
            .expect("put");

        assert_eq!(backend.remove_attributes_for(1).expect("cascade"), 2);
        assert!(backend.attributes_for(1).expect("scan").is_empty());
        assert_eq!(backend.attributes_for(2).expect("scan").len(), 1);
    }

    #[test]
    fn joins_deduplicate_and_reverse_index_tracks_them() {
        let (backend, _dir) = open_backend();
        backend.ensure_tag("red", None, "tag").expect("tag");
        assert!(backend.add_join(1, "red", None, "tag").expect("join"));
        assert!(!backend.add_join(1, "red", None, "tag").expect("join"));
        assert!(backend.add_join(2, "red", None, "tag").expect("join"));

        assert_eq!(
            backend.joined_entities("red", None, "tag").expect("query"),
            vec![1, 2]
        );
        assert_eq!(backend.remove_joins_for(1).expect("cascade"), 1);
        assert_eq!(
            backend.joined_entities("red", None, "tag").expect("query"),
            vec![2]
        );
        assert!(
            backend.get_tag("red", None, "tag").expect("row").is_some(),
            "tag row survives join removal"
        );
    }

    #[test]
    fn stale_and_missing_refs_fail_validation() {
        let (backend, _dir) = open_backend();
        let id = backend.allocate_id().expect("id");
        let record = backend
            .put_entity(EntityRecord::new(id, "anchor", "core.Entity"))
            .expect("put");

        backend.validate_ref(&Value::Ref(record.to_ref())).expect("fresh ref");

        let mut stale = record.to_ref();
        stale.created_at = stale.created_at + chrono::Duration::seconds(5);
        assert!(matches!(
            backend.validate_ref(&Value::Ref(stale)),
            Err(StoreError::Serialization(_))
        ));

        let missing = crate::value::EntityRef {
            id: 9999,
            created_at: record.created_at,
        };
        assert!(matches!(
            backend.validate_ref(&Value::List(vec![Value::Ref(missing)])),
            Err(StoreError::Serialization(_))
        ));
    }
}
