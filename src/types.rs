//! Persisted record types shared by the storage backend and the handles.
//!
//! Three logical tables back the whole layer: entity records, attribute rows,
//! and tag rows with their joins. Every record carries a `schema_version`
//! that is checked on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{EntityRef, Value};

pub const ENTITY_SCHEMA_VERSION: u8 = 1;
pub const ATTRIBUTE_SCHEMA_VERSION: u8 = 1;
pub const TAG_SCHEMA_VERSION: u8 = 1;

/// Numeric entity identity. Monotonically increasing, never reused, so a
/// stale reference is detectable instead of silently pointing at a later
/// entity.
pub type EntityId = u64;

/// Marker for plain tags.
pub const TAG_MARKER: &str = "tag";
/// Marker for alternate-name tags.
pub const ALIAS_MARKER: &str = "alias";
/// Marker for permission-flag tags.
pub const PERMISSION_MARKER: &str = "permission";

/// One persisted game object of some kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    /// Primary display name.
    pub key: String,
    /// Fully-qualified name of the behavioral kind to instantiate on load.
    pub kind_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<EntityRef>,
    #[serde(default)]
    pub home: Option<EntityRef>,
    pub schema_version: u8,
}

impl EntityRecord {
    pub fn new(id: EntityId, key: &str, kind_path: &str) -> Self {
        Self {
            id,
            key: key.to_string(),
            kind_path: kind_path.to_string(),
            created_at: Utc::now(),
            location: None,
            home: None,
            schema_version: ENTITY_SCHEMA_VERSION,
        }
    }

    pub fn with_location(mut self, location: Option<EntityRef>) -> Self {
        self.location = location;
        self
    }

    pub fn with_home(mut self, home: Option<EntityRef>) -> Self {
        self.home = home;
        self
    }

    /// Descriptor used when this entity is stored inside another value.
    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id,
            created_at: self.created_at,
        }
    }
}

/// A named, optionally-categorized value attached to one entity.
///
/// `(owner, name, category)` is unique. `category: None` is itself a valid
/// category (the explicit "no category" marker) and is encoded distinctly
/// from every named category in the tree key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeRecord {
    pub owner: EntityId,
    pub name: String,
    pub category: Option<String>,
    pub value: Value,
    /// Optional access rule evaluated by the injected lock evaluator.
    #[serde(default)]
    pub lock_string: Option<String>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl AttributeRecord {
    pub fn new(owner: EntityId, name: &str, category: Option<&str>, value: Value) -> Self {
        Self {
            owner,
            name: name.to_string(),
            category: category.map(str::to_string),
            value,
            lock_string: None,
            created_at: Utc::now(),
            schema_version: ATTRIBUTE_SCHEMA_VERSION,
        }
    }

    pub fn with_lock(mut self, lock_string: Option<&str>) -> Self {
        self.lock_string = lock_string.map(str::to_string);
        self
    }
}

/// A de-duplicated, shared label. Not owned by any entity; entities reference
/// tags through payload-free joins, and removing a join never deletes the
/// row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagRecord {
    pub name: String,
    pub category: Option<String>,
    /// Distinguishes plain tags from aliases and permission flags that share
    /// the same storage mechanism.
    pub kind_marker: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl TagRecord {
    pub fn new(name: &str, category: Option<&str>, kind_marker: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.map(str::to_string),
            kind_marker: kind_marker.to_string(),
            created_at: Utc::now(),
            schema_version: TAG_SCHEMA_VERSION,
        }
    }
}

/// Partial update for an entity record: only the supplied fields are written.
#[derive(Debug, Default, Clone)]
pub struct EntityPatch {
    pub key: Option<String>,
    pub location: Option<Option<EntityRef>>,
    pub home: Option<Option<EntityRef>>,
}

impl EntityPatch {
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn location(mut self, location: Option<EntityRef>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn home(mut self, home: Option<EntityRef>) -> Self {
        self.home = Some(home);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.location.is_none() && self.home.is_none()
    }
}

/// Kind-specific fields supplied at entity creation.
#[derive(Debug, Default, Clone)]
pub struct EntityFields {
    pub location: Option<EntityRef>,
    pub home: Option<EntityRef>,
}

/// In-memory lookup key for one attribute of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrKey {
    pub name: String,
    pub category: Option<String>,
}

impl AttrKey {
    pub fn new(name: &str, category: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            category: category.map(str::to_string),
        }
    }
}
