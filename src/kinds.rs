//! Kind registry and declarative class-level defaults.
//!
//! A kind definition declares, once at registration time, which attributes
//! its instances have by default and which tags they carry. Reads of an
//! undeclared-or-unmaterialized attribute fall back to the declared default
//! without creating a row; at scale most instances never diverge from their
//! kind's defaults, and skipping those rows is the dominant cost saving of
//! the whole layer.
//!
//! Writes always materialize a real row, even when the written value equals
//! the declared default. That is deliberate: it keeps the write path simple,
//! and `attr_reset` exists precisely to delete the materialized row so reads
//! fall back to the declared default again. A plain write of the default
//! value is not a reset, because the row it leaves behind shadows any later
//! change to the kind's declaration.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};

use crate::value::Value;

/// Kind every unresolvable `kind_path` degrades to.
pub const BASE_KIND_PATH: &str = "core.Entity";

/// One declared attribute default: `(name, category)` falls back to `value`
/// until an instance materializes a row.
#[derive(Debug, Clone)]
pub struct AttrDefault {
    pub name: String,
    pub category: Option<String>,
    pub value: Value,
}

/// A tag every instance of the kind carries. Materialized as a real join at
/// creation so tag queries see kind members without special-casing.
#[derive(Debug, Clone)]
pub struct KindTag {
    pub name: String,
    pub category: Option<String>,
}

/// Immutable description of one entity kind, built once at registration.
#[derive(Debug)]
pub struct KindSpec {
    path: String,
    attr_defaults: Vec<AttrDefault>,
    kind_tags: Vec<KindTag>,
}

impl KindSpec {
    pub fn builder(path: impl Into<String>) -> KindSpecBuilder {
        KindSpecBuilder {
            path: path.into(),
            attr_defaults: Vec::new(),
            kind_tags: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Declared default for `(name, category)`, if any.
    pub fn attr_default(&self, name: &str, category: Option<&str>) -> Option<&Value> {
        self.attr_defaults
            .iter()
            .find(|d| d.name == name && d.category.as_deref() == category)
            .map(|d| &d.value)
    }

    pub fn attr_defaults(&self) -> &[AttrDefault] {
        &self.attr_defaults
    }

    pub fn kind_tags(&self) -> &[KindTag] {
        &self.kind_tags
    }
}

/// Builder for [`KindSpec`]. Evaluated once; the resulting table is what the
/// generic get/set path consults, so there is no per-instance interception.
pub struct KindSpecBuilder {
    path: String,
    attr_defaults: Vec<AttrDefault>,
    kind_tags: Vec<KindTag>,
}

impl KindSpecBuilder {
    /// Declare an uncategorized attribute default.
    pub fn attr(self, name: &str, default: impl Into<Value>) -> Self {
        self.attr_in(name, None, default)
    }

    /// Declare an attribute default under a category.
    pub fn attr_in(
        mut self,
        name: &str,
        category: Option<&str>,
        default: impl Into<Value>,
    ) -> Self {
        self.attr_defaults.push(AttrDefault {
            name: name.to_string(),
            category: category.map(str::to_string),
            value: default.into(),
        });
        self
    }

    /// Declare an uncategorized kind tag.
    pub fn tag(self, name: &str) -> Self {
        self.tag_in(name, None)
    }

    /// Declare a kind tag under a category.
    pub fn tag_in(mut self, name: &str, category: Option<&str>) -> Self {
        self.kind_tags.push(KindTag {
            name: name.to_string(),
            category: category.map(str::to_string),
        });
        self
    }

    pub fn build(self) -> KindSpec {
        KindSpec {
            path: self.path,
            attr_defaults: self.attr_defaults,
            kind_tags: self.kind_tags,
        }
    }
}

/// Maps `kind_path` strings to registered kind specs.
///
/// Resolution never fails hard: a record whose `kind_path` no longer exists
/// (renamed or removed between deployments) loads as the base kind with a
/// warning, so old worlds stay loadable.
pub struct KindRegistry {
    kinds: RwLock<HashMap<String, Arc<KindSpec>>>,
    base: Arc<KindSpec>,
}

impl KindRegistry {
    pub fn new() -> Self {
        let base = Arc::new(KindSpec::builder(BASE_KIND_PATH).build());
        let mut kinds = HashMap::new();
        kinds.insert(BASE_KIND_PATH.to_string(), base.clone());
        Self {
            kinds: RwLock::new(kinds),
            base,
        }
    }

    /// Register (or replace) a kind spec. Returns the shared handle used by
    /// instances.
    pub fn register(&self, spec: KindSpec) -> Arc<KindSpec> {
        let spec = Arc::new(spec);
        let mut kinds = self
            .kinds
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!("registered kind {}", spec.path());
        kinds.insert(spec.path().to_string(), spec.clone());
        spec
    }

    pub fn get(&self, path: &str) -> Option<Arc<KindSpec>> {
        let kinds = self.kinds.read().unwrap_or_else(PoisonError::into_inner);
        kinds.get(path).cloned()
    }

    pub fn base(&self) -> Arc<KindSpec> {
        self.base.clone()
    }

    /// Resolve `path`, degrading to the base kind when unknown.
    pub fn resolve_or_base(&self, path: &str) -> Arc<KindSpec> {
        match self.get(path) {
            Some(spec) => spec,
            None => {
                warn!(
                    "unknown kind path {:?}; falling back to {}",
                    path, BASE_KIND_PATH
                );
                self.base()
            }
        }
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_records_defaults_and_tags() {
        let spec = KindSpec::builder("game.Chest")
            .attr("capacity", 10i64)
            .attr_in("paint", Some("appearance"), "oak")
            .tag("container")
            .build();

        assert_eq!(spec.path(), "game.Chest");
        assert_eq!(
            spec.attr_default("capacity", None),
            Some(&Value::Int(10))
        );
        assert_eq!(
            spec.attr_default("paint", Some("appearance")),
            Some(&Value::text("oak"))
        );
        assert_eq!(spec.attr_default("paint", None), None);
        assert_eq!(spec.kind_tags().len(), 1);
    }

    #[test]
    fn unknown_paths_fall_back_to_base() {
        let registry = KindRegistry::new();
        let spec = registry.resolve_or_base("game.Vanished");
        assert_eq!(spec.path(), BASE_KIND_PATH);

        registry.register(KindSpec::builder("game.Chest").build());
        let spec = registry.resolve_or_base("game.Chest");
        assert_eq!(spec.path(), "game.Chest");
    }
}
