//! # Mudstore - Persistence for Multiplayer Text-Game Worlds
//!
//! Mudstore is the persistence and identity-cache layer underneath a
//! multiplayer text-game server. It maps long-lived, arbitrarily-typed game
//! entities (players, rooms, items, timers) onto a sled-backed store while
//! guaranteeing exactly one live, mutable, in-memory representative per
//! stored entity for the lifetime of the process.
//!
//! ## Features
//!
//! - **Stable Schema**: One entity table serves every kind; new kinds never
//!   need migrations because per-kind state lives in generic attribute rows.
//! - **Identity Cache**: Every lookup for an id returns the same shared
//!   instance, so mutations through one handle are visible through all.
//! - **Typed Attribute Values**: A closed tagged value type covers scalars,
//!   lists, maps, sets, and entity references, nested arbitrarily, with
//!   stale references rejected instead of silently resolving wrong.
//! - **Write-Through Containers**: Reading a stored container yields a live
//!   proxy; in-place mutations persist immediately and aliases share state.
//! - **De-duplicated Tags**: Shared label rows with payload-free joins back
//!   cheap membership queries, aliasing, and permission flags.
//! - **Declarative Kind Defaults**: Kinds declare attribute defaults that
//!   cost zero rows until an instance diverges from them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mudstore::{KindSpec, Value, WorldStore};
//!
//! fn main() -> Result<(), mudstore::StoreError> {
//!     let store = WorldStore::open("data/world")?;
//!     store.register_kind(
//!         KindSpec::builder("game.Chest")
//!             .attr("capacity", 10i64)
//!             .tag("container")
//!             .build(),
//!     );
//!
//!     let chest = store.create_entity("game.Chest", "dusty chest")?;
//!     chest.attr_set("contents", Value::List(vec![Value::Int(1), Value::Int(2)]))?;
//!     chest.tag_add("locked")?;
//!
//!     let same = store.load_entity(chest.id())?;
//!     assert_eq!(same.key(), "dusty chest");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - Store facade, entity lifecycle, and handles
//! - [`cache`] - Identity cache guaranteeing one live instance per id
//! - [`backend`] - Sled-backed record storage (the only schema-level writer)
//! - [`value`] - Stored value model and the `Storable` conversion trait
//! - [`attributes`] - Generic name+category value rows with lock evaluation
//! - [`containers`] - Write-through proxies for stored lists, maps, and sets
//! - [`tags`] - Shared label rows and membership queries
//! - [`kinds`] - Kind registry and declarative class-level defaults
//! - [`locks`] - Access-control seam for attribute lock strings
//! - [`config`] - TOML configuration for the operator CLI
//!
//! ## What This Layer Is Not
//!
//! Mudstore implements no game rules, offers no multi-process consistency,
//! and provides no cross-row transactions beyond sled's per-row atomicity.
//! Session transport, command parsing, and lock-string semantics belong to
//! the surrounding engine; the lock evaluator is injected as an opaque
//! predicate through [`WorldStoreBuilder`].

pub mod attributes;
pub mod backend;
pub mod cache;
pub mod config;
pub mod containers;
pub mod errors;
pub mod kinds;
pub mod locks;
pub mod tags;
pub mod types;
pub mod value;
pub mod world;

pub use backend::WorldBackend;
pub use cache::IdentityCache;
pub use containers::{AttrValue, ListProxy, MapProxy, SetProxy};
pub use errors::StoreError;
pub use kinds::{AttrDefault, KindRegistry, KindSpec, KindSpecBuilder, KindTag, BASE_KIND_PATH};
pub use locks::{basic_evaluator, AccessKind, LockEvaluator};
pub use types::{
    AttributeRecord, EntityFields, EntityId, EntityPatch, EntityRecord, TagRecord, ALIAS_MARKER,
    PERMISSION_MARKER, TAG_MARKER,
};
pub use value::{EntityRef, Storable, Value};
pub use world::{Entity, EntityHandle, StoreStats, WorldStore, WorldStoreBuilder};
