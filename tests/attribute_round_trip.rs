//! Integration tests for attribute storage: every supported value shape
//! survives a set/get round trip, categories are distinct buckets, and
//! custom aggregates travel through their `Storable` conversion.

use std::collections::{BTreeMap, BTreeSet};

use mudstore::{StoreError, Storable, Value, WorldStore};
use tempfile::tempdir;

fn deep_sample(anchor: mudstore::EntityRef) -> Value {
    // Three levels: map -> list -> set / map, with a reference mixed in.
    let mut inner_map = BTreeMap::new();
    inner_map.insert(Value::text("hp"), Value::Int(40));
    inner_map.insert(Value::text("keeper"), Value::Ref(anchor));

    let mut members = BTreeSet::new();
    members.insert(Value::Int(1));
    members.insert(Value::text("one"));
    members.insert(Value::List(vec![Value::Bool(true), Value::Null]));

    let mut root = BTreeMap::new();
    root.insert(
        Value::text("slots"),
        Value::List(vec![
            Value::Map(inner_map),
            Value::Set(members),
            Value::Float(2.5),
        ]),
    );
    root.insert(Value::Int(7), Value::text("numeric key"));
    Value::Map(root)
}

#[test]
fn scalar_shapes_round_trip() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "holder").unwrap();

    let cases = vec![
        ("null", Value::Null),
        ("flag", Value::Bool(true)),
        ("count", Value::Int(-42)),
        ("ratio", Value::Float(0.125)),
        ("label", Value::text("brass lantern")),
    ];
    for (name, value) in cases {
        entity.attr_set(name, value.clone()).unwrap();
        let fetched = entity.attr_get(name).unwrap().unwrap().detach().unwrap();
        assert_eq!(fetched, value, "round trip for {}", name);
    }
}

#[test]
fn nested_containers_round_trip_three_levels_deep() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "holder").unwrap();
    let anchor = store.create_entity("core.Entity", "keeper").unwrap();

    let sample = deep_sample(anchor.to_ref());
    entity.attr_set("inventory", sample.clone()).unwrap();

    let fetched = entity
        .attr_get("inventory")
        .unwrap()
        .unwrap()
        .detach()
        .unwrap();
    assert_eq!(fetched, sample);

    // And again from cold storage.
    store.evict_all();
    let reloaded = store.load_entity(entity.id()).unwrap();
    let fetched = reloaded
        .attr_get("inventory")
        .unwrap()
        .unwrap()
        .detach()
        .unwrap();
    assert_eq!(fetched, sample);
}

#[test]
fn categories_are_distinct_buckets() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "painted").unwrap();

    entity.attr_set("color", "red").unwrap();
    entity
        .attr_set_with("color", "blue", Some("trim"), None, None)
        .unwrap();
    entity
        .attr_set_with("color", "green", Some(""), None, None)
        .unwrap();

    let plain = entity.attr_get("color").unwrap().unwrap().detach().unwrap();
    let trim = entity
        .attr_get_with("color", Some("trim"), None)
        .unwrap()
        .unwrap()
        .detach()
        .unwrap();
    let empty = entity
        .attr_get_with("color", Some(""), None)
        .unwrap()
        .unwrap()
        .detach()
        .unwrap();
    assert_eq!(plain, Value::text("red"));
    assert_eq!(trim, Value::text("blue"));
    assert_eq!(empty, Value::text("green"), "empty string is a named category");

    let no_category = entity.attr_all(None).unwrap();
    assert_eq!(no_category.len(), 1);
    let everything = entity.attr_all_any().unwrap();
    assert_eq!(everything.len(), 3);
}

#[test]
fn attr_get_or_supplies_caller_default() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "plain").unwrap();

    assert_eq!(
        entity.attr_get_or("charge", 100i64).unwrap(),
        Value::Int(100)
    );
    entity.attr_set("charge", 7i64).unwrap();
    assert_eq!(entity.attr_get_or("charge", 100i64).unwrap(), Value::Int(7));
}

#[test]
fn removing_a_missing_attribute_is_a_hard_error() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "bare").unwrap();

    assert!(matches!(
        entity.attr_remove("never_set"),
        Err(StoreError::NotFound(_))
    ));

    entity.attr_set("once", 1i64).unwrap();
    entity.attr_remove("once").unwrap();
    assert!(entity.attr_get("once").unwrap().is_none());
}

#[test]
fn references_to_missing_entities_cannot_be_written() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let holder = store.create_entity("core.Entity", "holder").unwrap();
    let target = store.create_entity("core.Entity", "target").unwrap();
    let stale = target.to_ref();
    target.delete().unwrap();

    let err = holder
        .attr_set("friend", Value::Ref(stale.clone()))
        .expect_err("deleted target");
    assert!(matches!(err, StoreError::Serialization(_)));

    // Nested occurrences are caught by the same walk.
    let err = holder
        .attr_set("friends", Value::List(vec![Value::Ref(stale)]))
        .expect_err("deleted target in list");
    assert!(matches!(err, StoreError::Serialization(_)));
    assert!(holder.attr_get("friends").unwrap().is_none(), "no partial row");
}

#[test]
fn live_references_resolve_and_stale_stamps_are_rejected() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let holder = store.create_entity("core.Entity", "holder").unwrap();
    let room = store.create_entity("core.Entity", "hall").unwrap();

    holder.attr_set("inside", Value::Ref(room.to_ref())).unwrap();
    let fetched = holder.attr_get("inside").unwrap().unwrap().detach().unwrap();
    let reference = match fetched {
        Value::Ref(r) => r,
        other => panic!("expected ref, got {:?}", other),
    };
    let resolved = store.resolve_ref(&reference).unwrap();
    assert_eq!(resolved, room);

    let mut forged = reference.clone();
    forged.created_at = forged.created_at + chrono::Duration::seconds(1);
    assert!(matches!(
        store.resolve_ref(&forged),
        Err(StoreError::Serialization(_))
    ));
}

/// A custom aggregate with an embedded entity reference that plain container
/// iteration could not see; the `Storable` pair keeps it visible.
#[derive(Debug, PartialEq)]
struct Wardrobe {
    label: String,
    linked_room: mudstore::EntityRef,
}

impl Storable for Wardrobe {
    fn to_stored(&self) -> Result<Value, StoreError> {
        let mut entries = BTreeMap::new();
        entries.insert(Value::text("label"), Value::text(self.label.clone()));
        entries.insert(Value::text("linked_room"), Value::Ref(self.linked_room.clone()));
        Ok(Value::Map(entries))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        let entries = value
            .as_map()
            .ok_or_else(|| StoreError::Serialization("expected map".to_string()))?;
        let label = entries
            .get(&Value::text("label"))
            .and_then(Value::as_text)
            .ok_or_else(|| StoreError::Serialization("missing label".to_string()))?;
        let linked_room = entries
            .get(&Value::text("linked_room"))
            .and_then(Value::as_ref_value)
            .ok_or_else(|| StoreError::Serialization("missing linked_room".to_string()))?;
        Ok(Self {
            label: label.to_string(),
            linked_room: linked_room.clone(),
        })
    }
}

#[test]
fn storable_aggregates_round_trip_with_their_references() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let owner = store.create_entity("core.Entity", "bedroom").unwrap();
    let narnia = store.create_entity("core.Entity", "narnia").unwrap();

    let wardrobe = Wardrobe {
        label: "oak wardrobe".to_string(),
        linked_room: narnia.to_ref(),
    };
    owner.attr_set_obj("wardrobe", &wardrobe).unwrap();

    let back: Wardrobe = owner.attr_get_obj("wardrobe").unwrap().unwrap();
    assert_eq!(back, wardrobe);
    assert_eq!(store.resolve_ref(&back.linked_room).unwrap(), narnia);
}
