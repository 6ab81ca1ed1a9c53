//! Integration tests for tag storage: shared rows, payload-free joins, and
//! marker separation for aliases and permission flags.

use mudstore::{StoreError, WorldStore};
use tempfile::tempdir;

#[test]
fn one_row_many_joins() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let e1 = store.create_entity("core.Entity", "apple").unwrap();
    let e2 = store.create_entity("core.Entity", "wagon").unwrap();

    assert!(e1.tag_add("red").unwrap());
    assert!(e2.tag_add("red").unwrap());
    assert!(!e1.tag_add("red").unwrap(), "re-tagging is idempotent");

    let stats = store.stats();
    assert_eq!(stats.tags, 1, "one shared row for (red, none, tag)");
    assert_eq!(stats.joins, 2);

    let tagged = store.query_by_tag("red").unwrap();
    assert_eq!(tagged.len(), 2);
    assert!(tagged.contains(&e1));
    assert!(tagged.contains(&e2));
}

#[test]
fn removing_a_join_leaves_the_shared_row() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let e1 = store.create_entity("core.Entity", "apple").unwrap();
    let e2 = store.create_entity("core.Entity", "wagon").unwrap();
    e1.tag_add("red").unwrap();
    e2.tag_add("red").unwrap();

    e1.tag_remove("red").unwrap();

    let stats = store.stats();
    assert_eq!(stats.tags, 1, "the row is reusable, never deleted");
    assert_eq!(stats.joins, 1);
    assert!(!e1.tag_has("red").unwrap());

    let tagged = store.query_by_tag("red").unwrap();
    assert_eq!(tagged, vec![e2]);
}

#[test]
fn removing_an_absent_join_is_a_hard_error() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "plain").unwrap();

    assert!(matches!(
        entity.tag_remove("never_added"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn categories_scope_tag_rows() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "door").unwrap();

    entity.tag_add_with("north", Some("exits"), "tag").unwrap();
    assert!(entity.tag_has_with("north", Some("exits"), "tag").unwrap());
    assert!(!entity.tag_has("north").unwrap(), "no-category is a different row");

    assert!(store.query_by_tag("north").unwrap().is_empty());
    assert_eq!(
        store
            .query_by_tag_with("north", Some("exits"), "tag")
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn markers_keep_aliases_and_permissions_separate() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let guard = store.create_entity("core.Entity", "guard").unwrap();

    guard.tag_add("watcher").unwrap();
    guard.alias_add("watcher").unwrap();
    guard.permission_add("watcher").unwrap();

    let stats = store.stats();
    assert_eq!(stats.tags, 3, "same name, three markers, three rows");

    assert!(guard.tag_has("watcher").unwrap());
    assert!(guard.alias_has("watcher").unwrap());
    assert!(guard.permission_has("watcher").unwrap());

    guard.alias_remove("watcher").unwrap();
    assert!(!guard.alias_has("watcher").unwrap());
    assert!(guard.tag_has("watcher").unwrap(), "plain tag untouched");

    assert_eq!(guard.permissions().unwrap(), vec!["watcher".to_string()]);
    assert!(guard.aliases().unwrap().is_empty());

    // Plain-tag queries do not see alias or permission rows.
    let plain = store.query_by_tag("watcher").unwrap();
    assert_eq!(plain.len(), 1);
}

#[test]
fn tag_listing_reports_all_triples() {
    let tmp = tempdir().unwrap();
    let store = WorldStore::open(tmp.path()).unwrap();
    let entity = store.create_entity("core.Entity", "npc").unwrap();

    entity.tag_add("vendor").unwrap();
    entity.tag_add_with("stall", Some("market"), "tag").unwrap();
    entity.alias_add("shopkeep").unwrap();

    let mut tags = entity.tags().unwrap();
    tags.sort();
    assert_eq!(tags.len(), 3);
    assert!(tags.contains(&("vendor".to_string(), None, "tag".to_string())));
    assert!(tags.contains(&(
        "stall".to_string(),
        Some("market".to_string()),
        "tag".to_string()
    )));
    assert!(tags.contains(&("shopkeep".to_string(), None, "alias".to_string())));
}
