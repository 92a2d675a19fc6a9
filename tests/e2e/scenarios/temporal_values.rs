//! Temporal latest-value semantics and point-in-time reconstruction.

use crate::harness::assertions::assert_tag_value;
use crate::harness::TestWorkspace;
use entitydb_core::{now_nanos, ChangeKind, EntityRepository};

#[test]
fn temporal_latest_value_and_as_of() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();

    let id = ws.create_entity("document", &[]).unwrap();
    let t0 = now_nanos();

    let mut entity = store.get_by_id(id).unwrap();
    entity.add_tag_at("status:draft", t0);
    entity.add_tag_at("status:published", t0 + 1_000_000_000);
    store.update(entity).unwrap();

    // Now: the latest value wins.
    let latest = store.get_by_id(id).unwrap();
    assert_tag_value(&latest, "status", "published");

    // Half a second in: only the draft exists.
    let snapshot = store.get_entity_as_of(id, t0 + 500_000_000).unwrap();
    assert_tag_value(&snapshot, "status", "draft");
    let clean = snapshot.get_tags_without_timestamp();
    assert!(clean.contains(&"status:draft".to_string()));
    assert!(!clean.contains(&"status:published".to_string()));
}

#[test]
fn history_and_diff_follow_the_tag_timeline() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();

    let id = ws.create_entity("document", &[]).unwrap();
    let t0 = now_nanos();

    let mut entity = store.get_by_id(id).unwrap();
    entity.add_tag_at("status:draft", t0);
    entity.add_tag_at("owner:alice", t0 + 10);
    entity.add_tag_at("status:published", t0 + 20);
    store.update(entity).unwrap();

    let history = store.get_entity_history(id, 50).unwrap();
    assert!(history
        .windows(2)
        .all(|w| w[0].timestamp >= w[1].timestamp));
    assert!(history.iter().any(|c| c.kind == ChangeKind::Modified
        && c.old_value.as_deref() == Some("draft")
        && c.new_value.as_deref() == Some("published")));

    let (before, after, changes) = store.get_entity_diff(id, t0 + 5, t0 + 25).unwrap();
    assert_tag_value(&before, "status", "draft");
    assert_tag_value(&after, "status", "published");
    assert!(changes.iter().any(|c| c.kind == ChangeKind::Added
        && c.new_value.as_deref() == Some("alice")));

    // The recent-changes feed sees this entity too.
    let recent = store.get_recent_changes(100).unwrap();
    assert!(recent.iter().any(|c| c.entity_id == id));
}

#[test]
fn data_survives_reopen() {
    let mut ws = TestWorkspace::new().unwrap();
    let id = ws
        .create_entity("document", &["status:published"])
        .unwrap();

    ws.reopen().unwrap();
    let store = ws.store();

    let entity = store.get_by_id(id).unwrap();
    assert_tag_value(&entity, "status", "published");
    assert_eq!(store.list_by_tag("status:published").unwrap().len(), 1);
}
