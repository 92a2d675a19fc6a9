//! The full lifecycle chain through the repository.

use crate::harness::assertions::{assert_kind, ids_of};
use crate::harness::TestWorkspace;
use entitydb_core::{
    archive, current_state, purge, recovery_history, soft_delete, EntityRepository, ErrorKind,
    LifecycleState,
};

#[test]
fn lifecycle_chain_with_rejections() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let id = ws.create_entity("document", &[]).unwrap();

    // Soft-delete.
    let mut entity = store.get_by_id(id).unwrap();
    soft_delete(&mut entity, ws.admin, "cleanup", None).unwrap();
    store.update(entity).unwrap();
    let entity = store.get_by_id(id).unwrap();
    assert_eq!(current_state(&entity), LifecycleState::SoftDeleted);

    // A second soft-delete is rejected and mutates nothing.
    let mut again = store.get_by_id(id).unwrap();
    let tags_before = again.tags.clone();
    assert_kind(
        soft_delete(&mut again, ws.admin, "again", None),
        ErrorKind::Validation,
    );
    assert_eq!(again.tags, tags_before);

    // Archive, then purge.
    let mut entity = store.get_by_id(id).unwrap();
    archive(&mut entity, ws.admin, "cold", None).unwrap();
    store.update(entity).unwrap();
    assert_eq!(
        current_state(&store.get_by_id(id).unwrap()),
        LifecycleState::Archived
    );

    let mut entity = store.get_by_id(id).unwrap();
    purge(&mut entity, ws.admin, "final", None).unwrap();
    store.update(entity).unwrap();
    let purged = store.get_by_id(id).unwrap();
    assert_eq!(current_state(&purged), LifecycleState::Purged);

    // Purged is terminal.
    let mut dead = purged.clone();
    assert_kind(
        soft_delete(&mut dead, ws.admin, "nope", None),
        ErrorKind::Validation,
    );

    // History records every hop in order.
    let history = recovery_history(&purged);
    let hops: Vec<(String, String)> = history
        .iter()
        .map(|r| (r.from.clone(), r.to.clone()))
        .collect();
    assert_eq!(
        hops,
        vec![
            ("active".to_string(), "soft_deleted".to_string()),
            ("soft_deleted".to_string(), "archived".to_string()),
            ("archived".to_string(), "purged".to_string()),
        ]
    );
}

#[test]
fn lifecycle_listings_partition_entities() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();

    let active_id = ws.create_entity("document", &[]).unwrap();
    let deleted_id = ws.create_entity("document", &[]).unwrap();

    let mut entity = store.get_by_id(deleted_id).unwrap();
    soft_delete(&mut entity, ws.admin, "tidy", None).unwrap();
    store.update(entity).unwrap();

    let active = store.list_active().unwrap();
    assert!(ids_of(&active).contains(&active_id));
    assert!(!ids_of(&active).contains(&deleted_id));

    let deleted = store.list_soft_deleted().unwrap();
    assert_eq!(ids_of(&deleted).len(), 1);
    assert!(ids_of(&deleted).contains(&deleted_id));

    assert!(store.list_archived().unwrap().is_empty());
    assert_eq!(
        ids_of(&store
            .list_by_lifecycle_state(LifecycleState::SoftDeleted)
            .unwrap()),
        ids_of(&deleted)
    );
}
