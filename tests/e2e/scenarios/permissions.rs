//! Wildcard permission matching on real user entities.

use crate::harness::assertions::assert_kind;
use crate::harness::TestWorkspace;
use entitydb_core::{check_permission, is_allowed, ErrorKind, EntityRepository};

#[test]
fn resource_wildcard_grants_only_that_resource() {
    let ws = TestWorkspace::new().unwrap();
    let user = ws.create_user("alice", &["rbac:perm:entity:*"]).unwrap();

    assert!(is_allowed(Some(&user), "entity:create"));
    assert!(is_allowed(Some(&user), "entity:delete"));
    assert!(!is_allowed(Some(&user), "user:create"));

    let err = assert_kind(
        check_permission(Some(&user), "user:create"),
        ErrorKind::Unauthorized,
    );
    assert!(err.to_string().contains("rbac:perm:user:create"));
}

#[test]
fn bootstrap_admin_has_admin_role() {
    let ws = TestWorkspace::new().unwrap();
    let admin = ws.admin_entity().unwrap();

    assert!(is_allowed(Some(&admin), "entity:create"));
    assert!(is_allowed(Some(&admin), "user:delete"));
}

#[test]
fn permission_check_follows_tag_mutations() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let user = ws.create_user("bob", &[]).unwrap();

    assert!(!is_allowed(Some(&user), "entity:view"));

    store
        .add_tag(user.id, "rbac:perm:entity:view")
        .unwrap();
    let reloaded = store.get_by_id(user.id).unwrap();
    assert!(is_allowed(Some(&reloaded), "entity:view"));
    assert!(!is_allowed(Some(&reloaded), "entity:create"));

    store
        .remove_tag(user.id, "rbac:perm:entity:view")
        .unwrap();
    let reloaded = store.get_by_id(user.id).unwrap();
    assert!(!is_allowed(Some(&reloaded), "entity:view"));
}

#[test]
fn missing_user_fails_closed() {
    assert!(!is_allowed(None, "entity:view"));
}
