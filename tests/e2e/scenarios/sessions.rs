//! Session login, validation, invalidation and expiry cleanup.

use crate::harness::assertions::assert_kind;
use crate::harness::TestWorkspace;
use entitydb_core::{
    authenticate, session_cleanup_task, EntityRepository, ErrorKind, MaintenanceScheduler,
    SessionStore, Sha256PasswordHasher,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn validate_then_invalidate() {
    let ws = TestWorkspace::new().unwrap();
    let sessions = ws.sessions();
    let user = ws.create_user("carol", &["rbac:perm:entity:view"]).unwrap();

    let session = sessions.create(&user, "192.0.2.1", "e2e-agent").unwrap();
    let token = session.get_tag_value("token");
    assert!(session.has_tag("session:active"));

    let validated = sessions.validate(&token).unwrap();
    assert_eq!(validated.id, user.id);

    sessions.invalidate(&token).unwrap();
    let err = assert_kind(sessions.validate(&token), ErrorKind::Unauthorized);
    assert!(matches!(
        err,
        entitydb_core::EntityDbError::SessionInvalidated
    ));
}

#[test]
fn login_flow_against_bootstrap_admin() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let hasher = Arc::new(Sha256PasswordHasher::new(
        ws.security().password_hash_cost,
    ));

    let admin = authenticate(store.as_ref(), hasher.clone(), "admin", "admin").unwrap();
    assert_eq!(admin.id, ws.admin);

    assert_kind(
        authenticate(store.as_ref(), hasher.clone(), "admin", "wrong"),
        ErrorKind::Unauthorized,
    );
    assert_kind(
        authenticate(store.as_ref(), hasher, "ghost", "admin"),
        ErrorKind::Unauthorized,
    );

    // Authenticated admin gets a session and the round trip works.
    let sessions = ws.sessions();
    let session = sessions.create(&admin, "::1", "cli").unwrap();
    let validated = sessions.validate(&session.get_tag_value("token")).unwrap();
    assert_eq!(validated.id, ws.admin);
}

#[test]
fn refresh_extends_expiry() {
    let ws = TestWorkspace::new().unwrap();
    let sessions = ws.sessions();
    let user = ws.create_user("dave", &[]).unwrap();

    let session = sessions.create(&user, "::1", "agent").unwrap();
    let token = session.get_tag_value("token");
    let old_expires = session.get_tag_value("expires");

    let refreshed = sessions.refresh(&token).unwrap();
    assert_ne!(refreshed.get_tag_value("expires"), old_expires);
    assert_eq!(refreshed.get_tags_by_namespace("expires").len(), 1);
    sessions.validate(&token).unwrap();
}

#[test]
fn cleanup_task_purges_expired_sessions() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let user = ws.create_user("erin", &[]).unwrap();

    let short = SessionStore::new(ws.store()).with_ttl(Duration::ZERO);
    let long = Arc::new(SessionStore::new(ws.store()));

    short.create(&user, "::1", "a").unwrap();
    let live = long.create(&user, "::1", "b").unwrap();

    let mut scheduler = MaintenanceScheduler::new();
    scheduler.spawn(
        "session-cleanup",
        Duration::from_millis(10),
        session_cleanup_task(Arc::clone(&long)),
    );
    std::thread::sleep(Duration::from_millis(80));
    scheduler.shutdown();

    let remaining = store.list_by_tag("type:session").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, live.id);
}
