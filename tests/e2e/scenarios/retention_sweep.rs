//! Retention policies driving lifecycle transitions on a mock clock.

use crate::harness::{MockClock, TestWorkspace};
use entitydb_core::{
    current_state, AgeBasis, Condition, EntityRepository, LifecycleState, Policy,
    RetentionEngine, Rule, Selector,
};

fn temp_cleanup_policy() -> Policy {
    Policy {
        name: "temp-file-cleanup".into(),
        enabled: true,
        priority: 10,
        selector: Selector {
            types: vec!["temp".into()],
            ..Selector::default()
        },
        rules: vec![Rule {
            from_state: "active".into(),
            to_state: "soft_deleted".into(),
            condition: Condition::Age {
                duration: "24h".into(),
                basis: AgeBasis::CreatedAt,
            },
            reason: "temp entity expired".into(),
            enabled: true,
        }],
        audit: true,
    }
}

#[test]
fn day_old_temp_entities_are_soft_deleted() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let clock = MockClock::new();

    let temp_id = ws.create_entity("temp", &[]).unwrap();
    let doc_id = ws.create_entity("document", &[]).unwrap();

    let engine = RetentionEngine::new(vec![temp_cleanup_policy()], ws.system)
        .with_time_provider(clock.as_provider());

    // Not old enough yet: nothing moves.
    let report = engine.evaluate(store.as_ref()).unwrap();
    assert!(report.transitions.is_empty());

    // 24h + 1s later the temp entity goes, the document stays.
    clock.advance_hours(24);
    clock.advance_secs(1);
    let report = engine.evaluate(store.as_ref()).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].entity_id, temp_id);

    let moved = store.get_by_id(temp_id).unwrap();
    assert_eq!(current_state(&moved), LifecycleState::SoftDeleted);
    assert_eq!(moved.get_tag_value("delete_reason"), "temp entity expired");
    assert_eq!(moved.get_tag_value("deletion_policy"), "temp-file-cleanup");
    assert!(moved.has_tag("transition:active->soft_deleted"));

    assert_eq!(
        current_state(&store.get_by_id(doc_id).unwrap()),
        LifecycleState::Active
    );
}

#[test]
fn priorities_and_state_age_chain_transitions() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let clock = MockClock::new();

    let id = ws.create_entity("temp", &[]).unwrap();

    let archive_policy = Policy {
        name: "archive-deleted".into(),
        enabled: true,
        priority: 20,
        selector: Selector::default(),
        rules: vec![Rule {
            from_state: "soft_deleted".into(),
            to_state: "archived".into(),
            condition: Condition::StateAge {
                duration: "24h".into(),
            },
            reason: "tombstone aged out".into(),
            enabled: true,
        }],
        audit: true,
    };

    let engine = RetentionEngine::new(
        vec![archive_policy, temp_cleanup_policy()],
        ws.system,
    )
    .with_time_provider(clock.as_provider());

    // First sweep (day 1): delete only.
    clock.advance_hours(25);
    let report = engine.evaluate(store.as_ref()).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, LifecycleState::SoftDeleted);

    // Second sweep (day 2): the tombstone has aged, archive it.
    clock.advance_hours(25);
    let report = engine.evaluate(store.as_ref()).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, LifecycleState::Archived);

    assert_eq!(
        current_state(&store.get_by_id(id).unwrap()),
        LifecycleState::Archived
    );
}

#[test]
fn disabled_policies_and_rules_are_inert() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    let clock = MockClock::new();

    ws.create_entity("temp", &[]).unwrap();
    clock.advance_hours(48);

    let mut disabled_policy = temp_cleanup_policy();
    disabled_policy.enabled = false;
    let mut disabled_rule = temp_cleanup_policy();
    disabled_rule.rules[0].enabled = false;

    let engine = RetentionEngine::new(vec![disabled_policy, disabled_rule], ws.system)
        .with_time_provider(clock.as_provider());
    let report = engine.evaluate(store.as_ref()).unwrap();
    assert!(report.transitions.is_empty());
}
