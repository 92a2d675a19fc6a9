use entitydb_core::{Entity, EntityDbError, EntityId, ErrorKind};
use std::collections::BTreeSet;

/// The id set of a listing, for order-insensitive comparison.
pub fn ids_of(entities: &[Entity]) -> BTreeSet<EntityId> {
    entities.iter().map(|e| e.id).collect()
}

/// Asserts an error is of the given taxonomy kind.
pub fn assert_kind<T: std::fmt::Debug>(
    result: Result<T, EntityDbError>,
    kind: ErrorKind,
) -> EntityDbError {
    match result {
        Ok(value) => panic!("expected {kind:?} error, got Ok({value:?})"),
        Err(err) => {
            assert_eq!(err.kind(), kind, "unexpected error kind for: {err}");
            err
        }
    }
}

/// Asserts an entity's latest value in a namespace.
pub fn assert_tag_value(entity: &Entity, namespace: &str, expected: &str) {
    let actual = entity.get_tag_value(namespace);
    assert_eq!(
        actual, expected,
        "entity {} namespace {namespace}: expected {expected:?}, got {actual:?}",
        entity.id
    );
}
