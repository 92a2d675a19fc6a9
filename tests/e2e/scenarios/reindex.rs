//! Index rebuild equivalence and health verification.

use crate::harness::assertions::ids_of;
use crate::harness::TestWorkspace;
use entitydb_core::{EntityRepository, FilterOp, IndexHealth, SortDirection};

#[test]
fn queries_are_identical_before_and_after_reindex() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();

    for i in 0..20 {
        ws.create_entity(
            "document",
            &[
                &format!("bucket:{}", i % 4),
                if i % 2 == 0 {
                    "status:published"
                } else {
                    "status:draft"
                },
            ],
        )
        .unwrap();
    }

    let probes = |store: &dyn EntityRepository| {
        let by_tag = ids_of(&store.list_by_tag("bucket:2").unwrap());
        let by_both = ids_of(
            &store
                .list_by_tags(&["bucket:2", "status:published"], true)
                .unwrap(),
        );
        let by_glob = ids_of(&store.list_by_tag_wildcard("status:*").unwrap());
        let by_sql = ids_of(&store.list_by_tag_sql("bucket:%").unwrap());
        let by_ns = ids_of(&store.list_by_namespace("status").unwrap());
        let by_query = ids_of(
            &store
                .search(
                    &store
                        .query()
                        .has_tag("status:published")
                        .add_filter("tag:bucket", FilterOp::In, "0, 2")
                        .order_by("id", SortDirection::Asc),
                )
                .unwrap(),
        );
        (by_tag, by_both, by_glob, by_sql, by_ns, by_query)
    };

    let before = probes(store.as_ref());
    store.reindex_tags().unwrap();
    let after = probes(store.as_ref());

    assert_eq!(before, after);
    assert!(matches!(
        store.verify_index_health().unwrap(),
        IndexHealth::Ok
    ));
}

#[test]
fn maintenance_capabilities_are_discoverable() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();
    ws.create_entity("document", &[]).unwrap();

    let ops = store
        .maintenance_ops()
        .expect("the redb store advertises maintenance capabilities");
    ops.flush().unwrap();
    ops.sync().unwrap();
    ops.checkpoint("pre-upgrade").unwrap();
}

#[test]
fn transactions_apply_atomically_across_reindex() {
    let ws = TestWorkspace::new().unwrap();
    let store = ws.store();

    let keep = ws.create_entity("document", &[]).unwrap();
    let gone = ws.create_entity("document", &[]).unwrap();

    store
        .transaction(&mut |batch| {
            let mut entity = store.get_by_id(keep)?;
            entity.add_tag("status:kept");
            batch.update(entity);
            batch.delete(gone);
            Ok(())
        })
        .unwrap();

    assert!(store.get_by_id(gone).is_err());
    assert_eq!(ids_of(&store.list_by_tag("status:kept").unwrap()).len(), 1);

    store.reindex_tags().unwrap();
    assert!(matches!(
        store.verify_index_health().unwrap(),
        IndexHealth::Ok
    ));
    assert!(store.list_by_tag("type:document").unwrap().len() == 1);
}
