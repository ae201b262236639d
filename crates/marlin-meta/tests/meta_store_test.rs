//! Tests driving `PgMetaStore` through the scheduler's `MetaStore` seam,
//! covering the durable side of a full build lifecycle.

use std::sync::Arc;

use marlin_core::model::{BuildState, CreateIndexRequest, UNASSIGNED_NODE};
use marlin_core::store::MetaStore;
use marlin_meta::store::PgMetaStore;

use marlin_test_utils::{create_test_db, drop_test_db};

fn test_request(build_id: i64) -> CreateIndexRequest {
    CreateIndexRequest {
        build_id,
        index_id: 500 + build_id,
        index_name: format!("idx-{build_id}"),
        segment_ids: vec![100 + build_id],
        ..Default::default()
    }
}

#[tokio::test]
async fn full_durable_lifecycle_through_the_seam() {
    let (pool, db_name) = create_test_db().await;
    let store = PgMetaStore::new(pool.clone());

    store.insert_build(&test_request(7)).await.expect("insert");
    let seam: Arc<dyn MetaStore> = Arc::new(store.clone());

    // Assignment: version bump + node in one step.
    seam.update_version(7, 1).await.expect("assign");
    let meta = seam.get_meta(7).await.expect("get").expect("exists");
    assert_eq!(meta.index_version, 1);
    assert_eq!(meta.node_id, 1);
    assert_eq!(meta.state, BuildState::Unissued);

    // Worker accepted.
    seam.build_index(7).await.expect("build_index");
    let meta = seam.get_meta(7).await.unwrap().unwrap();
    assert_eq!(meta.state, BuildState::InProgress);

    // Worker reports success; the scheduler clears the assignment after
    // releasing the lock.
    store
        .update_state(7, BuildState::Finished)
        .await
        .expect("report");
    seam.reset_node_id(7).await.expect("clear node");
    let meta = seam.get_meta(7).await.unwrap().unwrap();
    assert_eq!(meta.state, BuildState::Finished);
    assert_eq!(meta.node_id, UNASSIGNED_NODE);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_cycle_through_the_seam() {
    let (pool, db_name) = create_test_db().await;
    let store = PgMetaStore::new(pool.clone());

    store.insert_build(&test_request(9)).await.expect("insert");
    let seam: Arc<dyn MetaStore> = Arc::new(store);

    seam.update_version(9, 1).await.expect("first assign");
    seam.build_index(9).await.expect("build_index");

    // The worker died: the scheduler resets and reassigns.
    seam.reset_meta(9).await.expect("reset");
    let meta = seam.get_meta(9).await.unwrap().unwrap();
    assert_eq!(meta.state, BuildState::Unissued);
    assert_eq!(meta.node_id, UNASSIGNED_NODE);

    seam.update_version(9, 2).await.expect("second assign");
    let meta = seam.get_meta(9).await.unwrap().unwrap();
    assert_eq!(meta.index_version, 2, "reassignment bumps the version again");
    assert_eq!(meta.node_id, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn node_lookup_through_the_seam() {
    let (pool, db_name) = create_test_db().await;
    let store = PgMetaStore::new(pool.clone());

    for build_id in [1, 2, 3] {
        store
            .insert_build(&test_request(build_id))
            .await
            .expect("insert");
    }
    let seam: Arc<dyn MetaStore> = Arc::new(store);
    seam.update_version(1, 5).await.expect("assign");
    seam.update_version(3, 5).await.expect("assign");

    let on_node = seam.get_metas_by_node_id(5).await.expect("by node");
    let ids: Vec<i64> = on_node.iter().map(|m| m.build_id).collect();
    assert_eq!(ids, vec![1, 3]);

    let all = seam.get_all_index_meta().await.expect("all");
    assert_eq!(all.len(), 3);

    pool.close().await;
    drop_test_db(&db_name).await;
}
