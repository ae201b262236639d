//! The `MetaStore` trait -- the seam to the durable index build records.
//!
//! The meta store is the source of truth: the scheduler's in-memory table
//! is only a cache used to decide what to do next, and every mutation
//! below must be atomic and durable before it returns.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::IndexMeta;

/// Durable storage for index build records.
///
/// # Object Safety
///
/// This trait is object-safe so the builder loop can hold it as
/// `Arc<dyn MetaStore>`.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Load every build record, including finalized and deleted ones.
    async fn get_all_index_meta(&self) -> Result<Vec<IndexMeta>>;

    /// Load a single build record, `None` when no record exists.
    async fn get_meta(&self, build_id: i64) -> Result<Option<IndexMeta>>;

    /// Load all build records currently assigned to a node.
    async fn get_metas_by_node_id(&self, node_id: i64) -> Result<Vec<IndexMeta>>;

    /// Increment the build's version and record the target node, in one
    /// atomic step.
    async fn update_version(&self, build_id: i64, node_id: i64) -> Result<()>;

    /// Move the durable state to `InProgress` after the assigned worker
    /// accepted the build.
    async fn build_index(&self, build_id: i64) -> Result<()>;

    /// Clear the assignment and return the durable state to `Unissued`,
    /// making the build eligible for a fresh attempt.
    async fn reset_meta(&self, build_id: i64) -> Result<()>;

    /// Clear the assigned node without touching state, after the build's
    /// segment lock has been released.
    async fn reset_node_id(&self, build_id: i64) -> Result<()>;
}

// Compile-time assertion: MetaStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn MetaStore) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    /// A store with no records, used only to prove the trait can be
    /// implemented and used as `dyn MetaStore`.
    struct EmptyStore;

    #[async_trait]
    impl MetaStore for EmptyStore {
        async fn get_all_index_meta(&self) -> Result<Vec<IndexMeta>> {
            Ok(vec![])
        }

        async fn get_meta(&self, _build_id: i64) -> Result<Option<IndexMeta>> {
            Ok(None)
        }

        async fn get_metas_by_node_id(&self, _node_id: i64) -> Result<Vec<IndexMeta>> {
            Ok(vec![])
        }

        async fn update_version(&self, build_id: i64, _node_id: i64) -> Result<()> {
            anyhow::bail!("no record for build {build_id}")
        }

        async fn build_index(&self, build_id: i64) -> Result<()> {
            anyhow::bail!("no record for build {build_id}")
        }

        async fn reset_meta(&self, build_id: i64) -> Result<()> {
            anyhow::bail!("no record for build {build_id}")
        }

        async fn reset_node_id(&self, build_id: i64) -> Result<()> {
            anyhow::bail!("no record for build {build_id}")
        }
    }

    #[tokio::test]
    async fn empty_store_as_trait_object() {
        let store: Box<dyn MetaStore> = Box::new(EmptyStore);
        assert!(store.get_all_index_meta().await.unwrap().is_empty());
        assert!(store.get_meta(1).await.unwrap().is_none());
        assert!(store.update_version(1, 2).await.is_err());
    }
}
