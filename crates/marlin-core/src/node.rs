//! Worker-node seams: the node manager that places builds and the client
//! handle used to dispatch them.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{CreateIndexRequest, IndexMeta};

/// Client handle to a single index worker.
///
/// `create_index` signals only that the worker accepted the build; the
/// terminal result arrives later through the meta store and
/// `IndexBuilder::update_state_by_meta`.
#[async_trait]
pub trait IndexWorker: Send + Sync {
    async fn create_index(&self, request: CreateIndexRequest) -> Result<()>;
}

/// Tracks live workers and picks one for a new build.
#[async_trait]
pub trait NodeManager: Send + Sync {
    /// Pick a currently-available worker for the build, using placement
    /// criteria opaque to the scheduler. `None` when every worker is busy
    /// or absent; the scheduler retries on a later pass.
    async fn peek_client(&self, meta: &IndexMeta) -> Option<(i64, Arc<dyn IndexWorker>)>;

    /// The ids of workers currently considered alive, consumed by the
    /// scheduler's startup refresh.
    async fn live_node_ids(&self) -> Vec<i64>;
}

// Compile-time assertions: both seams must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn NodeManager, _: &dyn IndexWorker) {}
};
