//! `PgMetaStore`: the scheduler's `MetaStore` seam over Postgres.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use marlin_core::model::{BuildState, CreateIndexRequest, IndexMeta};
use marlin_core::store::MetaStore;

use crate::queries::builds;

/// Postgres-backed meta store.
///
/// Every trait method maps to a single statement, so each mutation is
/// atomic and durable before it returns -- the property the builder loop
/// relies on.
#[derive(Debug, Clone)]
pub struct PgMetaStore {
    pool: PgPool,
}

impl PgMetaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Catalog submission: create the durable record for a new build.
    pub async fn insert_build(&self, request: &CreateIndexRequest) -> Result<IndexMeta> {
        builds::insert_build(&self.pool, request).await
    }

    /// Worker report: record the build's new durable state.
    pub async fn update_state(&self, build_id: i64, state: BuildState) -> Result<()> {
        builds::update_state(&self.pool, build_id, state).await
    }

    /// Catalog deletion: flag the record; the scheduler tears the build
    /// down on its next pass.
    pub async fn mark_deleted(&self, build_id: i64) -> Result<()> {
        builds::mark_deleted(&self.pool, build_id).await
    }

    /// Catalog cleanup: drop a finalized record.
    pub async fn remove_build(&self, build_id: i64) -> Result<bool> {
        builds::remove_build(&self.pool, build_id).await
    }
}

#[async_trait]
impl MetaStore for PgMetaStore {
    async fn get_all_index_meta(&self) -> Result<Vec<IndexMeta>> {
        builds::get_all_builds(&self.pool).await
    }

    async fn get_meta(&self, build_id: i64) -> Result<Option<IndexMeta>> {
        builds::get_build(&self.pool, build_id).await
    }

    async fn get_metas_by_node_id(&self, node_id: i64) -> Result<Vec<IndexMeta>> {
        builds::get_builds_by_node(&self.pool, node_id).await
    }

    async fn update_version(&self, build_id: i64, node_id: i64) -> Result<()> {
        builds::update_version(&self.pool, build_id, node_id).await
    }

    async fn build_index(&self, build_id: i64) -> Result<()> {
        builds::build_index(&self.pool, build_id).await
    }

    async fn reset_meta(&self, build_id: i64) -> Result<()> {
        builds::reset_meta(&self.pool, build_id).await
    }

    async fn reset_node_id(&self, build_id: i64) -> Result<()> {
        builds::reset_node_id(&self.pool, build_id).await
    }
}
