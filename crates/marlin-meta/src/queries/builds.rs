//! Database query functions for the `index_builds` table.
//!
//! Updates with a state precondition use optimistic locking: the WHERE
//! clause carries the expected current state and callers get an error
//! when no row matched.

use anyhow::{Context, Result};
use sqlx::PgPool;

use marlin_core::model::{BuildState, CreateIndexRequest, IndexMeta};

use crate::models::IndexBuildRow;

/// Insert a new build record from a catalog submission. The record
/// starts `unissued`, unassigned, at version 0.
pub async fn insert_build(pool: &PgPool, request: &CreateIndexRequest) -> Result<IndexMeta> {
    let payload = serde_json::to_value(request).context("failed to serialize build request")?;
    let row = sqlx::query_as::<_, IndexBuildRow>(
        "INSERT INTO index_builds (build_id, request) VALUES ($1, $2) RETURNING *",
    )
    .bind(request.build_id)
    .bind(payload)
    .fetch_one(pool)
    .await
    .context("failed to insert build")?;

    row.into_meta()
}

/// Fetch a single build record by id.
pub async fn get_build(pool: &PgPool, build_id: i64) -> Result<Option<IndexMeta>> {
    let row = sqlx::query_as::<_, IndexBuildRow>("SELECT * FROM index_builds WHERE build_id = $1")
        .bind(build_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch build")?;

    row.map(IndexBuildRow::into_meta).transpose()
}

/// List every build record, ordered by build id.
pub async fn get_all_builds(pool: &PgPool) -> Result<Vec<IndexMeta>> {
    let rows =
        sqlx::query_as::<_, IndexBuildRow>("SELECT * FROM index_builds ORDER BY build_id ASC")
            .fetch_all(pool)
            .await
            .context("failed to list builds")?;

    rows.into_iter().map(IndexBuildRow::into_meta).collect()
}

/// List the builds currently assigned to a node, ordered by build id.
pub async fn get_builds_by_node(pool: &PgPool, node_id: i64) -> Result<Vec<IndexMeta>> {
    let rows = sqlx::query_as::<_, IndexBuildRow>(
        "SELECT * FROM index_builds WHERE node_id = $1 ORDER BY build_id ASC",
    )
    .bind(node_id)
    .fetch_all(pool)
    .await
    .context("failed to list builds by node")?;

    rows.into_iter().map(IndexBuildRow::into_meta).collect()
}

/// Record an assignment: bump the version and set the target node in one
/// atomic statement.
pub async fn update_version(pool: &PgPool, build_id: i64, node_id: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE index_builds \
         SET index_version = index_version + 1, node_id = $1, updated_at = NOW() \
         WHERE build_id = $2",
    )
    .bind(node_id)
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to update build version")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("build {build_id} not found");
    }

    Ok(())
}

/// Move a build to `in_progress` after the assigned worker accepted it.
///
/// Optimistically locked on the current state being `unissued`.
pub async fn build_index(pool: &PgPool, build_id: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE index_builds \
         SET state = 'in_progress', updated_at = NOW() \
         WHERE build_id = $1 AND state = 'unissued'",
    )
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to move build to in_progress")?;

    if result.rows_affected() == 0 {
        // Either the build does not exist or the state did not match.
        let build = get_build(pool, build_id).await?;
        match build {
            None => anyhow::bail!("build {build_id} not found"),
            Some(b) => anyhow::bail!(
                "optimistic lock failed: build {build_id} has state {}, expected unissued",
                b.state
            ),
        }
    }

    Ok(())
}

/// Record a worker's report of the build's durable state.
pub async fn update_state(pool: &PgPool, build_id: i64, state: BuildState) -> Result<()> {
    let result = sqlx::query(
        "UPDATE index_builds SET state = $1, updated_at = NOW() WHERE build_id = $2",
    )
    .bind(state.to_string())
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to update build state")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("build {build_id} not found");
    }

    Ok(())
}

/// Clear the assignment and return the build to `unissued` so it is
/// eligible for a fresh attempt. The version is kept: it only ever moves
/// forward, at assignment time.
pub async fn reset_meta(pool: &PgPool, build_id: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE index_builds \
         SET state = 'unissued', node_id = 0, updated_at = NOW() \
         WHERE build_id = $1",
    )
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to reset build")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("build {build_id} not found");
    }

    Ok(())
}

/// Clear the assigned node without touching the state, after the build's
/// segment lock has been released.
pub async fn reset_node_id(pool: &PgPool, build_id: i64) -> Result<()> {
    let result =
        sqlx::query("UPDATE index_builds SET node_id = 0, updated_at = NOW() WHERE build_id = $1")
            .bind(build_id)
            .execute(pool)
            .await
            .context("failed to reset assigned node")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("build {build_id} not found");
    }

    Ok(())
}

/// Mark a build as removed by the catalog. The scheduler releases its
/// lock on the next pass; the row itself stays until [`remove_build`].
pub async fn mark_deleted(pool: &PgPool, build_id: i64) -> Result<()> {
    let result = sqlx::query(
        "UPDATE index_builds SET mark_deleted = TRUE, updated_at = NOW() WHERE build_id = $1",
    )
    .bind(build_id)
    .execute(pool)
    .await
    .context("failed to mark build deleted")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("build {build_id} not found");
    }

    Ok(())
}

/// Remove a finalized build record. Idempotent: removing an absent row
/// succeeds and reports `false`.
pub async fn remove_build(pool: &PgPool, build_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM index_builds WHERE build_id = $1")
        .bind(build_id)
        .execute(pool)
        .await
        .context("failed to remove build")?;

    Ok(result.rows_affected() > 0)
}
