use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use marlin_core::model::{BuildState, CreateIndexRequest, IndexMeta};

/// A row of the `index_builds` table.
///
/// The durable state is stored as text and the original submission as
/// JSONB; [`into_meta`](Self::into_meta) converts into the scheduler's
/// record type.
#[derive(Debug, Clone, FromRow)]
pub struct IndexBuildRow {
    pub build_id: i64,
    pub state: String,
    pub node_id: i64,
    pub index_version: i64,
    pub mark_deleted: bool,
    pub request: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexBuildRow {
    /// Convert the row into the scheduler-facing record.
    pub fn into_meta(self) -> Result<IndexMeta> {
        let state: BuildState = self
            .state
            .parse()
            .with_context(|| format!("build {} has an invalid stored state", self.build_id))?;
        let request: CreateIndexRequest = serde_json::from_value(self.request)
            .with_context(|| format!("build {} has an invalid stored request", self.build_id))?;
        Ok(IndexMeta {
            build_id: self.build_id,
            state,
            node_id: self.node_id,
            index_version: self.index_version,
            mark_deleted: self.mark_deleted,
            request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: &str, request: serde_json::Value) -> IndexBuildRow {
        IndexBuildRow {
            build_id: 7,
            state: state.to_owned(),
            node_id: 1,
            index_version: 2,
            mark_deleted: false,
            request,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_into_meta() {
        let request = serde_json::to_value(CreateIndexRequest {
            build_id: 7,
            index_name: "idx".to_owned(),
            ..Default::default()
        })
        .unwrap();
        let meta = row("in_progress", request).into_meta().unwrap();
        assert_eq!(meta.build_id, 7);
        assert_eq!(meta.state, BuildState::InProgress);
        assert_eq!(meta.request.index_name, "idx");
    }

    #[test]
    fn invalid_state_is_rejected() {
        let request = serde_json::to_value(CreateIndexRequest::default()).unwrap();
        let result = row("exploded", request).into_meta();
        assert!(result.is_err());
    }
}
