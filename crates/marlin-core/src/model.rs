//! Shared model types for index builds: the durable record, its state
//! enum, and the request payload dispatched to workers.

use std::collections::HashMap;
use std::fmt;
use std::path::MAIN_SEPARATOR;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Durable (worker-visible) state of an index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Unissued,
    InProgress,
    Finished,
    Failed,
}

impl BuildState {
    /// Whether a worker has reported a terminal result for this build.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unissued => "unissued",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for BuildState {
    type Err = BuildStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unissued" => Ok(Self::Unissued),
            "in_progress" => Ok(Self::InProgress),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(BuildStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BuildState`] string.
#[derive(Debug, Clone)]
pub struct BuildStateParseError(pub String);

impl fmt::Display for BuildStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid build state: {:?}", self.0)
    }
}

impl std::error::Error for BuildStateParseError {}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// `node_id` value meaning "no worker currently assigned".
pub const UNASSIGNED_NODE: i64 = 0;

/// The durable record of an index build, owned by the meta store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Process-unique build identifier, assigned by the catalog.
    pub build_id: i64,
    pub state: BuildState,
    /// Worker currently assigned, or [`UNASSIGNED_NODE`].
    pub node_id: i64,
    /// Bumped by exactly one on every (re)assignment; workers stamp
    /// artifacts with it so stale results are ignorable.
    pub index_version: i64,
    /// Set by the catalog when the build is removed.
    pub mark_deleted: bool,
    /// The original submission, re-dispatched on every assignment.
    pub request: CreateIndexRequest,
}

impl IndexMeta {
    /// Whether a worker is currently recorded against this build.
    pub fn is_assigned(&self) -> bool {
        self.node_id != UNASSIGNED_NODE
    }
}

/// An index build request: stored durably at submission and sent to the
/// assigned worker with `version` and `meta_path` filled in at dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    pub build_id: i64,
    pub index_id: i64,
    pub index_name: String,
    /// Assignment version; stamped by the scheduler at dispatch.
    pub version: i64,
    /// Where the worker writes the index file catalog entry; stamped by
    /// the scheduler at dispatch.
    pub meta_path: String,
    /// Input segment data, one path per field binlog.
    pub data_paths: Vec<String>,
    /// Input segments covered by the build's reference lock.
    pub segment_ids: Vec<i64>,
    pub type_params: HashMap<String, String>,
    pub index_params: HashMap<String, String>,
}

/// Derive the meta path for a build: the fixed index-file prefix joined
/// to the decimal build id with the platform path separator.
pub fn meta_path(prefix: &str, build_id: i64) -> String {
    format!("{prefix}{MAIN_SEPARATOR}{build_id}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
