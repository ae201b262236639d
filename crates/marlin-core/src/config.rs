//! Scheduler configuration.
//!
//! Reads from `MARLIN_*` environment variables, falling back to compiled
//! defaults when unset.

use std::env;
use std::time::Duration;

/// Configuration for the builder loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between driver passes when no wake arrives.
    pub schedule_interval: Duration,
    /// Initial capacity hint for the in-memory task table.
    pub task_capacity: usize,
    /// Prefix under which workers write index file catalog entries.
    pub index_file_prefix: String,
}

impl SchedulerConfig {
    pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(3);
    pub const DEFAULT_TASK_CAPACITY: usize = 1024;
    pub const DEFAULT_INDEX_FILE_PREFIX: &str = "indexes";

    /// Build a config from the environment.
    ///
    /// Recognised variables: `MARLIN_SCHEDULE_INTERVAL_SECS`,
    /// `MARLIN_TASK_CAPACITY`, `MARLIN_INDEX_FILE_PREFIX`. Unset or
    /// unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let schedule_interval = env::var("MARLIN_SCHEDULE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_SCHEDULE_INTERVAL);
        let task_capacity = env::var("MARLIN_TASK_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(Self::DEFAULT_TASK_CAPACITY);
        let index_file_prefix = env::var("MARLIN_INDEX_FILE_PREFIX")
            .unwrap_or_else(|_| Self::DEFAULT_INDEX_FILE_PREFIX.to_owned());
        Self {
            schedule_interval,
            task_capacity,
            index_file_prefix,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Self::DEFAULT_SCHEDULE_INTERVAL,
            task_capacity: Self::DEFAULT_TASK_CAPACITY,
            index_file_prefix: Self::DEFAULT_INDEX_FILE_PREFIX.to_owned(),
        }
    }
}
