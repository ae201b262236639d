//! Postgres-backed meta store for the marlin index coordinator.
//!
//! Persists one row per index build and implements the scheduler's
//! `MetaStore` seam over it, plus the catalog- and worker-facing
//! mutations (submission, terminal reports, deletion marks, cleanup).

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;
