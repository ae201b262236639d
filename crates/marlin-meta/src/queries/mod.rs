//! Query functions over the meta store's tables.

pub mod builds;
