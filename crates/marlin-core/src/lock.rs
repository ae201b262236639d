//! The segment reference-lock seam: a cross-service pin that keeps a
//! build's input segments from being compacted or dropped mid-build.

use anyhow::Result;
use async_trait::async_trait;

/// Remote segment reference-lock service.
///
/// Both operations are idempotent with respect to the
/// `(build_id, node_id)` pair: acquiring a pair that is already held and
/// releasing a pair that was never acquired both succeed.
#[async_trait]
pub trait SegmentLockService: Send + Sync {
    /// Pin the given segments on behalf of `(build_id, node_id)`.
    async fn acquire_segment_ref_lock(
        &self,
        build_id: i64,
        node_id: i64,
        segment_ids: &[i64],
    ) -> Result<()>;

    /// Release the pin held for `(build_id, node_id)`.
    async fn release_segment_ref_lock(&self, build_id: i64, node_id: i64) -> Result<()>;
}

// Compile-time assertion: SegmentLockService must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn SegmentLockService) {}
};
