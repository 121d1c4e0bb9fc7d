use crate::{Chunk, Result, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `index == AUTO_ASSIGN_INDEX` on append means "use the assigned position
/// as the index".
pub const AUTO_ASSIGN_INDEX: i64 = -1;
/// Sentinel meaning "no upper bound" for an upper index/position bound.
pub const UNBOUNDED_UPPER: i64 = i64::MAX;
/// Sentinel meaning "no lower bound" for a lower index bound.
pub const UNBOUNDED_LOWER: i64 = i64::MIN;
/// Sentinel meaning "no limit" on the number of chunks a scan delivers.
pub const UNBOUNDED_LIMIT: i64 = i64::MAX;

/// The persistence contract every backend (in-memory, relational, ...)
/// implements identically. `readForwardAsync`/`readBackwardAsync`/`readAllAsync`
/// push matching chunks to `subscription` rather than returning a `Vec`, so
/// that cancellation, early-stop, and delivery errors are all part of one
/// consistent lifecycle (see [`Subscription`]).
#[async_trait]
pub trait PersistenceEngine: Send + Sync {
    /// Prepares storage (creates a table if missing, for relational
    /// backends). No-op for backends with no schema to prepare.
    async fn init(&self) -> Result<()>;

    /// Wipes all persisted state. Intended for tests and ops tooling, not
    /// production traffic.
    async fn destroy_all(&self) -> Result<()>;

    /// Appends a chunk to `partition_id`. Returns the written chunk, or
    /// `None` when `operation_id` already exists on this partition (an
    /// idempotent no-op, not an error).
    async fn append(
        &self,
        partition_id: &str,
        index: i64,
        payload: Value,
        operation_id: Option<String>,
    ) -> Result<Option<Chunk>>;

    /// Scans `partition_id` in ascending index order over
    /// `[from_lower_idx_incl, to_upper_idx_incl]`, delivering at most
    /// `limit` chunks to `subscription`.
    async fn read_forward(
        &self,
        partition_id: &str,
        from_lower_idx_incl: i64,
        to_upper_idx_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()>;

    /// Scans `partition_id` in descending index order over
    /// `[to_lower_idx_incl, from_upper_idx_incl]`, delivering at most
    /// `limit` chunks to `subscription`.
    async fn read_backward(
        &self,
        partition_id: &str,
        from_upper_idx_incl: i64,
        to_lower_idx_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()>;

    /// Returns the chunk with the largest index `<= from_upper_idx_incl` in
    /// `partition_id`, or `None` if no such chunk exists.
    async fn read_single_backward(
        &self,
        partition_id: &str,
        from_upper_idx_incl: i64,
    ) -> Result<Option<Chunk>>;

    /// Scans the global log in ascending position order starting at
    /// `from_position_incl`, delivering at most `limit` chunks.
    async fn read_all(
        &self,
        from_position_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()>;

    /// The highest position currently persisted, or `0` if the log is empty.
    async fn read_last_position(&self) -> Result<i64>;

    /// Removes every chunk in `partition_id` with index in
    /// `[from_lower_idx_incl, to_upper_idx_incl]`. Fails with
    /// `StreamDelete` when the partition doesn't exist or nothing matched.
    async fn delete(
        &self,
        partition_id: &str,
        from_lower_idx_incl: i64,
        to_upper_idx_incl: i64,
    ) -> Result<()>;

    /// Deletes a single index. Convenience wrapper over [`Self::delete`].
    async fn delete_index(&self, partition_id: &str, index: i64) -> Result<()> {
        self.delete(partition_id, index, index).await
    }

    /// Deletes every chunk in the partition. Convenience wrapper over
    /// [`Self::delete`].
    async fn delete_partition(&self, partition_id: &str) -> Result<()> {
        self.delete(partition_id, UNBOUNDED_LOWER, UNBOUNDED_UPPER)
            .await
    }
}
