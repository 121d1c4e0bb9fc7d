use crate::{Chunk, PersistenceError};
use async_trait::async_trait;

/// Push-style delivery target for a scan. Only `on_next` is required; the
/// lifecycle callbacks default to no-ops so callers that only care about the
/// data itself don't need to implement anything else.
///
/// Exactly one of `completed`, `stopped`, `on_error` is invoked per scan,
/// after zero or more calls to `on_next`.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Called once before the first `on_next`, with the scan's starting
    /// index or position.
    async fn on_start(&self, _start: i64) {}

    /// Called once per delivered chunk. Returning `false` stops the scan
    /// early (`stopped` is then called instead of `completed`).
    async fn on_next(&self, chunk: Chunk) -> bool;

    /// Called once the scan has delivered every matching chunk.
    async fn completed(&self, _last: i64) {}

    /// Called once if `on_next` returned `false`.
    async fn stopped(&self, _last: i64) {}

    /// Called once if the backend failed while fetching chunks. The scan
    /// method itself still returns `Ok(())` after this callback; only
    /// cancellation propagates as an `Err` from the scan method.
    async fn on_error(&self, _last: i64, _err: &PersistenceError) {}
}
