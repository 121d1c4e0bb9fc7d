use crate::{Chunk, PersistenceError, Result, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::PersistenceEngine;

/// Reserved partition id used to hold hole-avoidance filler chunks. A
/// position allocated to an append that later fails on a duplicate index is
/// still recorded here, so the global log stays gap-free.
pub const EMPTY_PARTITION_ID: &str = "::empty";

/// Optional artificial latency injector, used by tests that exercise
/// cancellation and concurrent-scan behavior.
#[async_trait]
pub trait NetworkSimulator: Send + Sync {
    async fn delay(&self);
}

#[derive(Default)]
struct PartitionState {
    /// Ascending by index.
    chunks: Vec<Chunk>,
    operation_ids: std::collections::HashSet<String>,
}

#[derive(Default)]
struct Inner {
    /// Ascending by position, across all partitions.
    chunks: Vec<Chunk>,
    partitions: HashMap<String, PartitionState>,
    next_position: i64,
}

/// The reference persistence engine. Authoritative for the observable
/// behavior every other backend must match: append ordering, idempotency,
/// and the `"::empty"` hole-avoidance rule described in [`EMPTY_PARTITION_ID`].
pub struct InMemoryEngine {
    inner: Mutex<Inner>,
    clone_fn: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
    network_simulator: Option<Arc<dyn NetworkSimulator>>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                chunks: Vec::new(),
                partitions: HashMap::new(),
                next_position: 1,
            }),
            clone_fn: None,
            network_simulator: None,
        }
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a hook invoked on every stored payload, so callers and the
    /// store never end up aliasing the same mutable value. Without this,
    /// payloads are shared by (cloned, but logically identical) value.
    pub fn with_clone_fn(mut self, clone_fn: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.clone_fn = Some(Arc::new(clone_fn));
        self
    }

    /// Installs an artificial latency source, exercised by each delivery
    /// and by append.
    pub fn with_network_simulator(mut self, simulator: Arc<dyn NetworkSimulator>) -> Self {
        self.network_simulator = Some(simulator);
        self
    }

    async fn simulate_delay(&self) {
        if let Some(sim) = &self.network_simulator {
            sim.delay().await;
        }
    }

    fn clone_payload(&self, payload: &Value) -> Value {
        match &self.clone_fn {
            Some(f) => f(payload),
            None => payload.clone(),
        }
    }

    /// Shared delivery loop for all three scan operations. `marker_of`
    /// extracts the value (index or position) reported to the subscription's
    /// lifecycle callbacks.
    async fn deliver(
        &self,
        chunks: Vec<Chunk>,
        start: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
        marker_of: impl Fn(&Chunk) -> i64,
    ) -> Result<()> {
        subscription.on_start(start).await;
        let mut last = start;

        for chunk in chunks {
            if cancellation.is_cancelled() {
                return Err(PersistenceError::Cancellation);
            }
            self.simulate_delay().await;

            last = marker_of(&chunk);
            if !subscription.on_next(chunk).await {
                subscription.stopped(last).await;
                return Ok(());
            }
        }

        subscription.completed(last).await;
        Ok(())
    }
}

fn take_n(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

#[async_trait]
impl PersistenceEngine for InMemoryEngine {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn destroy_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("in-memory engine mutex poisoned");
        inner.chunks.clear();
        inner.partitions.clear();
        inner.next_position = 1;
        Ok(())
    }

    async fn append(
        &self,
        partition_id: &str,
        index: i64,
        payload: Value,
        operation_id: Option<String>,
    ) -> Result<Option<Chunk>> {
        self.simulate_delay().await;
        let operation_id = operation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut inner = self.inner.lock().expect("in-memory engine mutex poisoned");

        if inner
            .partitions
            .get(partition_id)
            .is_some_and(|p| p.operation_ids.contains(&operation_id))
        {
            tracing::debug!(partition_id, %operation_id, "append is idempotent no-op");
            return Ok(None);
        }

        let position = inner.next_position;
        inner.next_position += 1;
        let actual_index = if index < 0 { position } else { index };
        let stored_payload = self.clone_payload(&payload);

        let chunk = Chunk {
            position,
            partition_id: partition_id.to_string(),
            index: actual_index,
            payload: stored_payload,
            operation_id: operation_id.clone(),
            deleted: false,
        };

        let is_duplicate_index = {
            let partition = inner
                .partitions
                .entry(partition_id.to_string())
                .or_default();
            partition
                .chunks
                .binary_search_by_key(&actual_index, |c| c.index)
                .is_ok()
        };

        if is_duplicate_index {
            let filler = Chunk {
                position,
                partition_id: EMPTY_PARTITION_ID.to_string(),
                index: position,
                payload: Value::Null,
                operation_id: position.to_string(),
                deleted: false,
            };
            let empty = inner
                .partitions
                .entry(EMPTY_PARTITION_ID.to_string())
                .or_default();
            empty.chunks.push(filler.clone());
            empty.operation_ids.insert(filler.operation_id.clone());
            inner.chunks.push(filler);

            tracing::warn!(
                partition_id,
                index = actual_index,
                "duplicate stream index on append"
            );
            return Err(PersistenceError::DuplicateStreamIndex {
                partition_id: partition_id.to_string(),
                index: actual_index,
            });
        }

        let partition = inner.partitions.get_mut(partition_id).expect("just inserted");
        let insert_at = partition
            .chunks
            .binary_search_by_key(&actual_index, |c| c.index)
            .unwrap_err();
        partition.chunks.insert(insert_at, chunk.clone());
        partition.operation_ids.insert(operation_id);
        inner.chunks.push(chunk.clone());

        tracing::debug!(
            partition_id,
            index = actual_index,
            position,
            "appended chunk"
        );
        Ok(Some(chunk))
    }

    async fn read_forward(
        &self,
        partition_id: &str,
        from_lower_idx_incl: i64,
        to_upper_idx_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let matching: Vec<Chunk> = {
            let inner = self.inner.lock().expect("in-memory engine mutex poisoned");
            inner
                .partitions
                .get(partition_id)
                .map(|p| {
                    p.chunks
                        .iter()
                        .filter(|c| c.index >= from_lower_idx_incl && c.index <= to_upper_idx_incl)
                        .take(take_n(limit))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        self.deliver(
            matching,
            from_lower_idx_incl,
            subscription,
            cancellation,
            |c| c.index,
        )
        .await
    }

    async fn read_backward(
        &self,
        partition_id: &str,
        from_upper_idx_incl: i64,
        to_lower_idx_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let matching: Vec<Chunk> = {
            let inner = self.inner.lock().expect("in-memory engine mutex poisoned");
            inner
                .partitions
                .get(partition_id)
                .map(|p| {
                    p.chunks
                        .iter()
                        .rev()
                        .filter(|c| c.index >= to_lower_idx_incl && c.index <= from_upper_idx_incl)
                        .take(take_n(limit))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        self.deliver(
            matching,
            from_upper_idx_incl,
            subscription,
            cancellation,
            |c| c.index,
        )
        .await
    }

    async fn read_single_backward(
        &self,
        partition_id: &str,
        from_upper_idx_incl: i64,
    ) -> Result<Option<Chunk>> {
        let inner = self.inner.lock().expect("in-memory engine mutex poisoned");
        Ok(inner.partitions.get(partition_id).and_then(|p| {
            p.chunks
                .iter()
                .rev()
                .find(|c| c.index <= from_upper_idx_incl)
                .cloned()
        }))
    }

    async fn read_all(
        &self,
        from_position_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let matching: Vec<Chunk> = {
            let inner = self.inner.lock().expect("in-memory engine mutex poisoned");
            inner
                .chunks
                .iter()
                .filter(|c| c.position >= from_position_incl)
                .take(take_n(limit))
                .cloned()
                .collect()
        };

        self.deliver(
            matching,
            from_position_incl,
            subscription,
            cancellation,
            |c| c.position,
        )
        .await
    }

    async fn read_last_position(&self) -> Result<i64> {
        let inner = self.inner.lock().expect("in-memory engine mutex poisoned");
        Ok(inner.chunks.last().map(|c| c.position).unwrap_or(0))
    }

    async fn delete(
        &self,
        partition_id: &str,
        from_lower_idx_incl: i64,
        to_upper_idx_incl: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("in-memory engine mutex poisoned");

        let removed_indices: Vec<i64> = match inner.partitions.get_mut(partition_id) {
            Some(partition) => {
                let mut removed = Vec::new();
                partition.chunks.retain(|c| {
                    let hit = c.index >= from_lower_idx_incl && c.index <= to_upper_idx_incl;
                    if hit {
                        removed.push(c.index);
                        partition.operation_ids.remove(&c.operation_id);
                    }
                    !hit
                });
                removed
            }
            None => Vec::new(),
        };

        if removed_indices.is_empty() {
            return Err(PersistenceError::StreamDelete(partition_id.to_string()));
        }

        inner.chunks.retain(|c| {
            !(c.partition_id == partition_id && removed_indices.contains(&c.index))
        });

        tracing::debug!(
            partition_id,
            count = removed_indices.len(),
            "deleted chunks"
        );
        Ok(())
    }
}
