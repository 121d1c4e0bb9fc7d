//! One shared battery of checks run against every backend, so that the
//! in-memory engine and the relational engine are held to the same
//! observable behavior. Mirrors the corpus's habit of parameterizing a
//! single generic test suite over several concrete implementations rather
//! than duplicating assertions per backend.
mod common;

use anyhow::Result;
use std::sync::Arc;
use store::{InMemoryEngine, PersistenceEngine, PersistenceError};
use tokio_util::sync::CancellationToken;

use common::CollectingSubscription;

async fn run_conformance_suite(engine: Arc<dyn PersistenceEngine>) -> Result<()> {
    engine.init().await?;

    // Scenario: append three chunks, forward scan then backward scan.
    engine.append("S1", 1, serde_json::json!("a"), None).await?;
    engine.append("S1", 2, serde_json::json!("b"), None).await?;
    engine.append("S1", 3, serde_json::json!("c"), None).await?;

    let forward = CollectingSubscription::new();
    engine
        .read_forward("S1", 0, i64::MAX, i64::MAX, forward.clone(), CancellationToken::new())
        .await?;
    let forward_values: Vec<_> = forward.chunks().iter().map(|c| c.payload.clone()).collect();
    assert_eq!(
        forward_values,
        vec![
            serde_json::json!("a"),
            serde_json::json!("b"),
            serde_json::json!("c")
        ]
    );

    let backward = CollectingSubscription::new();
    engine
        .read_backward("S1", i64::MAX, i64::MIN, i64::MAX, backward.clone(), CancellationToken::new())
        .await?;
    let backward_values: Vec<_> = backward.chunks().iter().map(|c| c.payload.clone()).collect();
    assert_eq!(
        backward_values,
        vec![
            serde_json::json!("c"),
            serde_json::json!("b"),
            serde_json::json!("a")
        ]
    );

    // Scenario: duplicate index, different operation, is rejected.
    let err = engine
        .append("S1", 1, serde_json::json!("conflict"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::DuplicateStreamIndex { .. }));

    // Scenario: same (partition, operation_id) is an idempotent no-op.
    engine
        .append("S1", 4, serde_json::json!("d"), Some("op-shared".to_string()))
        .await?;
    let repeat = engine
        .append("S1", 5, serde_json::json!("d"), Some("op-shared".to_string()))
        .await?;
    assert!(repeat.is_none());

    // Scenario: range delete then read back.
    engine.delete_index("S1", 2).await?;
    let after_delete = CollectingSubscription::new();
    engine
        .read_forward("S1", 0, i64::MAX, i64::MAX, after_delete.clone(), CancellationToken::new())
        .await?;
    let remaining_indices: Vec<_> = after_delete.chunks().iter().map(|c| c.index).collect();
    assert!(!remaining_indices.contains(&2));

    let delete_err = engine.delete_partition("does-not-exist").await.unwrap_err();
    assert!(matches!(delete_err, PersistenceError::StreamDelete(_)));

    // Scenario: global forward scan sees every cross-partition append in
    // append order.
    engine.append("S2", 1, serde_json::json!("x"), None).await?;
    let all = CollectingSubscription::new();
    engine
        .read_all(0, i64::MAX, all.clone(), CancellationToken::new())
        .await?;
    let positions: Vec<_> = all.chunks().iter().map(|c| c.position).collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted, "read_all must be strictly ascending by position");

    // Invariant: read_last_position tracks the highest assigned position.
    let last = engine.read_last_position().await?;
    assert!(last >= *positions.last().unwrap());

    // Cancellation short-circuits the scan method itself.
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let cancel_sub = CollectingSubscription::new();
    let cancel_result = engine
        .read_forward("S1", 0, i64::MAX, i64::MAX, cancel_sub, cancelled)
        .await;
    assert!(matches!(cancel_result, Err(PersistenceError::Cancellation)));

    Ok(())
}

#[tokio::test]
async fn in_memory_engine_satisfies_conformance_suite() -> Result<()> {
    run_conformance_suite(Arc::new(InMemoryEngine::new())).await
}

#[tokio::test]
async fn sql_engine_satisfies_conformance_suite() -> Result<()> {
    let engine = common::sqlite_engine("conformance_chunks").await;
    run_conformance_suite(Arc::new(engine)).await
}
