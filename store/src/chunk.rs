use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The atomic, immutable unit of storage. `position` is assigned globally by
/// the engine at append time; `index` orders chunks within a single partition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub position: i64,
    pub partition_id: String,
    pub index: i64,
    pub payload: Value,
    pub operation_id: String,
    pub deleted: bool,
}

/// A snapshot of an aggregate at a given version, as understood by the
/// snapshot store contract. Opaque to the persistence engine itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotInfo {
    pub aggregate_id: String,
    pub aggregate_version: i64,
    pub payload: Value,
    pub schema_version: i64,
}
