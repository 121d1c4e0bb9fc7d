use crate::config::SqlEngineConfig;
use crate::engine::PersistenceEngine;
use crate::serializer::{JsonSerializer, Serializer};
use crate::{Chunk, PersistenceError, Result, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::error::DatabaseError;
use sqlx::{AnyPool, Row};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Which SQL dialect a pool is talking to. The `Any` driver hides this at
/// the connection level, but a handful of DDL fragments (autoincrementing
/// primary keys, chiefly) have no dialect-agnostic spelling, so the engine
/// keeps track of it from the connection string alone rather than from
/// hand-maintained per-backend query templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    /// Inspects a connection URL's scheme the way `sqlx::any` itself does
    /// when picking a driver, so callers never have to state the dialect
    /// twice.
    pub fn from_connection_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            SqlDialect::Postgres
        } else {
            SqlDialect::Sqlite
        }
    }

    fn position_column_ddl(self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            SqlDialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }
}

/// Maps the same contract the in-memory backend implements onto a table
/// with two unique constraints: `(partition_id, index_value)` and
/// `(partition_id, operation_id)`. The serializer is how the payload's wire
/// representation is configured; the default is JSON.
pub struct SqlPersistenceEngine<S: Serializer<Value> = JsonSerializer<Value>> {
    pool: AnyPool,
    table_name: String,
    dialect: SqlDialect,
    serializer: S,
}

impl SqlPersistenceEngine<JsonSerializer<Value>> {
    /// Opens a pool from `config` and wraps it with the default JSON
    /// serializer.
    pub async fn connect(config: &SqlEngineConfig) -> Result<Self> {
        use sqlx::any::{install_default_drivers, AnyPoolOptions};
        install_default_drivers();

        let mut options = AnyPoolOptions::new().max_connections(config.max_connections);
        if let Some(secs) = config.idle_timeout_secs {
            options = options.idle_timeout(Some(std::time::Duration::from_secs(secs)));
        }
        let pool = options.connect(&config.connection_url).await?;
        let dialect = SqlDialect::from_connection_url(&config.connection_url);

        Ok(Self::new_with_dialect(
            pool,
            config.table_name.clone(),
            dialect,
            JsonSerializer::default(),
        ))
    }
}

impl<S: Serializer<Value>> SqlPersistenceEngine<S> {
    /// Wraps an already-open pool. Assumes SQLite DDL; use
    /// [`Self::new_with_dialect`] when connecting to Postgres.
    pub fn new(pool: AnyPool, table_name: impl Into<String>, serializer: S) -> Self {
        Self::new_with_dialect(pool, table_name, SqlDialect::Sqlite, serializer)
    }

    pub fn new_with_dialect(
        pool: AnyPool,
        table_name: impl Into<String>,
        dialect: SqlDialect,
        serializer: S,
    ) -> Self {
        Self {
            pool,
            table_name: table_name.into(),
            dialect,
            serializer,
        }
    }

    fn partition_index_constraint_name(&self) -> String {
        format!("idx_{}_partition_index", self.table_name)
    }

    fn partition_operation_constraint_name(&self) -> String {
        format!("idx_{}_partition_operation", self.table_name)
    }

    /// Distinguishes the two unique constraints a failed insert can hit.
    /// Postgres and recent SQLite builds surface the constraint name
    /// directly (`DatabaseError::constraint`); where that comes back
    /// empty, falls back to matching the driver's message text, which
    /// names either the constraint or its columns.
    fn is_operation_id_conflict(&self, db_err: &(dyn DatabaseError + 'static)) -> bool {
        let operation_constraint = self.partition_operation_constraint_name();
        if let Some(constraint) = db_err.constraint() {
            return constraint == operation_constraint;
        }
        let message = db_err.message();
        message.contains(&operation_constraint) || message.contains("operation_id")
    }

    fn chunk_from_row(&self, row: &AnyRow) -> Result<Chunk> {
        let raw_payload: String = row.try_get("payload")?;
        Ok(Chunk {
            position: row.try_get("position")?,
            partition_id: row.try_get("partition_id")?,
            index: row.try_get("index_value")?,
            payload: self.serializer.deserialize(&raw_payload)?,
            operation_id: row.try_get("operation_id")?,
            deleted: row.try_get("deleted")?,
        })
    }

    async fn deliver(
        &self,
        rows: std::result::Result<Vec<AnyRow>, sqlx::Error>,
        start: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
        marker_of: impl Fn(&Chunk) -> i64,
    ) -> Result<()> {
        subscription.on_start(start).await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                let err = PersistenceError::from(err);
                subscription.on_error(start, &err).await;
                return Ok(());
            }
        };

        let mut last = start;
        for row in &rows {
            if cancellation.is_cancelled() {
                return Err(PersistenceError::Cancellation);
            }
            let chunk = match self.chunk_from_row(row) {
                Ok(chunk) => chunk,
                Err(err) => {
                    subscription.on_error(last, &err).await;
                    return Ok(());
                }
            };
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

#[async_trait]
impl<S: Serializer<Value> + Send + Sync> PersistenceEngine for SqlPersistenceEngine<S> {
    async fn init(&self) -> Result<()> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                position {position_ddl},
                partition_id TEXT NOT NULL,
                index_value BIGINT NOT NULL,
                payload TEXT NOT NULL,
                operation_id TEXT NOT NULL,
                deleted BOOLEAN NOT NULL DEFAULT false
            )",
            table = self.table_name,
            position_ddl = self.dialect.position_column_ddl(),
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        let index_idx = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON {table} (partition_id, index_value)",
            name = self.partition_index_constraint_name(),
            table = self.table_name
        );
        sqlx::query(&index_idx).execute(&self.pool).await?;

        let operation_idx = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON {table} (partition_id, operation_id)",
            name = self.partition_operation_constraint_name(),
            table = self.table_name
        );
        sqlx::query(&operation_idx).execute(&self.pool).await?;

        Ok(())
    }

    async fn destroy_all(&self) -> Result<()> {
        let sql = format!("DELETE FROM {table}", table = self.table_name);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn append(
        &self,
        partition_id: &str,
        index: i64,
        payload: Value,
        operation_id: Option<String>,
    ) -> Result<Option<Chunk>> {
        let operation_id = operation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT position FROM {table} WHERE partition_id = $1 AND operation_id = $2",
            table = self.table_name
        ))
        .bind(partition_id)
        .bind(&operation_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.commit().await?;
            tracing::debug!(partition_id, %operation_id, "append is idempotent no-op");
            return Ok(None);
        }

        let serialized = self.serializer.serialize(&payload)?;

        let insert_result = sqlx::query(&format!(
            "INSERT INTO {table} (partition_id, index_value, payload, operation_id, deleted) VALUES ($1, $2, $3, $4, $5)",
            table = self.table_name
        ))
        .bind(partition_id)
        .bind(index)
        .bind(&serialized)
        .bind(&operation_id)
        .bind(false)
        .execute(&mut *tx)
        .await;

        let conflict = match &insert_result {
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Some(self.is_operation_id_conflict(db_err.as_ref()))
            }
            _ => None,
        };

        match conflict {
            Some(true) => {
                // Lost a race against a concurrent append sharing this
                // (partition_id, operation_id): the idempotency pre-check
                // above ran before either writer had committed, so the
                // operation_id constraint is the one catching it here
                // instead.
                tx.rollback().await?;
                tracing::debug!(partition_id, %operation_id, "append is idempotent no-op (lost insert race)");
                return Ok(None);
            }
            Some(false) => {
                tx.rollback().await?;
                tracing::warn!(partition_id, index, "duplicate stream index on append");
                return Err(PersistenceError::DuplicateStreamIndex {
                    partition_id: partition_id.to_string(),
                    index,
                });
            }
            None => {}
        }
        insert_result?;

        let position: i64 = sqlx::query_scalar(&format!(
            "SELECT position FROM {table} WHERE partition_id = $1 AND operation_id = $2",
            table = self.table_name
        ))
        .bind(partition_id)
        .bind(&operation_id)
        .fetch_one(&mut *tx)
        .await?;

        let actual_index = if index < 0 {
            sqlx::query(&format!(
                "UPDATE {table} SET index_value = $1 WHERE position = $2",
                table = self.table_name
            ))
            .bind(position)
            .bind(position)
            .execute(&mut *tx)
            .await?;
            position
        } else {
            index
        };

        tx.commit().await?;

        tracing::debug!(partition_id, index = actual_index, position, "appended chunk");
        Ok(Some(Chunk {
            position,
            partition_id: partition_id.to_string(),
            index: actual_index,
            payload,
            operation_id,
            deleted: false,
        }))
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
        let sql = format!(
            "SELECT position, partition_id, index_value, payload, operation_id, deleted FROM {table} \
             WHERE partition_id = $1 AND index_value >= $2 AND index_value <= $3 \
             ORDER BY index_value ASC LIMIT $4",
            table = self.table_name
        );
        let rows = sqlx::query(&sql)
            .bind(partition_id)
            .bind(from_lower_idx_incl)
            .bind(to_upper_idx_incl)
            .bind(limit)
            .fetch_all(&self.pool)
            .await;

        self.deliver(rows, from_lower_idx_incl, subscription, cancellation, |c| c.index)
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
        let sql = format!(
            "SELECT position, partition_id, index_value, payload, operation_id, deleted FROM {table} \
             WHERE partition_id = $1 AND index_value >= $2 AND index_value <= $3 \
             ORDER BY index_value DESC LIMIT $4",
            table = self.table_name
        );
        let rows = sqlx::query(&sql)
            .bind(partition_id)
            .bind(to_lower_idx_incl)
            .bind(from_upper_idx_incl)
            .bind(limit)
            .fetch_all(&self.pool)
            .await;

        self.deliver(rows, from_upper_idx_incl, subscription, cancellation, |c| c.index)
            .await
    }

    async fn read_single_backward(
        &self,
        partition_id: &str,
        from_upper_idx_incl: i64,
    ) -> Result<Option<Chunk>> {
        let sql = format!(
            "SELECT position, partition_id, index_value, payload, operation_id, deleted FROM {table} \
             WHERE partition_id = $1 AND index_value <= $2 ORDER BY index_value DESC LIMIT 1",
            table = self.table_name
        );
        let row = sqlx::query(&sql)
            .bind(partition_id)
            .bind(from_upper_idx_incl)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|r| self.chunk_from_row(r)).transpose()
    }

    async fn read_all(
        &self,
        from_position_incl: i64,
        limit: i64,
        subscription: Arc<dyn Subscription>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let sql = format!(
            "SELECT position, partition_id, index_value, payload, operation_id, deleted FROM {table} \
             WHERE position >= $1 ORDER BY position ASC LIMIT $2",
            table = self.table_name
        );
        let rows = sqlx::query(&sql)
            .bind(from_position_incl)
            .bind(limit)
            .fetch_all(&self.pool)
            .await;

        self.deliver(rows, from_position_incl, subscription, cancellation, |c| c.position)
            .await
    }

    async fn read_last_position(&self) -> Result<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX(position), 0) FROM {table}",
            table = self.table_name
        );
        let position: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(position)
    }

    async fn delete(
        &self,
        partition_id: &str,
        from_lower_idx_incl: i64,
        to_upper_idx_incl: i64,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM {table} WHERE partition_id = $1 AND index_value >= $2 AND index_value <= $3",
            table = self.table_name
        );
        let result = sqlx::query(&sql)
            .bind(partition_id)
            .bind(from_lower_idx_incl)
            .bind(to_upper_idx_incl)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::StreamDelete(partition_id.to_string()));
        }

        tracing::debug!(
            partition_id,
            count = result.rows_affected(),
            "deleted chunks"
        );
        Ok(())
    }
}
