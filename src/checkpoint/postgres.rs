//! Postgres-backed checkpoint store
//!
//! Snapshots are stored as JSON text, one row per thread. The `version`
//! column guards every write: the first save inserts revision 1, later saves
//! only update the row they read.

use super::CheckpointStore;
use crate::error::AgentError;
use crate::models::ConversationState;
use crate::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub struct PostgresCheckpointStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Create the pool without opening a connection yet.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| AgentError::DatabaseError(format!("Invalid database URL: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_checkpoints (
                      thread_id TEXT PRIMARY KEY,
                      snapshot TEXT NOT NULL,
                      version BIGINT NOT NULL DEFAULT 1,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    "ALTER TABLE conversation_checkpoints ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 1",
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!(
                    "Failed to initialize checkpoint schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<u64> {
        self.ensure_schema().await?;

        let snapshot = serde_json::to_string(state)?;
        let expected = i64::try_from(state.version).map_err(|_| {
            AgentError::CheckpointError(format!("revision {} out of range", state.version))
        })?;

        let result = if expected == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversation_checkpoints (thread_id, snapshot, version, updated_at)
                VALUES ($1, $2, 1, $3)
                ON CONFLICT (thread_id) DO NOTHING
                "#,
            )
            .bind(thread_id)
            .bind(&snapshot)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE conversation_checkpoints
                SET snapshot = $2, version = version + 1, updated_at = $3
                WHERE thread_id = $1 AND version = $4
                "#,
            )
            .bind(thread_id)
            .bind(&snapshot)
            .bind(chrono::Utc::now())
            .bind(expected)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| AgentError::DatabaseError(format!("Failed to save checkpoint: {}", e)))?;

        if result.rows_affected() == 0 {
            warn!(thread_id, expected, "Checkpoint revision moved; write rejected");
            return Err(AgentError::ConcurrentRun(thread_id.to_string()));
        }

        debug!(thread_id, version = expected + 1, bytes = snapshot.len(), "Checkpoint written");
        Ok(state.version + 1)
    }

    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT snapshot, version FROM conversation_checkpoints WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgentError::DatabaseError(format!("Failed to load checkpoint: {}", e)))?;

        let Some(row) = row else {
            return Ok(ConversationState::new(thread_id));
        };

        let snapshot: String = row
            .try_get("snapshot")
            .map_err(|e| AgentError::DatabaseError(format!("Malformed checkpoint row: {}", e)))?;

        let version: i64 = row
            .try_get("version")
            .map_err(|e| AgentError::DatabaseError(format!("Malformed checkpoint row: {}", e)))?;

        let mut state: ConversationState = serde_json::from_str(&snapshot).map_err(|e| {
            AgentError::CheckpointError(format!(
                "Snapshot for thread {} cannot be decoded: {}",
                thread_id, e
            ))
        })?;
        state.version = u64::try_from(version).unwrap_or_default();
        Ok(state)
    }
}
