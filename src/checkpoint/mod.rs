//! Checkpoint persistence layer
//!
//! One snapshot per thread, overwritten on every transition. The reference
//! store is in-memory; a Postgres store is available for durable threads.
//!
//! Saves are compare-and-swap on a per-thread revision, so two writers that
//! read the same revision cannot both commit.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::models::ConversationState;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub mod postgres;

pub use postgres::PostgresCheckpointStore;

/// Trait for checkpoint persistence
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the snapshot for `thread_id` if the stored revision still
    /// equals `state.version`, and return the new revision.
    ///
    /// A stale revision fails with `ConcurrentRun` and stores nothing.
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<u64>;

    /// The stored snapshot with its revision, or a fresh empty state
    /// (revision 0) if the thread is new.
    async fn load(&self, thread_id: &str) -> Result<ConversationState>;
}

/// In-memory checkpoint store
pub struct InMemoryCheckpointStore {
    snapshots: Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn thread_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<u64> {
        let mut snapshots = self.snapshots.write().await;

        let current = snapshots.get(thread_id).map_or(0, |stored| stored.version);
        if current != state.version {
            return Err(AgentError::ConcurrentRun(thread_id.to_string()));
        }

        let mut stored = state.clone();
        stored.version = current + 1;
        snapshots.insert(thread_id.to_string(), stored);
        Ok(current + 1)
    }

    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(thread_id)))
    }
}

/// Pick the checkpoint backend from configuration.
///
/// Falls back to memory when the database pool cannot be created.
pub fn build_checkpoint_store(config: &AgentConfig) -> Arc<dyn CheckpointStore> {
    if let Some(url) = &config.database_url {
        match PostgresCheckpointStore::connect_lazy(url) {
            Ok(store) => {
                info!("Checkpoint backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres checkpoint backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Checkpoint backend: in-memory");
    Arc::new(InMemoryCheckpointStore::new())
}

/// SHA256 digest of a snapshot's serialized form
/// Streams JSON directly into the hasher
pub fn snapshot_digest(state: &ConversationState) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), state).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[tokio::test]
    async fn test_load_unknown_thread_is_fresh() {
        let store = InMemoryCheckpointStore::new();
        let state = store.load("new_thread").await.unwrap();

        assert_eq!(state.thread_id, "new_thread");
        assert!(state.history.is_empty());
        assert!(state.pending_interrupt.is_none());
        assert_eq!(store.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = InMemoryCheckpointStore::new();
        let mut state = ConversationState::new("t1");
        state.append(Message::user("first"));
        state.version = store.save("t1", &state).await.unwrap();

        state.append(Message::assistant("second"));
        state.version = store.save("t1", &state).await.unwrap();

        let loaded = store.load("t1").await.unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.version, 2);
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_save_rejected() {
        let store = InMemoryCheckpointStore::new();
        let mut first = store.load("t1").await.unwrap();
        let mut second = store.load("t1").await.unwrap();

        first.append(Message::user("first"));
        assert_eq!(store.save("t1", &first).await.unwrap(), 1);

        second.append(Message::user("second"));
        let stale = store.save("t1", &second).await;
        assert!(matches!(stale, Err(AgentError::ConcurrentRun(id)) if id == "t1"));

        let stored = store.load("t1").await.unwrap();
        assert_eq!(stored.history[0].content.as_text(), Some("first"));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_save_of_load_is_noop() {
        let store = InMemoryCheckpointStore::new();
        let mut state = ConversationState::new("t1");
        state.append(Message::user("What is the price of MSFT?"));
        store.save("t1", &state).await.unwrap();

        let before = snapshot_digest(&store.load("t1").await.unwrap());
        let loaded = store.load("t1").await.unwrap();
        store.save("t1", &loaded).await.unwrap();
        let after = snapshot_digest(&store.load("t1").await.unwrap());

        assert_eq!(before, after);
    }

    #[test]
    fn test_digest_tracks_content() {
        let mut state = ConversationState::new("t1");
        let empty = snapshot_digest(&state);
        assert_eq!(empty.len(), 64);

        state.append(Message::user("hi"));
        assert_ne!(empty, snapshot_digest(&state));
    }
}
