//! In-memory store for tests and seed-config deployments.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use relaygate_core::{epoch_secs, RelayNode};

use crate::error::StoreError;
use crate::traits::{SessionHandle, Store};

#[derive(Debug, Clone)]
struct SessionRow {
    id: i64,
    token: String,
    started_at: i64,
    ended_at: Option<i64>,
    bytes_up: i64,
    bytes_down: i64,
}

#[derive(Default)]
struct Inner {
    tokens: HashSet<String>,
    nodes: Vec<RelayNode>,
    sessions: Vec<SessionRow>,
    next_id: i64,
}

/// Store backed by process memory.
///
/// Session records are append-only, matching the persisted shape; nothing
/// survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with tokens and nodes (development mode).
    pub fn with_seed<I, S>(tokens: I, nodes: Vec<RelayNode>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            inner.tokens = tokens.into_iter().map(Into::into).collect();
            inner.nodes = nodes;
        }
        store
    }

    /// Add a token to the active set.
    pub fn add_token(&self, token: impl Into<String>) {
        self.inner.lock().tokens.insert(token.into());
    }

    /// Remove a token from the active set.
    pub fn remove_token(&self, token: &str) {
        self.inner.lock().tokens.remove(token);
    }

    /// Number of session rows (open and closed).
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Final byte counts of the closed session behind `handle`, if any.
    pub fn closed_session_bytes(&self, handle: SessionHandle) -> Option<(i64, i64)> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|s| s.id == handle.0 && s.ended_at.is_some())
            .map(|s| (s.bytes_up, s.bytes_down))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_active_tokens(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.inner.lock().tokens.clone())
    }

    async fn load_nodes(&self) -> Result<Vec<RelayNode>, StoreError> {
        Ok(self.inner.lock().nodes.clone())
    }

    async fn upsert_node(&self, node: &RelayNode) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner
            .nodes
            .iter_mut()
            .find(|n| n.same_endpoint(&node.host, node.port))
        {
            Some(existing) => {
                existing.residential = node.residential;
                existing.online = node.online;
                existing.last_checked = node.last_checked;
            }
            None => inner.nodes.push(node.clone()),
        }
        Ok(())
    }

    async fn append_session_start(&self, token: &str) -> Result<SessionHandle, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.sessions.push(SessionRow {
            id,
            token: token.to_string(),
            started_at: epoch_secs(),
            ended_at: None,
            bytes_up: 0,
            bytes_down: 0,
        });
        Ok(SessionHandle(id))
    }

    async fn close_session(
        &self,
        handle: SessionHandle,
        bytes_up: i64,
        bytes_down: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let row = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == handle.0)
            .ok_or(StoreError::UnknownHandle(handle.0))?;
        row.ended_at = Some(epoch_secs());
        row.bytes_up = bytes_up;
        row.bytes_down = bytes_down;
        Ok(())
    }

    async fn sum_bytes_since(&self, token: &str, since: i64) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .sessions
            .iter()
            .filter(|s| s.token == token && s.started_at >= since)
            .map(|s| s.bytes_up + s.bytes_down)
            .sum())
    }

    async fn table_exists(&self, _name: &str) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_by_endpoint() {
        let store = MemoryStore::new();
        let now = epoch_secs();
        store
            .upsert_node(&RelayNode::new("h1", 9001, true, now))
            .await
            .unwrap();
        let mut updated = RelayNode::new("h1", 9001, true, now + 10);
        updated.online = false;
        store.upsert_node(&updated).await.unwrap();

        let nodes = store.load_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].online);
        assert_eq!(nodes[0].last_checked, now + 10);
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let store = MemoryStore::new();
        let handle = store.append_session_start("tok").await.unwrap();
        store.close_session(handle, 100, 200).await.unwrap();

        assert_eq!(store.closed_session_bytes(handle), Some((100, 200)));
        let sum = store.sum_bytes_since("tok", 0).await.unwrap();
        assert_eq!(sum, 300);
    }

    #[tokio::test]
    async fn sum_respects_window_and_token() {
        let store = MemoryStore::new();
        let h1 = store.append_session_start("a").await.unwrap();
        store.close_session(h1, 10, 10).await.unwrap();
        let h2 = store.append_session_start("b").await.unwrap();
        store.close_session(h2, 5, 5).await.unwrap();

        assert_eq!(store.sum_bytes_since("a", 0).await.unwrap(), 20);
        assert_eq!(store.sum_bytes_since("b", 0).await.unwrap(), 10);
        // A window that starts in the future matches nothing.
        assert_eq!(
            store
                .sum_bytes_since("a", epoch_secs() + 3600)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn close_unknown_handle_errors() {
        let store = MemoryStore::new();
        let err = store.close_session(SessionHandle(42), 0, 0).await;
        assert!(matches!(err, Err(StoreError::UnknownHandle(42))));
    }
}
