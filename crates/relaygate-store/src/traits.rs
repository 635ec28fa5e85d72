//! Persistence collaborator contract.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use relaygate_core::RelayNode;

use crate::error::StoreError;

/// Opaque reference to an open session record, returned by
/// [`Store::append_session_start`] and consumed by [`Store::close_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub i64);

/// The persistence operations the core depends on.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are called
/// concurrently from every connection task and from background loops.
#[async_trait]
pub trait Store: Send + Sync {
    /// All tokens currently allowed to proxy (active and not blocked).
    async fn load_active_tokens(&self) -> Result<HashSet<String>, StoreError>;

    /// Every registered relay node.
    async fn load_nodes(&self) -> Result<Vec<RelayNode>, StoreError>;

    /// Insert or update a node keyed by `(host, port)`.
    async fn upsert_node(&self, node: &RelayNode) -> Result<(), StoreError>;

    /// Append an open session record for `token`, stamped with the current
    /// time; returns the handle used to close it.
    async fn append_session_start(&self, token: &str) -> Result<SessionHandle, StoreError>;

    /// Close a session record with its final byte counts.
    async fn close_session(
        &self,
        handle: SessionHandle,
        bytes_up: i64,
        bytes_down: i64,
    ) -> Result<(), StoreError>;

    /// Sum of `bytes_up + bytes_down` over sessions started at or after
    /// `since` (epoch seconds) for the token.
    async fn sum_bytes_since(&self, token: &str, since: i64) -> Result<i64, StoreError>;

    /// Startup readiness probe.
    async fn table_exists(&self, name: &str) -> Result<bool, StoreError>;
}

/// Blanket implementation for `Arc<S>`, so `Arc<dyn Store>` can be passed
/// where `impl Store` is expected.
#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    #[inline]
    async fn load_active_tokens(&self) -> Result<HashSet<String>, StoreError> {
        (**self).load_active_tokens().await
    }

    #[inline]
    async fn load_nodes(&self) -> Result<Vec<RelayNode>, StoreError> {
        (**self).load_nodes().await
    }

    #[inline]
    async fn upsert_node(&self, node: &RelayNode) -> Result<(), StoreError> {
        (**self).upsert_node(node).await
    }

    #[inline]
    async fn append_session_start(&self, token: &str) -> Result<SessionHandle, StoreError> {
        (**self).append_session_start(token).await
    }

    #[inline]
    async fn close_session(
        &self,
        handle: SessionHandle,
        bytes_up: i64,
        bytes_down: i64,
    ) -> Result<(), StoreError> {
        (**self).close_session(handle, bytes_up, bytes_down).await
    }

    #[inline]
    async fn sum_bytes_since(&self, token: &str, since: i64) -> Result<i64, StoreError> {
        (**self).sum_bytes_since(token, since).await
    }

    #[inline]
    async fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        (**self).table_exists(name).await
    }
}
