//! Per-token session tracking and admission limits.
//!
//! The tracker keeps ephemeral in-memory state per token (rebuilt empty on
//! restart) and appends durable session records through the persistence
//! collaborator. Store writes happen outside the state lock and are
//! write-behind: a failed write is logged, never fatal to the tunnel it
//! accounts for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use relaygate_config::LimitSettings;
use relaygate_core::epoch_secs;
use relaygate_store::{SessionHandle, Store};
use serde::Serialize;
use tracing::{debug, warn};

/// Ephemeral per-token counters, exposed through the admin snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActiveTokenState {
    pub active_connections: i64,
    pub is_blocked: bool,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub last_activity: i64,
}

/// Tracks connection counts, byte totals, and block state per token.
pub struct SessionTracker {
    states: Mutex<HashMap<String, ActiveTokenState>>,
    store: Arc<dyn Store>,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Admit a connection: bump the in-memory counters and append an open
    /// session record. Returns the handle needed to close the record; a
    /// store failure yields `None` and the tunnel proceeds unaccounted.
    pub async fn record_start(&self, token: &str) -> Option<SessionHandle> {
        {
            let mut states = self.states.lock();
            let state = states.entry(token.to_string()).or_default();
            state.active_connections += 1;
            state.last_activity = epoch_secs();
        }

        match self.store.append_session_start(token).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(token, error = %err, "failed to append session record");
                None
            }
        }
    }

    /// Close the connection's accounting: decrement, accumulate byte
    /// totals, and close the durable record with the final counts.
    pub async fn record_stop(
        &self,
        token: &str,
        handle: Option<SessionHandle>,
        bytes_up: u64,
        bytes_down: u64,
    ) {
        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(token) {
                // Never below zero, even on unmatched stops.
                state.active_connections = (state.active_connections - 1).max(0);
                state.bytes_up += bytes_up;
                state.bytes_down += bytes_down;
                state.last_activity = epoch_secs();
            }
        }

        if let Some(handle) = handle {
            if let Err(err) = self
                .store
                .close_session(handle, bytes_up as i64, bytes_down as i64)
                .await
            {
                warn!(token, error = %err, "failed to close session record");
            }
        }
    }

    /// Whether the token is currently blocked.
    ///
    /// Three rules, deliberately asymmetric:
    /// - the explicit block flag is sticky until [`Self::unblock`];
    /// - exceeding `max_connections_per_token` latches that flag;
    /// - the trailing-window byte budget is recomputed from the store on
    ///   every call and does not latch.
    pub async fn is_blocked(&self, token: &str, limits: &LimitSettings) -> bool {
        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(token) {
                if state.is_blocked {
                    return true;
                }
                if state.active_connections > limits.max_connections_per_token {
                    state.is_blocked = true;
                    debug!(
                        token,
                        active = state.active_connections,
                        "connection cap exceeded, token latched blocked"
                    );
                    return true;
                }
            }
        }

        if limits.byte_limit > 0 {
            let since = epoch_secs() - limits.timeframe_minutes * 60;
            match self.store.sum_bytes_since(token, since).await {
                Ok(total) => return total >= limits.byte_limit,
                Err(err) => {
                    warn!(token, error = %err, "byte-window query failed, allowing");
                }
            }
        }
        false
    }

    /// Administrative block, independent of the automatic rules.
    pub fn block(&self, token: &str) {
        let mut states = self.states.lock();
        states.entry(token.to_string()).or_default().is_blocked = true;
    }

    /// Clear the block flag (both administrative and latched).
    pub fn unblock(&self, token: &str) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(token) {
            state.is_blocked = false;
        }
    }

    /// Cloned snapshot of every tracked token.
    pub fn snapshot(&self) -> HashMap<String, ActiveTokenState> {
        self.states.lock().clone()
    }
}
