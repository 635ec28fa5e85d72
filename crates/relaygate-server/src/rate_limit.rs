//! Per-token burst guard.
//!
//! Independent of the session tracker: enforces a minimum gap between
//! accepted requests per token and shares no state with the connection or
//! byte counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Enforces a minimum interval between accepted requests per token.
pub struct BurstGuard {
    last_request: Arc<RwLock<HashMap<String, Instant>>>,
    cooldown: Duration,
}

impl BurstGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_request: Arc::new(RwLock::new(HashMap::new())),
            cooldown,
        }
    }

    /// Whether a request for this token is allowed right now. An accepted
    /// request starts the token's cooldown.
    pub fn allow(&self, token: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_request.write();

        match map.get_mut(token) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                map.insert(token.to_string(), now);
                true
            }
        }
    }

    /// Start the background cleanup task dropping expired entries.
    pub fn start_cleanup_task(&self, interval: Duration, shutdown: CancellationToken) {
        let entries = self.last_request.clone();
        let cooldown = self.cooldown;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("burst guard cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let now = Instant::now();
                        let mut map = entries.write();
                        let before = map.len();
                        // An expired entry behaves exactly like a missing one.
                        map.retain(|_, last| now.duration_since(*last) < cooldown);
                        let removed = before - map.len();
                        if removed > 0 {
                            debug!(removed, remaining = map.len(), "burst guard entries cleaned up");
                        }
                    }
                }
            }
        });
    }
}
