//! Upstream node pool with selection strategies and health state.
//!
//! The pool owns an in-memory snapshot of the registered relay nodes,
//! rebuilt wholesale from the store after every write (consistency is
//! eventual, not incremental). The snapshot lock is only ever held for
//! in-memory reads and swaps — store I/O happens outside it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use relaygate_core::{epoch_secs, RelayNode, Strategy};
use relaygate_store::Store;
use tracing::{debug, info, warn};

use crate::error::ProxyError;

/// Which nodes are eligible for selection.
///
/// `online` is always required; the residential requirement is
/// configurable rather than hard-coded so non-residential routing paths
/// can reuse the pool.
#[derive(Debug, Clone, Copy)]
pub struct SelectionFilter {
    pub residential_only: bool,
}

impl Default for SelectionFilter {
    fn default() -> Self {
        Self {
            residential_only: true,
        }
    }
}

impl SelectionFilter {
    fn matches(&self, node: &RelayNode) -> bool {
        node.online && (!self.residential_only || node.residential)
    }
}

/// Pool of relay nodes backed by the persistence collaborator.
pub struct NodePool {
    store: Arc<dyn Store>,
    /// Cache snapshot; the lock publishes replacements, nothing more.
    nodes: Mutex<Vec<RelayNode>>,
    /// Round-robin cursor shared across all callers.
    rr_counter: AtomicUsize,
    filter: SelectionFilter,
}

impl NodePool {
    /// Build a pool with its initial snapshot loaded from the store.
    pub async fn load(store: Arc<dyn Store>, filter: SelectionFilter) -> Result<Self, ProxyError> {
        let nodes = store.load_nodes().await?;
        info!(count = nodes.len(), "node pool loaded");
        Ok(Self {
            store,
            nodes: Mutex::new(nodes),
            rr_counter: AtomicUsize::new(0),
            filter,
        })
    }

    /// Replace the snapshot from the store.
    pub async fn reload(&self) -> Result<usize, ProxyError> {
        let fresh = self.store.load_nodes().await?;
        let count = fresh.len();
        *self.nodes.lock() = fresh;
        Ok(count)
    }

    /// Register (or re-register) a node: persist it online, then rebuild
    /// the snapshot.
    pub async fn register(
        &self,
        host: &str,
        port: u16,
        residential: bool,
    ) -> Result<RelayNode, ProxyError> {
        let node = RelayNode::new(host, port, residential, epoch_secs());
        self.store.upsert_node(&node).await?;
        self.reload().await?;
        info!(node = %node, residential, "node registered");
        Ok(node)
    }

    /// Select a live node with the given strategy.
    pub fn select(&self, strategy: Strategy) -> Result<RelayNode, ProxyError> {
        let live = self.live_nodes();
        if live.is_empty() {
            return Err(ProxyError::NoUpstream);
        }
        let idx = match strategy {
            Strategy::RoundRobin => self.rr_counter.fetch_add(1, Ordering::Relaxed) % live.len(),
            Strategy::Random => rand::thread_rng().gen_range(0..live.len()),
        };
        Ok(live[idx].clone())
    }

    /// Persist a single node going offline.
    pub async fn mark_offline(&self, host: &str, port: u16) -> Result<bool, ProxyError> {
        let Some(mut node) = self.find(host, port) else {
            return Ok(false);
        };
        node.online = false;
        self.store.upsert_node(&node).await?;
        self.patch(node);
        Ok(true)
    }

    /// Mark every online node whose last heartbeat is older than
    /// `threshold` offline. Returns the number of nodes swept.
    pub async fn sweep_stale(&self, threshold: Duration) -> Result<usize, ProxyError> {
        let cutoff = epoch_secs() - threshold.as_secs() as i64;
        let stale: Vec<RelayNode> = self
            .nodes
            .lock()
            .iter()
            .filter(|n| n.online && n.last_checked < cutoff)
            .cloned()
            .collect();

        let mut swept = 0;
        for mut node in stale {
            node.online = false;
            match self.store.upsert_node(&node).await {
                Ok(()) => {
                    debug!(node = %node, last_checked = node.last_checked, "node went stale");
                    self.patch(node);
                    swept += 1;
                }
                Err(err) => warn!(node = %node, error = %err, "failed to persist stale node"),
            }
        }
        Ok(swept)
    }

    /// Heartbeat from a node. Returns `false` if the node is unknown.
    pub async fn ping(
        &self,
        host: &str,
        port: u16,
        online: bool,
        timestamp: i64,
    ) -> Result<bool, ProxyError> {
        let Some(mut node) = self.find(host, port) else {
            return Ok(false);
        };
        node.online = online;
        node.last_checked = timestamp;
        self.store.upsert_node(&node).await?;
        self.patch(node);
        Ok(true)
    }

    /// Snapshot of nodes matching the selection filter.
    pub fn live_nodes(&self) -> Vec<RelayNode> {
        self.nodes
            .lock()
            .iter()
            .filter(|n| self.filter.matches(n))
            .cloned()
            .collect()
    }

    /// Snapshot of all online nodes regardless of the residential filter.
    pub fn online_nodes(&self) -> Vec<RelayNode> {
        self.nodes
            .lock()
            .iter()
            .filter(|n| n.online)
            .cloned()
            .collect()
    }

    fn find(&self, host: &str, port: u16) -> Option<RelayNode> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.same_endpoint(host, port))
            .cloned()
    }

    /// Replace one cache entry after a persisted write.
    fn patch(&self, node: RelayNode) {
        let mut nodes = self.nodes.lock();
        match nodes
            .iter_mut()
            .find(|n| n.same_endpoint(&node.host, node.port))
        {
            Some(existing) => *existing = node,
            None => nodes.push(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_store::MemoryStore;
    use std::collections::HashSet;

    async fn pool_with(nodes: &[(&str, u16, bool)]) -> NodePool {
        let store = Arc::new(MemoryStore::new());
        let pool = NodePool::load(store, SelectionFilter::default())
            .await
            .unwrap();
        for (host, port, residential) in nodes {
            pool.register(host, *port, *residential).await.unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn empty_pool_has_no_node_available() {
        let pool = pool_with(&[]).await;
        assert!(matches!(
            pool.select(Strategy::RoundRobin),
            Err(ProxyError::NoUpstream)
        ));
    }

    #[tokio::test]
    async fn single_node_round_robin_repeats() {
        let pool = pool_with(&[("h1", 9001, true)]).await;
        assert_eq!(pool.select(Strategy::RoundRobin).unwrap().host, "h1");
        assert_eq!(pool.select(Strategy::RoundRobin).unwrap().host, "h1");
    }

    #[tokio::test]
    async fn round_robin_never_repeats_before_full_cycle() {
        let pool = pool_with(&[("h1", 9001, true)]).await;
        // Two selections against the single-node pool advance the shared
        // counter to an arbitrary phase.
        pool.select(Strategy::RoundRobin).unwrap();
        pool.select(Strategy::RoundRobin).unwrap();

        pool.register("h2", 9002, true).await.unwrap();

        // From any phase, each of the two nodes appears exactly once per
        // two consecutive calls.
        let first = pool.select(Strategy::RoundRobin).unwrap();
        let second = pool.select(Strategy::RoundRobin).unwrap();
        assert_ne!(first.host, second.host);

        for _ in 0..3 {
            let a = pool.select(Strategy::RoundRobin).unwrap();
            let b = pool.select(Strategy::RoundRobin).unwrap();
            let cycle: HashSet<String> = [a.host, b.host].into_iter().collect();
            assert_eq!(cycle.len(), 2);
        }
    }

    #[tokio::test]
    async fn round_robin_visits_each_of_k_nodes_once() {
        let pool = pool_with(&[("h1", 1, true), ("h2", 2, true), ("h3", 3, true)]).await;
        for _ in 0..4 {
            let seen: HashSet<String> = (0..3)
                .map(|_| pool.select(Strategy::RoundRobin).unwrap().host)
                .collect();
            assert_eq!(seen.len(), 3);
        }
    }

    #[tokio::test]
    async fn random_picks_from_live_set_only() {
        let pool = pool_with(&[("h1", 9001, true), ("h2", 9002, true)]).await;
        pool.mark_offline("h2", 9002).await.unwrap();
        for _ in 0..20 {
            assert_eq!(pool.select(Strategy::Random).unwrap().host, "h1");
        }
    }

    #[tokio::test]
    async fn residential_filter_is_configurable() {
        let pool = pool_with(&[("dc-1", 9001, false)]).await;
        // Default filter requires residential nodes.
        assert!(pool.select(Strategy::RoundRobin).is_err());

        let store = Arc::new(MemoryStore::new());
        let open_pool = NodePool::load(
            store,
            SelectionFilter {
                residential_only: false,
            },
        )
        .await
        .unwrap();
        open_pool.register("dc-1", 9001, false).await.unwrap();
        assert_eq!(
            open_pool.select(Strategy::RoundRobin).unwrap().host,
            "dc-1"
        );
    }

    #[tokio::test]
    async fn reregistration_upserts_by_endpoint() {
        let pool = pool_with(&[("h1", 9001, true)]).await;
        pool.mark_offline("h1", 9001).await.unwrap();
        assert!(pool.select(Strategy::RoundRobin).is_err());

        // Re-registering the same endpoint brings it back online.
        pool.register("h1", 9001, true).await.unwrap();
        assert_eq!(pool.online_nodes().len(), 1);
        assert_eq!(pool.select(Strategy::RoundRobin).unwrap().host, "h1");
    }

    #[tokio::test]
    async fn sweep_marks_only_stale_nodes_offline() {
        let pool = pool_with(&[("fresh", 9001, true), ("stale", 9002, true)]).await;
        let old = epoch_secs() - 1000;
        pool.ping("stale", 9002, true, old).await.unwrap();

        let swept = pool.sweep_stale(Duration::from_secs(190)).await.unwrap();
        assert_eq!(swept, 1);

        let online = pool.online_nodes();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].host, "fresh");
    }

    #[tokio::test]
    async fn ping_refreshes_and_survives_sweep() {
        let pool = pool_with(&[("h1", 9001, true)]).await;
        pool.ping("h1", 9001, true, epoch_secs()).await.unwrap();
        let swept = pool.sweep_stale(Duration::from_secs(190)).await.unwrap();
        assert_eq!(swept, 0);
        assert_eq!(pool.online_nodes().len(), 1);
    }

    #[tokio::test]
    async fn ping_unknown_node_returns_false() {
        let pool = pool_with(&[]).await;
        assert!(!pool.ping("ghost", 1, true, epoch_secs()).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_persists_through_reload() {
        let store = Arc::new(MemoryStore::new());
        let pool = NodePool::load(store.clone(), SelectionFilter::default())
            .await
            .unwrap();
        pool.register("h1", 9001, true).await.unwrap();
        pool.ping("h1", 9001, true, epoch_secs() - 1000)
            .await
            .unwrap();
        pool.sweep_stale(Duration::from_secs(190)).await.unwrap();

        // The offline transition reached the store, not just the cache.
        pool.reload().await.unwrap();
        assert!(pool.online_nodes().is_empty());
    }
}
