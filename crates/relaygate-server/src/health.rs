//! Periodic node health sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pool::NodePool;

/// Run the health checker until shutdown.
///
/// Every `interval` the pool sweeps nodes whose last heartbeat is older
/// than `stale_after` and then rebuilds its cache. Failures are logged and
/// the loop keeps going; only the shutdown token stops it.
pub async fn run_health_checker(
    pool: Arc<NodePool>,
    interval: Duration,
    stale_after: Duration,
    shutdown: CancellationToken,
) {
    info!(
        interval_secs = interval.as_secs(),
        stale_after_secs = stale_after.as_secs(),
        "health checker started"
    );
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("health checker shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                match pool.sweep_stale(stale_after).await {
                    Ok(0) => {}
                    Ok(swept) => info!(swept, "stale nodes marked offline"),
                    Err(err) => warn!(error = %err, "stale sweep failed"),
                }
                if let Err(err) = pool.reload().await {
                    warn!(error = %err, "node cache reload failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SelectionFilter;
    use relaygate_core::epoch_secs;
    use relaygate_store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_schedule_and_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(
            NodePool::load(store, SelectionFilter::default())
                .await
                .unwrap(),
        );
        pool.register("h1", 9001, true).await.unwrap();
        pool.ping("h1", 9001, true, epoch_secs() - 1000).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_health_checker(
            pool.clone(),
            Duration::from_secs(95),
            Duration::from_secs(190),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(96)).await;
        assert!(pool.online_nodes().is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }
}
