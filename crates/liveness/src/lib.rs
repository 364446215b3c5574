//! Per-connection background watchers that translate peer death into
//! healing events (§4.3).
//!
//! Grounded on the teacher's `oj-daemon` signal-watcher tasks (a spawned
//! task racing a cancellation token against the condition it watches for)
//! and on the Go original's `connectionMonitor` goroutines, which select
//! between a neighbor's death channel and a private stop channel.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::sync::Arc;

use healmesh_core::{ActorHandle, ConnId, HealEvent, HealerHandle, WatcherHandle};
use healmesh_store::ConnectionStore;
use tokio_util::sync::CancellationToken;

/// Spawns and attaches the liveness watchers for one connection record.
pub struct LivenessMonitor;

impl LivenessMonitor {
    /// Spawn a watcher for every non-null neighbor of `conn_id` and attach it
    /// to the record already held by `store`. Must be called exactly once,
    /// immediately after the record is inserted (§4.3) — calling it again
    /// for the same `conn_id` attaches a second, redundant pair of watchers.
    pub async fn attach(
        store: &ConnectionStore,
        healer: Arc<dyn HealerHandle>,
        conn_id: ConnId,
        origin: Option<Arc<dyn ActorHandle>>,
        next: Option<Arc<dyn ActorHandle>>,
    ) {
        if let Some(origin) = origin {
            let watcher = Self::spawn_one(healer.clone(), conn_id.clone(), origin, HealEvent::SrcDown);
            let _ = store.mutate(&conn_id, |r| r.attach_watcher(watcher)).await;
        }
        if let Some(next) = next {
            let watcher = Self::spawn_one(healer, conn_id.clone(), next, HealEvent::DstDown);
            let _ = store.mutate(&conn_id, |r| r.attach_watcher(watcher)).await;
        }
    }

    fn spawn_one(
        healer: Arc<dyn HealerHandle>,
        conn_id: ConnId,
        neighbor: Arc<dyn ActorHandle>,
        event: HealEvent,
    ) -> WatcherHandle {
        let stop = CancellationToken::new();
        let watched = stop.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = watched.cancelled() => {
                    tracing::debug!(%conn_id, ?event, "liveness watcher stopped before neighbor death");
                }
                _ = neighbor.liveness() => {
                    tracing::info!(%conn_id, ?event, neighbor_id = %neighbor.id(), "neighbor died, emitting heal event");
                    let _join = healer.emit(event, conn_id).await;
                }
            }
        });
        WatcherHandle::new(stop, task)
    }
}
