//! Per-actor table of connection records with an event-broadcast feed (§4.2).
//!
//! Grounded on the teacher's `oj-daemon` runtime state (a concurrent map
//! guarded per-key, with a mutex-protected subscriber list for fan-out) and
//! on the Go original's `connectionMonitor.send`, which drives the fan-out
//! synchronously from the caller's own task rather than through a relay.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use dashmap::DashMap;
use healmesh_core::config::SUBSCRIBER_QUEUE_CAPACITY;
use healmesh_core::{ConnId, ConnectionRecord, ConnectionSnapshot, MeshError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// The kind of change a `ConnectionEvent` carries (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEventType {
    /// Sent once, immediately after `subscribe`, carrying every record live
    /// at that instant so a late subscriber never races the store's startup.
    InitialTransfer,
    Update,
    Delete,
}

/// A batch of connection snapshots pushed to a subscriber (§4.2).
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub event_type: ConnectionEventType,
    pub connections: Vec<ConnectionSnapshot>,
}

/// Per-actor map of `conn_id -> ConnectionRecord`, plus a fan-out broadcast
/// of `ConnectionEvent`s to every live subscriber.
///
/// The map uses `dashmap`'s independent key-level locking (§6). The
/// subscriber list is a plain `Mutex<Vec<_>>`, held only across `subscribe`
/// and broadcast, never across a blocking `send` to more than the one
/// channel currently being written.
#[derive(Default)]
pub struct ConnectionStore {
    records: DashMap<ConnId, ConnectionRecord>,
    subscribers: Mutex<Vec<mpsc::Sender<ConnectionEvent>>>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record's observable snapshot.
    pub fn get(&self, conn_id: &ConnId) -> Result<ConnectionSnapshot, MeshError> {
        self.records
            .get(conn_id)
            .map(|r| r.snapshot())
            .ok_or_else(|| MeshError::NotFound {
                conn_id: conn_id.clone(),
            })
    }

    /// Run a read-only projection over a record without broadcasting — for
    /// callers (the Healer) that need more than the public snapshot exposes
    /// but aren't changing anything.
    pub fn peek<F, T>(&self, conn_id: &ConnId, f: F) -> Result<T, MeshError>
    where
        F: FnOnce(&ConnectionRecord) -> T,
    {
        self.records
            .get(conn_id)
            .map(|r| f(&r))
            .ok_or_else(|| MeshError::NotFound {
                conn_id: conn_id.clone(),
            })
    }

    /// Insert or replace a record, then broadcast `Update` to every subscriber.
    ///
    /// Broadcast is driven synchronously from this call: a subscriber whose
    /// queue is full blocks this `update` call rather than dropping the
    /// event or reordering it behind a relay task (§4.2, §6: "lossy under
    /// backpressure is forbidden").
    pub async fn update(&self, record: ConnectionRecord) {
        let snapshot = record.snapshot();
        tracing::debug!(conn_id = %snapshot.conn_id, state = ?snapshot.state, "connection record updated");
        self.records.insert(record.conn_id.clone(), record);
        self.broadcast(ConnectionEventType::Update, vec![snapshot]).await;
    }

    /// Run `f` against the record for `conn_id` under its map-level lock,
    /// then broadcast `Update` with the resulting snapshot. Used by callers
    /// (the Healer) that need to mutate a record in place — e.g. to attach a
    /// watcher or set a reset token — without the move-in/move-out dance
    /// `update` would otherwise force.
    pub async fn mutate<F, T>(&self, conn_id: &ConnId, f: F) -> Result<T, MeshError>
    where
        F: FnOnce(&mut ConnectionRecord) -> T,
    {
        let (out, snapshot) = {
            let mut entry = self
                .records
                .get_mut(conn_id)
                .ok_or_else(|| MeshError::NotFound {
                    conn_id: conn_id.clone(),
                })?;
            let out = f(&mut entry);
            (out, entry.snapshot())
        };
        self.broadcast(ConnectionEventType::Update, vec![snapshot]).await;
        Ok(out)
    }

    /// Remove a record, joining and releasing its liveness watchers first
    /// (the join completes before the slot is freed — §3, §4.2). Unless
    /// `silent`, broadcasts `Delete` afterwards; `silent=true` is used during
    /// actor teardown so a dying actor doesn't spam its own subscribers.
    pub async fn delete(&self, conn_id: &ConnId, silent: bool) {
        let Some((_, mut record)) = self.records.remove(conn_id) else {
            return;
        };
        record.join_watchers().await;
        tracing::debug!(%conn_id, silent, "connection record deleted");
        if !silent {
            let snapshot = record.snapshot();
            self.broadcast(ConnectionEventType::Delete, vec![snapshot]).await;
        }
    }

    /// Delete every record this store holds, silently (§4.5: `kill`).
    pub async fn delete_all_silent(&self) {
        let conn_ids: Vec<ConnId> = self.records.iter().map(|e| e.key().clone()).collect();
        for conn_id in conn_ids {
            self.delete(&conn_id, true).await;
        }
    }

    /// Subscribe to this store's event feed. The returned receiver's first
    /// message is always an `InitialTransfer` snapshot of every record live
    /// at the moment of the call.
    pub async fn subscribe(&self) -> mpsc::Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let snapshot: Vec<ConnectionSnapshot> =
            self.records.iter().map(|e| e.value().snapshot()).collect();
        // Registering before sending the InitialTransfer would let a
        // concurrent `update` interleave its own Update ahead of it for this
        // subscriber; send first, then register.
        if tx
            .send(ConnectionEvent {
                event_type: ConnectionEventType::InitialTransfer,
                connections: snapshot,
            })
            .await
            .is_ok()
        {
            self.subscribers.lock().push(tx);
        }
        rx
    }

    async fn broadcast(&self, event_type: ConnectionEventType, connections: Vec<ConnectionSnapshot>) {
        let subs = self.subscribers.lock().clone();
        if subs.is_empty() {
            return;
        }
        let mut dead = Vec::new();
        for (idx, sub) in subs.iter().enumerate() {
            let event = ConnectionEvent {
                event_type,
                connections: connections.clone(),
            };
            if sub.send(event).await.is_err() {
                dead.push(idx);
            }
        }
        if !dead.is_empty() {
            let mut subs = self.subscribers.lock();
            for idx in dead.into_iter().rev() {
                subs.swap_remove(idx);
            }
        }
    }
}
