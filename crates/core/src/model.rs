//! The data model of §3: actor identity, requests, connections and the
//! heal state/event taxonomy.

use crate::actor_handle::ActorHandle;
use crate::ids::{ActorId, ClassName, ConnId, NodeId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Immutable identity of an actor, fixed at construction (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorMeta {
    pub id: ActorId,
    pub class: ClassName,
    pub node: NodeId,
    /// Whether this actor's death breaks observable connectivity (§6).
    pub network_holder: bool,
}

/// An end-to-end connection request, hopping one class per actor (§3).
#[derive(Clone)]
pub struct Request {
    /// The full class chain this connection must realize.
    pub route: Vec<ClassName>,
    /// Index into `route` naming the class of the actor currently handling this request.
    pub cursor: usize,
    pub conn_id: ConnId,
    /// The immediate upstream peer. `None` at the chain head.
    pub origin: Option<Arc<dyn ActorHandle>>,
}

impl Request {
    /// Whether this actor is the tail of the route (§3: `next` is null iff this holds).
    pub fn is_tail(&self) -> bool {
        self.cursor + 1 == self.route.len()
    }

    /// The class of the next hop, if any.
    pub fn next_class(&self) -> Option<&ClassName> {
        self.route.get(self.cursor + 1)
    }

    /// Build the request this actor forwards to its chosen downstream candidate.
    pub fn advance(&self, origin: Arc<dyn ActorHandle>) -> Request {
        Request {
            route: self.route.clone(),
            cursor: self.cursor + 1,
            conn_id: self.conn_id.clone(),
            origin: Some(origin),
        }
    }
}

/// The result of a successful `request` call: only the tail's identity is observable (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub conn_id: ConnId,
    pub last_actor_id: ActorId,
}

/// HealState ∈ {Requesting, Ready, WaitSrc, WaitDst, Healing, Closing} (§3).
///
/// `Requesting` is carried in the taxonomy for symmetry with the source
/// design but is never entered by any transition in this core (§4.4, §9):
/// records are inserted directly in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealState {
    Requesting,
    Ready,
    WaitSrc,
    WaitDst,
    Healing,
    Closing,
}

/// HealEvent ∈ {SrcDown, SrcUp, DstDown, DstUp, Timeout} (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealEvent {
    SrcDown,
    SrcUp,
    DstDown,
    DstUp,
    Timeout,
}

/// A background task attached to a `ConnectionRecord` — a liveness watcher
/// (§4.3). The record that owns it joins it on teardown; nothing else holds
/// the `JoinHandle` (§9 resource-ownership: "destruction joins them").
pub struct WatcherHandle {
    stop: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    pub fn new(stop: CancellationToken, task: tokio::task::JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    /// Signal the watcher to exit without emitting, then wait for it to
    /// actually finish. Joining (not just signalling) is what the "watchers
    /// are joined before the record is removed" invariant requires.
    pub async fn stop_and_join(self) {
        self.stop.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                tracing::warn!(?err, "liveness watcher task panicked");
            }
        }
    }
}

/// A read-only, cloneable view of a `ConnectionRecord` for event broadcast.
/// Deliberately excludes `next`/`origin`/watchers/timers: those are this
/// actor's private wiring, not part of what an observer is entitled to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub conn_id: ConnId,
    pub last_actor_id: ActorId,
    pub state: HealState,
}

/// Per-connection, per-actor record (§3). Not `Clone`: it exclusively owns
/// its watcher tasks (§9), which don't implement `Clone`. Observers receive
/// a `ConnectionSnapshot` instead (see `snapshot`).
pub struct ConnectionRecord {
    pub conn_id: ConnId,
    /// Tail of the chain. Known as soon as the record exists: set from the
    /// returned `Connection` on insert, and refreshed whenever `Healing`
    /// re-establishes downstream.
    pub last_actor_id: ActorId,
    pub state: HealState,
    pub request: Request,
    /// The downstream peer chosen at establishment. `None` iff this actor is
    /// the tail of the route (§3 invariant).
    pub next: Option<Arc<dyn ActorHandle>>,
    /// Cancels a pending `WaitSrc` timer when set (§4.4). A `CancellationToken`
    /// rather than a one-shot notify: the timer task's `cancelled()` wait
    /// resolves immediately even if the reset fires before that task has
    /// reached its `select!`, so there is no order dependency between the
    /// timer being spawned and the handler that may cancel it.
    pub reset_wait_src: Option<CancellationToken>,
    /// Cancels a pending `WaitDst` timer when set (§4.4).
    pub reset_wait_dst: Option<CancellationToken>,
    /// 0-2 liveness watchers: one per non-null neighbor (§4.3, §9).
    watchers: Vec<WatcherHandle>,
}

impl ConnectionRecord {
    /// A freshly-established record, always starts in `Ready` (§4.4).
    pub fn new(
        conn_id: ConnId,
        last_actor_id: ActorId,
        request: Request,
        next: Option<Arc<dyn ActorHandle>>,
    ) -> Self {
        Self {
            conn_id,
            last_actor_id,
            state: HealState::Ready,
            request,
            next,
            reset_wait_src: None,
            reset_wait_dst: None,
            watchers: Vec::new(),
        }
    }

    pub fn connection(&self) -> Connection {
        Connection {
            conn_id: self.conn_id.clone(),
            last_actor_id: self.last_actor_id.clone(),
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            conn_id: self.conn_id.clone(),
            last_actor_id: self.last_actor_id.clone(),
            state: self.state,
        }
    }

    /// Take ownership of a newly spawned liveness watcher.
    pub fn attach_watcher(&mut self, watcher: WatcherHandle) {
        self.watchers.push(watcher);
    }

    /// Stop and join every watcher attached to this record. Must complete
    /// before the record's slot is freed (§3 invariant, §4.2).
    pub async fn join_watchers(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.stop_and_join().await;
        }
    }
}
