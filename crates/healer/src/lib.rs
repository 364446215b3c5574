//! The per-actor healing state machine (§4.4) — table-driven transitions
//! plus entry handlers, serialized behind a single bounded event queue.
//!
//! Grounded on the Go original's `CloseHealer` (`transitions`/`handlers`
//! maps driven by a single-consumer `eventCh`) and on the teacher's
//! listener loop (`tokio::select!` racing a `CancellationToken` against
//! real work) for the `serve(stop)` shape.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use async_trait::async_trait;
use healmesh_core::config::TIMER_POLL_INTERVAL;
use healmesh_core::{
    ActorHandle, Clock, ConnId, EmitJoin, HealEvent, HealState, HealerHandle, MeshConfig,
};
use healmesh_store::ConnectionStore;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// The result of looking up (current state, event) in the transition table.
enum Transition {
    /// A declared combination: move to the named state (possibly the same
    /// one, for the `Ready + SrcUp -> Ready` idempotent-reconnect case).
    Apply(HealState),
    /// A declared combination that leaves the state unchanged and runs no
    /// handler (the "—" cells of the table).
    Ignore,
}

/// (state, event) -> Transition, for the four states that have a row in the
/// table. `Requesting` and `Closing` have none: any event arriving for a
/// record in either is a design bug (§7), not a reachable runtime outcome —
/// `Closing`'s handler deletes the record before the Healer loop can see
/// another event for the same conn_id, and `Requesting` is never entered.
#[allow(clippy::panic)]
fn next_state(state: HealState, event: HealEvent) -> Transition {
    use HealEvent::*;
    use HealState::*;
    use Transition::*;

    match (state, event) {
        (Ready, SrcDown) => Apply(WaitSrc),
        (Ready, SrcUp) => Apply(Ready),
        (Ready, DstDown) => Apply(WaitDst),
        (Ready, DstUp) | (Ready, Timeout) => Ignore,

        (WaitSrc, SrcUp) => Apply(Healing),
        (WaitSrc, Timeout) => Apply(Closing),
        (WaitSrc, SrcDown) | (WaitSrc, DstDown) | (WaitSrc, DstUp) => Ignore,

        (WaitDst, DstUp) => Apply(Healing),
        (WaitDst, Timeout) => Apply(Closing),
        (WaitDst, SrcDown) | (WaitDst, SrcUp) | (WaitDst, DstDown) => Ignore,

        (Healing, DstUp) => Apply(Ready),
        (Healing, SrcDown) | (Healing, SrcUp) | (Healing, DstDown) | (Healing, Timeout) => Ignore,

        (Requesting, _) | (Closing, _) => {
            panic!("heal event {event:?} delivered to a record in {state:?}, which has no transition table entry")
        }
    }
}

/// Wait until `timeout` has elapsed according to `clock`, or until `stop` is
/// cancelled, whichever comes first. Returns `true` on timeout, `false` on
/// cancellation. `clock` decides *whether* the deadline has passed; the
/// actual suspension between checks is a real `tokio::time::sleep` of
/// `TIMER_POLL_INTERVAL`, so a `FakeClock` test only has to wait out a
/// handful of those polls rather than the real timeout duration.
async fn wait_timer<C: Clock>(clock: C, timeout: std::time::Duration, stop: CancellationToken) -> bool {
    let deadline = clock.now() + timeout;
    loop {
        if clock.now() >= deadline {
            return true;
        }
        tokio::select! {
            _ = stop.cancelled() => return false,
            _ = tokio::time::sleep(TIMER_POLL_INTERVAL) => {}
        }
    }
}

/// An event sitting in a Healer's queue, paired with the signal fired once
/// it's been fully processed. Opaque to callers outside this crate — they
/// only ever see it pass through `Healer::channel`/`HealerTask::new`.
pub struct QueuedEvent {
    event: HealEvent,
    conn_id: ConnId,
    done: oneshot::Sender<()>,
}

/// Cheap, cloneable handle to an actor's Healer. This is what
/// `healmesh-liveness` watchers and `healmesh-actor`'s public API hold;
/// the event loop itself lives in the paired [`HealerTask`].
pub struct Healer {
    tx: mpsc::Sender<QueuedEvent>,
}

impl Healer {
    /// Build a connected `(handle, task)` pair. `capacity` is normally
    /// `healmesh_core::config::HEALER_QUEUE_CAPACITY`.
    pub fn channel(capacity: usize) -> (Arc<Healer>, mpsc::Receiver<QueuedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Healer { tx }), rx)
    }
}

#[async_trait]
impl HealerHandle for Healer {
    async fn emit(&self, event: HealEvent, conn_id: ConnId) -> EmitJoin {
        let (done, join) = oneshot::channel();
        if self
            .tx
            .send(QueuedEvent { event, conn_id: conn_id.clone(), done })
            .await
            .is_err()
        {
            tracing::debug!(%conn_id, ?event, "healer has stopped; event dropped");
            let (stub_tx, stub_rx) = oneshot::channel();
            let _ = stub_tx.send(());
            return stub_rx;
        }
        join
    }
}

/// Owns the receiving end of a Healer's event queue and the collaborators
/// its handlers need. `run` is the `serve(stop)` loop of §4.4.
///
/// Generic over `Clock` rather than a `dyn Clock` object: `Clock: Clone` to
/// let timer tasks carry their own copy, which rules out a trait object.
pub struct HealerTask<C: Clock> {
    rx: mpsc::Receiver<QueuedEvent>,
    handle: Arc<Healer>,
    store: Arc<ConnectionStore>,
    clock: C,
    config: MeshConfig,
}

impl<C: Clock> HealerTask<C> {
    pub fn new(
        rx: mpsc::Receiver<QueuedEvent>,
        handle: Arc<Healer>,
        store: Arc<ConnectionStore>,
        clock: C,
        config: MeshConfig,
    ) -> Self {
        Self { rx, handle, store, clock, config }
    }

    /// Run until `stop` fires. Pending queued events are discarded on stop;
    /// their join signals are never fired, which is fine — nothing is still
    /// waiting on them once the owning actor is being torn down.
    pub async fn run(mut self, stop: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                queued = self.rx.recv() => {
                    let Some(queued) = queued else { return };
                    self.process(queued.event, queued.conn_id).await;
                    let _ = queued.done.send(());
                }
            }
        }
    }

    async fn process(&self, event: HealEvent, conn_id: ConnId) {
        let Ok(old_state) = self.store.peek(&conn_id, |r| r.state) else {
            tracing::warn!(%conn_id, ?event, "event for unknown connection; dropped");
            return;
        };

        let new_state = match next_state(old_state, event) {
            Transition::Apply(s) => s,
            Transition::Ignore => {
                tracing::trace!(%conn_id, ?event, ?old_state, "no-op heal transition");
                return;
            }
        };

        tracing::info!(%conn_id, ?event, from = ?old_state, to = ?new_state, "heal transition");
        if self.store.mutate(&conn_id, |r| r.state = new_state).await.is_err() {
            return;
        }

        match new_state {
            HealState::WaitSrc => self.enter_wait_src(conn_id).await,
            HealState::WaitDst => self.enter_wait_dst(conn_id).await,
            HealState::Closing => self.enter_closing(conn_id).await,
            HealState::Healing => self.enter_healing(conn_id).await,
            HealState::Ready | HealState::Requesting => {}
        }
    }

    async fn enter_wait_src(&self, conn_id: ConnId) {
        let stop = CancellationToken::new();
        if self
            .store
            .mutate(&conn_id, |r| r.reset_wait_src = Some(stop.clone()))
            .await
            .is_err()
        {
            return;
        }
        self.spawn_timer(conn_id, self.config.wait_src_timeout, stop);
    }

    async fn enter_wait_dst(&self, conn_id: ConnId) {
        let stop = CancellationToken::new();
        if self
            .store
            .mutate(&conn_id, |r| r.reset_wait_dst = Some(stop.clone()))
            .await
            .is_err()
        {
            return;
        }
        self.spawn_timer(conn_id, self.config.wait_dst_timeout, stop);
    }

    fn spawn_timer(&self, conn_id: ConnId, timeout: std::time::Duration, stop: CancellationToken) {
        let healer = self.handle.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            if wait_timer(clock, timeout, stop).await {
                let _ = healer.emit(HealEvent::Timeout, conn_id).await;
            }
        });
    }

    /// Propagate teardown to both neighbors, not only `next`: a record can
    /// enter `Closing` from a `WaitDst` timeout (downstream neighbor died)
    /// just as easily as from a `WaitSrc` timeout (upstream neighbor died),
    /// and in either case the *other* neighbor's own record for this
    /// conn_id is now stale and must be torn down too, or a chain longer
    /// than two hops never fully unwinds. `close` on a neighbor that has
    /// already deleted its own record, or is already dead, is a no-op.
    async fn enter_closing(&self, conn_id: ConnId) {
        let neighbors = self
            .store
            .peek(&conn_id, |r| (r.next.clone(), r.request.origin.clone()));
        if let Ok((next, origin)) = neighbors {
            if let Some(next) = next {
                next.close(conn_id.clone()).await;
            }
            if let Some(origin) = origin {
                origin.close(conn_id.clone()).await;
            }
        }
        self.store.delete(&conn_id, false).await;
    }

    async fn enter_healing(&self, conn_id: ConnId) {
        if let Ok(Some(stop)) = self.store.mutate(&conn_id, |r| r.reset_wait_src.take()).await {
            stop.cancel();
        }

        let Ok((request, next)) = self.store.peek(&conn_id, |r| (r.request.clone(), r.next.clone())) else {
            return;
        };
        let Some(next) = next else {
            return;
        };

        match next.request(request).await {
            Ok(conn) => {
                let _ = self
                    .store
                    .mutate(&conn_id, |r| r.last_actor_id = conn.last_actor_id.clone())
                    .await;
                let _ = self.handle.emit(HealEvent::DstUp, conn_id).await;
            }
            Err(err) => {
                tracing::warn!(%conn_id, %err, "downstream re-request failed during healing; record left stuck");
            }
        }
    }
}
