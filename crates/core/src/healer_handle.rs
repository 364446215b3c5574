//! The seam between watchers/timers and the actor's Healer (§4.4).
//!
//! Kept as a trait in `healmesh-core`, the same way `ActorHandle` is, so
//! `healmesh-liveness` (and anything else that needs to post heal events)
//! can depend on the event-sink *shape* without depending on the whole
//! Healer implementation crate.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::ids::ConnId;
use crate::model::HealEvent;

/// Resolves once the Healer has fully processed the event it was handed out
/// for. Callers that don't need causal ordering (e.g. a liveness watcher
/// reporting a death) are free to drop it without awaiting.
pub type EmitJoin = oneshot::Receiver<()>;

#[async_trait]
pub trait HealerHandle: Send + Sync {
    /// Enqueue `event` for `conn_id`. If `conn_id` is absent from the
    /// store when the Healer dequeues it, the event is logged and dropped
    /// with the join signal still completed (§4.4).
    async fn emit(&self, event: HealEvent, conn_id: ConnId) -> EmitJoin;
}
