//! The handle by which one actor calls another, and by which the Registry
//! and liveness watchers refer to actors without owning their lifetime.
//!
//! Defined as a trait (rather than threading the concrete `Actor` type
//! through `healmesh-registry`/`healmesh-liveness`) so those crates, and the
//! data model itself, don't depend on `healmesh-actor` — only `healmesh-actor`
//! depends on `healmesh-core`, never the reverse.

use crate::error::MeshError;
use crate::ids::{ActorId, ConnId};
use crate::model::{ActorMeta, Connection, Request};
use async_trait::async_trait;

/// A live (or formerly-live) actor, as seen by its peers.
///
/// The Registry holds these without extending the actor's lifetime: nothing
/// here keeps the actor's `run()` task alive, so `is_alive` can flip to
/// `false` out from under any holder at any time (§5, "weak references").
#[async_trait]
pub trait ActorHandle: Send + Sync {
    /// Immutable identity of this actor.
    fn meta(&self) -> &ActorMeta;

    /// Convenience accessor for `meta().id`.
    fn id(&self) -> &ActorId {
        &self.meta().id
    }

    /// Whether the actor is still alive right now. Racy by construction:
    /// the answer may be stale the instant it's returned.
    fn is_alive(&self) -> bool;

    /// Forward or establish a connection per §4.5.
    async fn request(&self, req: Request) -> Result<Connection, MeshError>;

    /// Tell this actor to tear down `conn_id` (emits `SrcDown` on its Healer).
    async fn close(&self, conn_id: ConnId);

    /// Resolves once this actor has been killed. Resolves immediately if it
    /// is already dead at the time of the call.
    async fn liveness(&self);
}
