//! Concurrent, class-indexed directory of live actors (§4.1).
//!
//! Grounded on the teacher's single-readers-writer-lock discipline (actors
//! only ever append; lookups read, with an eager-removal sweep escalating to
//! a write lock when dead entries are found).

#![cfg_attr(test, allow(clippy::unwrap_used))]

use healmesh_core::{ActorHandle, ClassName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide directory mapping class names to their registered actors,
/// in registration order.
#[derive(Default)]
pub struct Registry {
    by_class: RwLock<HashMap<ClassName, Vec<Arc<dyn ActorHandle>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `actor` to its class's directory. Idempotent only in the sense
    /// that an actor is expected to call this once, at startup (§4.1); calling
    /// it twice appends a duplicate entry.
    pub fn register(&self, actor: Arc<dyn ActorHandle>) {
        let class = actor.meta().class.clone();
        tracing::debug!(actor_id = %actor.id(), %class, "registering actor");
        self.by_class.write().entry(class).or_default().push(actor);
    }

    /// Live actors of `class`, in registration order. The Registry eagerly
    /// drops actors it discovers are dead at lookup time (§4.1 resolved open
    /// question) rather than leaving tombstones for callers to filter.
    pub fn find_by_class(&self, class: &ClassName) -> Vec<Arc<dyn ActorHandle>> {
        {
            let guard = self.by_class.read();
            let Some(actors) = guard.get(class) else {
                return Vec::new();
            };
            if actors.iter().all(|a| a.is_alive()) {
                return actors.clone();
            }
        }
        let mut guard = self.by_class.write();
        let Some(actors) = guard.get_mut(class) else {
            return Vec::new();
        };
        actors.retain(|a| a.is_alive());
        actors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use healmesh_core::{Connection, MeshError, Request};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeActor {
        meta: healmesh_core::ActorMeta,
        alive: AtomicBool,
    }

    impl FakeActor {
        fn new(id: &str, class: &str) -> Arc<Self> {
            Arc::new(Self {
                meta: healmesh_core::ActorMeta {
                    id: id.into(),
                    class: class.into(),
                    node: "n1".into(),
                    network_holder: false,
                },
                alive: AtomicBool::new(true),
            })
        }

        fn kill(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ActorHandle for FakeActor {
        fn meta(&self) -> &healmesh_core::ActorMeta {
            &self.meta
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn request(&self, _req: Request) -> Result<Connection, MeshError> {
            unimplemented!("not exercised by registry tests")
        }

        async fn close(&self, _conn_id: healmesh_core::ConnId) {}

        async fn liveness(&self) {}
    }

    #[test]
    fn find_by_class_returns_registration_order() {
        let registry = Registry::new();
        let a = FakeActor::new("a", "nsc");
        let b = FakeActor::new("b", "nsc");
        registry.register(a.clone());
        registry.register(b.clone());

        let found = registry.find_by_class(&"nsc".into());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id(), a.id());
        assert_eq!(found[1].id(), b.id());
    }

    #[test]
    fn find_by_class_is_empty_for_unknown_class() {
        let registry = Registry::new();
        assert!(registry.find_by_class(&"nsc".into()).is_empty());
    }

    #[test]
    fn find_by_class_eagerly_drops_dead_actors() {
        let registry = Registry::new();
        let a = FakeActor::new("a", "nsc");
        let b = FakeActor::new("b", "nsc");
        registry.register(a.clone());
        registry.register(b.clone());

        a.kill();
        let found = registry.find_by_class(&"nsc".into());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), b.id());

        // The dead actor was actually removed, not just filtered this call.
        assert_eq!(registry.by_class.read().get(&"nsc".into()).unwrap().len(), 1);
    }
}
