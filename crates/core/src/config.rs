//! Tunable knobs named in §6. Everything else in the design is fixed.

use std::time::Duration;

/// Capacity of a single `ConnectionStore` subscriber's event queue (§4.2).
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

/// Capacity of a Healer's event queue (§5: "capacity 1 in the reference design").
pub const HEALER_QUEUE_CAPACITY: usize = 1;

/// How often a `WaitSrc`/`WaitDst` timer re-checks its deadline against the
/// injected `Clock`. Real wall-clock wait per poll, independent of whatever
/// time the `Clock` reports — this is what lets a `FakeClock`-driven test
/// observe a timeout after a handful of these ticks instead of the real
/// `WaitSrcTimeout`/`WaitDstTimeout` duration.
pub const TIMER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for a single actor's Healer.
///
/// Constructed explicitly by the embedder (there is no file or environment
/// loader in scope) and threaded into [`healmesh_actor::Actor::new`] /
/// the Healer constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshConfig {
    /// How long a connection waits in `WaitSrc` before closing (§4.4).
    pub wait_src_timeout: Duration,
    /// How long a connection waits in `WaitDst` before closing (§4.4).
    pub wait_dst_timeout: Duration,
}

impl MeshConfig {
    pub const DEFAULT_WAIT_DST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_WAIT_SRC_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            wait_src_timeout: Self::DEFAULT_WAIT_SRC_TIMEOUT,
            wait_dst_timeout: Self::DEFAULT_WAIT_DST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.wait_src_timeout, Duration::from_secs(10));
        assert_eq!(cfg.wait_dst_timeout, Duration::from_secs(5));
        assert_eq!(cfg.wait_src_timeout, cfg.wait_dst_timeout * 2);
    }
}
