//! Simulation context implementing SwitchContext for deterministic testing.

use async_trait::async_trait;
use chanswitch_env::SwitchContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Simulation context backed by a virtual clock.
///
/// Time only moves when the event loop advances it, so a run is a pure
/// function of its seed. Clones share the same clock.
#[derive(Debug, Clone)]
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<AtomicU64>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        self.virtual_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Moves the clock forward to `at`; never moves it backwards.
    pub fn advance_to(&self, at: Duration) {
        self.virtual_time_ns
            .fetch_max(at.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.load(Ordering::SeqCst)
    }

    /// Derives an independent seed for one subsystem (oracle, link noise...).
    pub fn derive_seed(&self, stream: u64) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15) ^ stream.wrapping_mul(0x517cc1b727220a95)
    }
}

#[async_trait]
impl SwitchContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping in simulation is just moving the clock
        self.advance_time(duration);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_advance_to_is_monotonic() {
        let ctx = SimContext::new(1);
        ctx.advance_to(Duration::from_millis(200));
        ctx.advance_to(Duration::from_millis(100));
        assert_eq!(ctx.now(), Duration::from_millis(200));
    }

    #[test]
    fn test_derived_seeds_are_deterministic() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);
        assert_eq!(ctx1.derive_seed(1), ctx2.derive_seed(1));
        assert_ne!(ctx1.derive_seed(1), ctx1.derive_seed(2));
        assert_ne!(ctx1.derive_seed(1), SimContext::new(43).derive_seed(1));
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.seed(), 42);
    }

    #[tokio::test]
    async fn test_sleep_advances_clock() {
        let ctx = SimContext::new(7);
        ctx.sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.now(), Duration::from_millis(20));
    }
}
