//! Clock context trait for channel-switch stations.

use async_trait::async_trait;
use std::time::Duration;

/// The central interface for time.
///
/// The protocol state machines receive `now` as a plain argument; this trait
/// is what the drivers consult to produce it. It lets the same dispatch loop
/// run against real time or a virtual clock.
///
/// # Implementations
///
/// - **Real time**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait SwitchContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In real time: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (for logging/debugging).
    ///
    /// Real-time contexts are not seeded and return 0.
    fn seed(&self) -> u64;
}
