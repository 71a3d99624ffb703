//! Real-time implementation of SwitchContext using Tokio.

use crate::SwitchContext;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Real-time context backed by Tokio.
///
/// Time comes from the system monotonic clock. Used to pace an event loop
/// against wall-clock time so a run can be watched as it happens.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwitchContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn seed(&self) -> u64 {
        // Real time is not seeded
        0
    }
}
