//! Time source used by the session manager and the polling loop

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of time and delays.
///
/// Injected so the relogin delay and the polling interval can run on
/// virtual time in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time, used for deadlines
    fn now(&self) -> Instant;

    /// Wall-clock time, used for token expiration
    fn utc_now(&self) -> DateTime<Utc>;

    /// Suspend the current task for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real time backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
