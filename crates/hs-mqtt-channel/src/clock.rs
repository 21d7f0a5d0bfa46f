//! Monotonic tick source and delay abstraction.
//!
//! The session manager never calls `tokio::time` directly so tests can
//! drive elapsed time by hand (see `mock::ManualClock`).

use async_trait::async_trait;
use tokio::time::Instant;

/// Monotonic millisecond counter plus a bounded delay.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never decreases.
    fn now_ms(&self) -> u64;

    /// Wait for `ms` milliseconds.
    async fn sleep_ms(&self, ms: u64);
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_advances_tokio_clock() {
        let clock = TokioClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.sleep_ms(1_500).await;
        assert_eq!(clock.now_ms(), 1_500);
    }
}
