//! Fixed-interval rate limiter for external-dependency adapters.
//!
//! Every adapter that talks to a globally rate-limited service (the content
//! origin, the AI provider) owns a [`Pacer`] and calls [`Pacer::pace`] before
//! each request. The delay is a hard sequencing step between sequential
//! calls, not an optimization; tests drive it under tokio's paused clock so
//! no real waiting happens.

use std::time::Duration;
use tokio::time::Instant;

/// Enforces a minimum interval between consecutive calls.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Sleep until at least `interval` has elapsed since the previous call.
    ///
    /// The first call returns immediately.
    pub async fn pace(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let mut pacer = Pacer::from_millis(500);
        let start = Instant::now();
        pacer.pace().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced() {
        let mut pacer = Pacer::from_millis(500);
        let start = Instant::now();
        pacer.pace().await;
        pacer.pace().await;
        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_counts_toward_interval() {
        let mut pacer = Pacer::from_millis(500);
        pacer.pace().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        let before = Instant::now();
        pacer.pace().await;
        // Only the remaining 100ms should be slept.
        assert_eq!(before.elapsed(), Duration::from_millis(100));
    }
}
