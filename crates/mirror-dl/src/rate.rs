//! Per-worker byte pacing
//!
//! Each worker gets `global_rate / workers` bytes per second. Before a chunk of `n` bytes is
//! released the limiter sleeps `n / allotment` seconds. There is no live reconfiguration: a new
//! rate takes effect on the next run.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    bytes_per_sec: u64,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
        }
    }

    pub fn delay_for(&self, bytes: usize) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_sec as f64)
    }

    /// Sleep long enough to keep `bytes` within the allotment
    pub async fn acquire(&self, bytes: usize) {
        tokio::time::sleep(self.delay_for(bytes)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_proportional_to_chunk_size() {
        let limiter = RateLimiter::new(1000);
        assert_eq!(limiter.delay_for(500), Duration::from_millis(500));
        assert_eq!(limiter.delay_for(2000), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_sleeps_for_the_allotment() {
        let limiter = RateLimiter::new(1024);
        let start = tokio::time::Instant::now();
        limiter.acquire(512).await;
        limiter.acquire(512).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
