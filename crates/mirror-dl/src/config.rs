use std::path::PathBuf;
use std::time::Duration;

/// Parallel fetchers
pub const DEFAULT_WORKERS: usize = 4;
/// Inbound request channel capacity
pub const REQUEST_CAPACITY: usize = 10;
/// Outbound response channel capacity
pub const RESPONSE_CAPACITY: usize = 4;
/// Aggregator update channel capacity
pub const UPDATE_CAPACITY: usize = 4;
/// Items claimed and submitted when a run starts
pub const INITIAL_BATCH: usize = 10;
/// Failures tolerated before an item is counted as failed
pub const RETRY_LIMIT: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
/// UI-visible transfer trackers
pub const ACTIVE_SLOTS: usize = 4;
pub const SPEED_WINDOW: usize = 7;
pub const SPEED_MIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub install_root: PathBuf,
    pub base_url: String,
    /// Global bandwidth cap in bytes per second, 0 = unlimited
    pub rate_limit: u64,
    pub workers: usize,
    pub request_capacity: usize,
    pub response_capacity: usize,
    pub update_capacity: usize,
    pub initial_batch: usize,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub progress_interval: Duration,
    pub active_slots: usize,
    pub speed_window: usize,
    pub speed_min_interval: Duration,
}

impl EngineConfig {
    pub fn new(install_root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            install_root: install_root.into(),
            base_url: base_url.into(),
            rate_limit: 0,
            workers: DEFAULT_WORKERS,
            request_capacity: REQUEST_CAPACITY,
            response_capacity: RESPONSE_CAPACITY,
            update_capacity: UPDATE_CAPACITY,
            initial_batch: INITIAL_BATCH,
            retry_limit: RETRY_LIMIT,
            retry_delay: RETRY_DELAY,
            progress_interval: PROGRESS_INTERVAL,
            active_slots: ACTIVE_SLOTS,
            speed_window: SPEED_WINDOW,
            speed_min_interval: SPEED_MIN_INTERVAL,
        }
    }

    /// Each worker's share of the global budget, `None` when unlimited
    pub fn per_worker_rate(&self) -> Option<u64> {
        if self.rate_limit == 0 {
            return None;
        }
        Some((self.rate_limit / self.workers.max(1) as u64).max(1))
    }
}
