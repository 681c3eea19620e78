//! Smoothed throughput estimate from byte deltas

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::{mpsc, watch};

use crate::types::{EngineEvent, EventSink};

/// Ring of the last `window` throughput samples. A sample is taken once at least
/// `min_interval` has passed since the previous one.
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    samples: VecDeque<f64>,
    window: usize,
    min_interval: Duration,
    total_bytes: u64,
    last_total: u64,
    last_at: Instant,
}

impl SpeedSampler {
    pub fn new(window: usize, min_interval: Duration) -> Self {
        Self::starting_at(window, min_interval, Instant::now())
    }

    pub fn starting_at(window: usize, min_interval: Duration, now: Instant) -> Self {
        Self {
            samples: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            min_interval,
            total_bytes: 0,
            last_total: 0,
            last_at: now,
        }
    }

    /// Add a byte delta observed at `now`. Returns the new average when a sample was taken.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        self.total_bytes += bytes;
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return None;
        }
        let delta = self.total_bytes - self.last_total;
        self.last_total = self.total_bytes;
        self.last_at = now;

        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(delta as f64 / elapsed.as_secs_f64());
        Some(self.average())
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn samples(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

/// Owns the sampler for one run. Publishes the average to `speed_tx` and the sink, and
/// resets the displayed speed to zero when the delta channel closes.
pub(crate) async fn run_speed_tracker(
    mut deltas: mpsc::Receiver<u64>,
    mut sampler: SpeedSampler,
    speed_tx: watch::Sender<f64>,
    sink: Arc<dyn EventSink>,
) {
    while let Some(bytes) = deltas.recv().await {
        if let Some(avg) = sampler.record(bytes, Instant::now()) {
            let _ = speed_tx.send(avg);
            sink.emit(EngineEvent::Speed { bytes_per_sec: avg });
        }
    }
    debug!("speed_tracker: stopped");
    let _ = speed_tx.send(0.0);
    sink.emit(EngineEvent::Speed { bytes_per_sec: 0.0 });
}
