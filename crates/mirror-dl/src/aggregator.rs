//! Update aggregator - the single owner of counters, active slots and queue completion
//!
//! Every supervisor and submitter reports here through the bounded update channel. Nothing else
//! mutates [`RunCounters`] or [`ActiveSlots`], so neither needs a lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{RequestError, StorageError};
use crate::queue::WorkQueue;
use crate::request::{RequestFactory, TransferRequest};
use crate::slots::ActiveSlots;
use crate::types::{EngineEvent, EventSink, RunProgress, WorkItem};

/// Message consumed by the aggregator
#[derive(Debug)]
pub(crate) enum Update {
    Progress {
        path: String,
        fraction: f64,
        bytes: u64,
    },
    Cancelled {
        item: WorkItem,
    },
    /// Transient failure; `item.retry_count` already incremented
    Retry {
        item: WorkItem,
        error: String,
    },
    Succeeded {
        item: WorkItem,
    },
    Failed {
        item: WorkItem,
        error: String,
    },
    /// The request could not be built
    Rejected {
        item: WorkItem,
        error: RequestError,
    },
}

/// Called once when the run reaches its completion condition, with the failure count
pub(crate) type Finisher = Box<dyn FnOnce(u64) + Send>;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RunCounters {
    pub total_files: u64,
    pub total_size: u64,
    pub downloaded_files: u64,
    pub downloaded_size: u64,
    pub failed_files: u64,
}

impl RunCounters {
    pub fn is_finished(&self) -> bool {
        self.downloaded_files + self.failed_files >= self.total_files
    }

    pub fn record_success(&mut self, size: u64) {
        self.downloaded_files += 1;
        self.downloaded_size += size;
    }

    pub fn record_failure(&mut self) {
        self.failed_files += 1;
    }

    pub fn overall_progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.is_finished() { 1.0 } else { 0.0 };
        }
        (self.downloaded_size as f64 / self.total_size as f64).min(1.0)
    }

    pub fn snapshot(&self, speed_bytes_per_sec: f64) -> RunProgress {
        RunProgress {
            downloaded_size: self.downloaded_size,
            downloaded_files: self.downloaded_files,
            failed_files: self.failed_files,
            total_files: self.total_files,
            total_size: self.total_size,
            speed_bytes_per_sec,
            overall_progress: self.overall_progress(),
        }
    }
}

/// Owner of the request channel's sending side. Closing is a `take`, so any number of callers may
/// close and exactly one of them actually drops the sender.
pub(crate) struct RequestGate {
    tx: Mutex<Option<mpsc::Sender<TransferRequest>>>,
}

impl RequestGate {
    pub fn new(tx: mpsc::Sender<TransferRequest>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    pub async fn sender(&self) -> Option<mpsc::Sender<TransferRequest>> {
        self.tx.lock().await.clone()
    }

    /// Returns true for the caller that closed it
    pub async fn close(&self) -> bool {
        self.tx.lock().await.take().is_some()
    }
}

/// Run-scoped state shared by the aggregator and the new-request submitters
pub(crate) struct RunContext {
    pub queue: Arc<dyn WorkQueue>,
    pub factory: RequestFactory,
    pub gate: RequestGate,
    pub cancel: CancellationToken,
    /// Weak so the update channel closes once the collector and all submitters are gone
    pub updates: mpsc::WeakSender<Update>,
    /// Every task that may still send on the request channel
    pub submitters: TaskTracker,
    pub retry_delay: Duration,
    pub sink: Arc<dyn EventSink>,
}

impl RunContext {
    /// Build a request for a claimed item and hand it to the worker pool
    pub async fn submit(&self, item: WorkItem) {
        let request = match self.factory.build(item.clone()) {
            Ok(request) => request,
            Err(error) => {
                self.reject(item, error).await;
                return;
            }
        };
        let Some(tx) = self.gate.sender().await else {
            debug!("submit_gate_closed: {}", item.path);
            self.release(&item).await;
            return;
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => self.release(&item).await,
            res = tx.send(request) => {
                if res.is_err() {
                    self.release(&item).await;
                }
            }
        }
    }

    /// Claim one more item unless the run is shutting down
    pub async fn pull_next(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        match self.queue.claim_next().await {
            Ok(Some(item)) => self.submit(item).await,
            Ok(None) => debug!("queue_drained"),
            Err(e) => self.storage_failure("claim_next", &e),
        }
    }

    /// Resubmit after the retry delay. When the run is cancelled meanwhile, drop the claim and
    /// close the request channel instead.
    pub async fn retry_later(&self, item: WorkItem) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.release(&item).await;
                if self.gate.close().await {
                    debug!("request_gate_closed_by_retry: {}", item.path);
                }
            }
            _ = tokio::time::sleep(self.retry_delay) => self.submit(item).await,
        }
    }

    async fn reject(&self, item: WorkItem, error: RequestError) {
        error!("request_rejected: {}", error);
        match self.updates.upgrade() {
            Some(tx) => {
                let _ = tx.send(Update::Rejected { item, error }).await;
            }
            None => warn!("request_rejected_unreported: {}", item.path),
        }
    }

    pub async fn release(&self, item: &WorkItem) {
        if let Err(e) = self.queue.release_claim(item).await {
            self.storage_failure("release_claim", &e);
        }
    }

    pub fn storage_failure(&self, op: &str, err: &StorageError) {
        error!("storage_failure: op={} error={}", op, err);
        self.sink.emit(EngineEvent::StorageFailure {
            message: format!("{}: {}", op, err),
        });
    }
}

pub(crate) struct Aggregator {
    ctx: Arc<RunContext>,
    counters: RunCounters,
    slots: ActiveSlots,
    /// Last reported byte count of each in-flight transfer, for speed deltas
    in_flight: HashMap<String, u64>,
    deltas: mpsc::Sender<u64>,
    speed: watch::Receiver<f64>,
    finisher: Option<Finisher>,
}

impl Aggregator {
    pub fn new(
        ctx: Arc<RunContext>,
        counters: RunCounters,
        active_slots: usize,
        deltas: mpsc::Sender<u64>,
        speed: watch::Receiver<f64>,
        finisher: Finisher,
    ) -> Self {
        Self {
            ctx,
            counters,
            slots: ActiveSlots::new(active_slots),
            in_flight: HashMap::new(),
            deltas,
            speed,
            finisher: Some(finisher),
        }
    }

    /// Consume updates until every sender is gone
    pub async fn run(mut self, mut updates: mpsc::Receiver<Update>) {
        self.publish_progress();
        self.check_finished().await;

        while let Some(update) = updates.recv().await {
            self.handle(update).await;
        }
        debug!(
            "aggregator_exit: downloaded={} failed={} total={}",
            self.counters.downloaded_files, self.counters.failed_files, self.counters.total_files
        );
    }

    async fn handle(&mut self, update: Update) {
        match update {
            Update::Progress {
                path,
                fraction,
                bytes,
            } => {
                self.track_bytes(&path, bytes).await;
                self.show(&path, fraction, bytes, false);
            }
            Update::Cancelled { item } => {
                self.in_flight.remove(&item.path);
                self.ctx.release(&item).await;
            }
            Update::Retry { item, error } => {
                self.in_flight.remove(&item.path);
                self.ctx.sink.emit(EngineEvent::ItemFailed {
                    path: item.path.clone(),
                    error,
                    permanent: false,
                });
                self.schedule_retry(item).await;
            }
            Update::Succeeded { item } => {
                self.track_bytes(&item.path, item.size).await;
                self.in_flight.remove(&item.path);
                self.show(&item.path, 1.0, item.size, true);
                match self.ctx.queue.complete(&item).await {
                    Ok(()) => self.counters.record_success(item.size),
                    Err(e) => {
                        // Not recorded as done, so the next run fetches it again
                        self.ctx.storage_failure("complete", &e);
                        self.counters.record_failure();
                    }
                }
                self.after_terminal().await;
            }
            Update::Failed { item, error } => {
                let bytes = self.in_flight.remove(&item.path).unwrap_or(0);
                let fraction = if item.size == 0 {
                    0.0
                } else {
                    bytes as f64 / item.size as f64
                };
                self.show(&item.path, fraction, bytes, true);
                self.ctx.sink.emit(EngineEvent::ItemFailed {
                    path: item.path,
                    error,
                    permanent: true,
                });
                self.counters.record_failure();
                self.after_terminal().await;
            }
            Update::Rejected { item, error } => {
                self.ctx.sink.emit(EngineEvent::ItemFailed {
                    path: item.path,
                    error: error.to_string(),
                    permanent: true,
                });
                self.counters.record_failure();
                self.after_terminal().await;
            }
        }
    }

    async fn after_terminal(&mut self) {
        self.publish_progress();
        if !self.check_finished().await {
            self.pull_next();
        }
    }

    async fn track_bytes(&mut self, path: &str, bytes: u64) {
        let previous = self.in_flight.insert(path.to_string(), bytes).unwrap_or(0);
        let delta = bytes.saturating_sub(previous);
        if delta > 0 {
            let _ = self.deltas.send(delta).await;
        }
    }

    fn show(&mut self, path: &str, fraction: f64, bytes: u64, done: bool) {
        if let Some(index) = self.slots.apply(path, fraction, bytes, done) {
            if let Some(slot) = self.slots.get(index) {
                self.ctx.sink.emit(EngineEvent::SlotChanged {
                    index,
                    slot: slot.clone(),
                });
            }
        }
    }

    fn publish_progress(&self) {
        let speed = *self.speed.borrow();
        self.ctx
            .sink
            .emit(EngineEvent::Progress(self.counters.snapshot(speed)));
    }

    async fn schedule_retry(&mut self, item: WorkItem) {
        if self.ctx.cancel.is_cancelled() {
            self.ctx.release(&item).await;
            self.ctx.gate.close().await;
            return;
        }
        let ctx = self.ctx.clone();
        self.ctx.submitters.spawn(async move {
            ctx.retry_later(item).await;
        });
    }

    fn pull_next(&self) {
        if self.ctx.cancel.is_cancelled() {
            return;
        }
        let ctx = self.ctx.clone();
        self.ctx.submitters.spawn(async move {
            ctx.pull_next().await;
        });
    }

    /// Run the finishing sequence once the completion condition holds
    async fn check_finished(&mut self) -> bool {
        if !self.counters.is_finished() {
            return false;
        }
        let Some(finish) = self.finisher.take() else {
            return true;
        };
        info!(
            "run_finished: downloaded={} failed={} total={}",
            self.counters.downloaded_files, self.counters.failed_files, self.counters.total_files
        );
        if let Err(e) = self.ctx.queue.release_all_claims().await {
            self.ctx.storage_failure("release_all_claims", &e);
        }
        self.ctx.cancel.cancel();
        finish(self.counters.failed_files);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(total: u64, downloaded: u64, failed: u64) -> RunCounters {
        RunCounters {
            total_files: total,
            total_size: total * 100,
            downloaded_files: downloaded,
            downloaded_size: downloaded * 100,
            failed_files: failed,
        }
    }

    #[test]
    fn finished_when_downloaded_plus_failed_reaches_total() {
        assert!(!counters(12, 10, 1).is_finished());
        assert!(counters(12, 11, 1).is_finished());
        assert!(counters(0, 0, 0).is_finished());
    }

    #[test]
    fn recording_updates_counters() {
        let mut c = counters(3, 0, 0);
        c.record_success(100);
        c.record_success(100);
        c.record_failure();
        assert_eq!(c.downloaded_files, 2);
        assert_eq!(c.downloaded_size, 200);
        assert_eq!(c.failed_files, 1);
        assert!(c.is_finished());
    }

    #[test]
    fn overall_progress_uses_bytes() {
        let c = counters(4, 1, 0);
        assert_eq!(c.overall_progress(), 0.25);
        let empty = RunCounters::default();
        assert_eq!(empty.overall_progress(), 1.0);
        let pending = RunCounters {
            total_files: 2,
            ..RunCounters::default()
        };
        assert_eq!(pending.overall_progress(), 0.0);
    }

    #[test]
    fn snapshot_carries_speed() {
        let snap = counters(2, 1, 1).snapshot(512.0);
        assert_eq!(snap.speed_bytes_per_sec, 512.0);
        assert_eq!(snap.failed_files, 1);
        assert_eq!(snap.overall_progress, 0.5);
    }

    #[tokio::test]
    async fn gate_closes_exactly_once() {
        let (tx, mut rx) = mpsc::channel::<TransferRequest>(1);
        let gate = RequestGate::new(tx);
        assert!(gate.sender().await.is_some());
        assert!(gate.close().await);
        assert!(!gate.close().await);
        assert!(gate.sender().await.is_none());
        assert!(rx.recv().await.is_none());
    }
}
