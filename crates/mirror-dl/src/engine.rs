//! Lifecycle controller - channel creation, task launch and the ordered drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use reqwest::Client;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::aggregator::{Aggregator, Finisher, RequestGate, RunContext, RunCounters};
use crate::collector::run_collector;
use crate::config::EngineConfig;
use crate::dirs::run_dir_materializer;
use crate::error::EngineError;
use crate::queue::WorkQueue;
use crate::request::RequestFactory;
use crate::speed::{run_speed_tracker, SpeedSampler};
use crate::types::{EngineEvent, EventSink};
use crate::worker::{run_worker, RequestReceiver};

/// Byte deltas buffered between the aggregator and the speed tracker
const DELTA_CAPACITY: usize = 64;

/// Handle to the download engine. Cheap to clone; all clones control the same runs.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Mutex<EngineConfig>,
    queue: Arc<dyn WorkQueue>,
    sink: Arc<dyn EventSink>,
    client: Client,
    /// `Some` while running. Held for the whole start and the whole drain.
    run: Mutex<Option<RunHandle>>,
    generation: AtomicU64,
}

/// Everything one run spawned, in shutdown order
struct RunHandle {
    generation: u64,
    ctx: Arc<RunContext>,
    dirs_cancel: CancellationToken,
    workers: TaskTracker,
    collector: JoinHandle<()>,
    aggregator: JoinHandle<()>,
    speed: JoinHandle<()>,
    dirs: JoinHandle<()>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        queue: Arc<dyn WorkQueue>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        let client = Client::builder().build()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config: Mutex::new(config),
                queue,
                sink,
                client,
                run: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }

    pub async fn is_running(&self) -> bool {
        self.inner.run.lock().await.is_some()
    }

    pub async fn config(&self) -> EngineConfig {
        self.inner.config.lock().await.clone()
    }

    /// Start a run. No-op when already running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            debug!("engine_start: already running");
            return Ok(());
        }

        let config = self.inner.config.lock().await.clone();
        let queue = self.inner.queue.clone();
        let sink = self.inner.sink.clone();

        let overview = queue.overview().await?;
        let counters = RunCounters {
            total_files: overview.total_files,
            total_size: overview.total_size,
            downloaded_files: queue.downloaded_files().await?,
            downloaded_size: queue.downloaded_size().await?,
            failed_files: 0,
        };
        let base_url = if config.base_url.is_empty() {
            overview.base_url.clone()
        } else {
            config.base_url.clone()
        };
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "engine_start: {} generation={} files={}/{} rate_limit={}",
            overview.name,
            generation,
            counters.downloaded_files,
            counters.total_files,
            config.rate_limit
        );

        let cancel = CancellationToken::new();
        let (request_tx, request_rx) = mpsc::channel(config.request_capacity.max(1));
        let (response_tx, response_rx) = mpsc::channel(config.response_capacity.max(1));
        let (update_tx, update_rx) = mpsc::channel(config.update_capacity.max(1));
        let (delta_tx, delta_rx) = mpsc::channel(DELTA_CAPACITY);
        let (speed_tx, speed_rx) = watch::channel(0.0);

        let ctx = Arc::new(RunContext {
            queue: queue.clone(),
            factory: RequestFactory::new(
                config.install_root.clone(),
                &base_url,
                cancel.clone(),
                config.per_worker_rate(),
            ),
            gate: RequestGate::new(request_tx),
            cancel: cancel.clone(),
            updates: update_tx.downgrade(),
            submitters: TaskTracker::new(),
            retry_delay: config.retry_delay,
            sink: sink.clone(),
        });

        let workers = TaskTracker::new();
        let requests: RequestReceiver = Arc::new(Mutex::new(request_rx));
        for id in 0..config.workers.max(1) {
            workers.spawn(run_worker(
                id,
                self.inner.client.clone(),
                requests.clone(),
                response_tx.clone(),
            ));
        }
        workers.close();
        // Workers own the response channel; it closes when the last one exits
        drop(response_tx);

        let collector = tokio::spawn(run_collector(
            response_rx,
            update_tx,
            config.progress_interval,
            config.retry_limit,
        ));
        let speed = tokio::spawn(run_speed_tracker(
            delta_rx,
            SpeedSampler::new(config.speed_window, config.speed_min_interval),
            speed_tx,
            sink.clone(),
        ));
        let aggregator = Aggregator::new(
            ctx.clone(),
            counters,
            config.active_slots,
            delta_tx,
            speed_rx,
            self.finisher(generation),
        );
        let aggregator = tokio::spawn(aggregator.run(update_rx));
        let dirs_cancel = CancellationToken::new();
        let dirs = tokio::spawn(run_dir_materializer(
            queue.clone(),
            config.install_root.clone(),
            dirs_cancel.clone(),
            sink.clone(),
        ));

        // An empty seed would leave nothing to pull the next item
        let seeded = queue.claim_batch(config.initial_batch.max(1)).await;
        *run = Some(RunHandle {
            generation,
            ctx: ctx.clone(),
            dirs_cancel,
            workers,
            collector,
            aggregator,
            speed,
            dirs,
        });
        sink.emit(EngineEvent::StateChanged { running: true });

        match seeded {
            Ok(batch) => {
                debug!("initial_batch: {} items", batch.len());
                for item in batch {
                    ctx.submit(item).await;
                }
                Ok(())
            }
            Err(e) => {
                ctx.storage_failure("claim_batch", &e);
                drop(run);
                self.shutdown(false, Some(generation)).await;
                Err(e.into())
            }
        }
    }

    /// Stop the current run and wait for every task to exit. No-op when stopped.
    /// `skip_cancel` is for callers that already cancelled the run.
    pub async fn stop(&self, skip_cancel: bool) {
        self.shutdown(skip_cancel, None).await;
    }

    /// Change the global bandwidth cap. A running engine is stopped, drained and restarted.
    pub async fn set_rate_limit(&self, bytes_per_sec: u64) -> Result<(), EngineError> {
        let was_running = self.is_running().await;
        if was_running {
            self.stop(false).await;
        }
        self.inner.config.lock().await.rate_limit = bytes_per_sec;
        info!("rate_limit_changed: {} bytes/s", bytes_per_sec);
        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    /// Forget all progress and download everything again
    pub async fn repair(&self) -> Result<(), EngineError> {
        info!("engine_repair");
        self.stop(false).await;
        self.inner.queue.reset_all().await?;
        self.start().await
    }

    fn finisher(&self, generation: u64) -> Finisher {
        let weak = Arc::downgrade(&self.inner);
        let sink = self.inner.sink.clone();
        Box::new(move |failures| {
            tokio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    Engine { inner }.shutdown(true, Some(generation)).await;
                }
                info!("engine_finished: failures={}", failures);
                sink.emit(EngineEvent::Finished { failures });
            });
        })
    }

    /// Ordered drain. A channel is only closed once nothing can send on it any more.
    async fn shutdown(&self, skip_cancel: bool, generation: Option<u64>) {
        let mut run = self.inner.run.lock().await;
        let current = match run.as_ref() {
            Some(handle) => handle.generation,
            None => return,
        };
        if generation.is_some_and(|g| g != current) {
            return;
        }
        let Some(handle) = run.take() else {
            return;
        };
        info!(
            "engine_stop: generation={} skip_cancel={}",
            handle.generation, skip_cancel
        );

        if !skip_cancel {
            handle.ctx.cancel.cancel();
            handle.dirs_cancel.cancel();
        }

        handle.ctx.submitters.close();
        handle.ctx.submitters.wait().await;
        handle.ctx.gate.close().await;

        handle.workers.wait().await;
        if let Err(e) = handle.collector.await {
            error!("collector_join: {}", e);
        }
        if let Err(e) = handle.aggregator.await {
            error!("aggregator_join: {}", e);
        }
        if let Err(e) = handle.speed.await {
            error!("speed_tracker_join: {}", e);
        }
        if let Err(e) = handle.dirs.await {
            error!("dir_materializer_join: {}", e);
        }

        // Nothing holds a claim any more. Items that failed for good this run become
        // claimable again, so the next start counts them.
        if let Err(e) = handle.ctx.queue.release_all_claims().await {
            handle.ctx.storage_failure("release_all_claims", &e);
        }

        debug!("engine_stopped: generation={}", handle.generation);
        self.inner
            .sink
            .emit(EngineEvent::StateChanged { running: false });
    }
}
