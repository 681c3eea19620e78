//! Worker pool - streaming fetch with incremental verification

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::TransferError;
use crate::request::TransferRequest;

/// Write buffer size for downloads (2 MB) - reduces I/O operations
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Live byte counter of one transfer, read by its supervisor
#[derive(Debug)]
pub(crate) struct TransferProgress {
    bytes: AtomicU64,
    total: u64,
}

impl TransferProgress {
    pub(crate) fn new(total: u64) -> Self {
        Self {
            bytes: AtomicU64::new(0),
            total,
        }
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.bytes() as f64 / self.total as f64).min(1.0)
    }

    fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

/// Emitted by a worker as soon as a transfer starts
pub(crate) struct TransferHandle {
    pub request: Arc<TransferRequest>,
    pub progress: Arc<TransferProgress>,
    /// Resolves once with the verified byte count or the failure
    pub outcome: oneshot::Receiver<Result<u64, TransferError>>,
}

pub(crate) type RequestReceiver = Arc<Mutex<mpsc::Receiver<TransferRequest>>>;

/// Take requests until the request channel is closed and drained
pub(crate) async fn run_worker(
    id: usize,
    client: Client,
    requests: RequestReceiver,
    responses: mpsc::Sender<TransferHandle>,
) {
    loop {
        let next = {
            let mut rx = requests.lock().await;
            rx.recv().await
        };
        let Some(request) = next else {
            break;
        };

        let request = Arc::new(request);
        let progress = Arc::new(TransferProgress::new(request.expected_size));
        let (done_tx, done_rx) = oneshot::channel();
        let handle = TransferHandle {
            request: request.clone(),
            progress: progress.clone(),
            outcome: done_rx,
        };
        if responses.send(handle).await.is_err() {
            warn!(
                "worker_response_closed: {} dropping {}",
                id, request.item.path
            );
            break;
        }

        let result = transfer_file(&client, &request, &progress).await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                debug!("worker_transfer_failed: {} {} error={}", id, request.item.path, e);
            }
        }
        let _ = done_tx.send(result);
    }
    debug!("worker_exit: {}", id);
}

/// Fetch one file into its destination. A failure after the destination was created removes it,
/// so an interrupted file always restarts from byte zero.
pub(crate) async fn transfer_file(
    client: &Client,
    request: &TransferRequest,
    progress: &TransferProgress,
) -> Result<u64, TransferError> {
    let cancel = &request.cancel;
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        res = client.get(request.url.clone()).send() => res?,
    };
    if !response.status().is_success() {
        return Err(TransferError::HttpStatus(response.status()));
    }

    // Create parent directories if needed
    if let Some(parent) = request.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = File::create(&request.destination).await?;

    let result = stream_to_file(response, file, request, progress).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&request.destination).await;
    }
    result
}

async fn stream_to_file(
    response: reqwest::Response,
    file: File,
    request: &TransferRequest,
    progress: &TransferProgress,
) -> Result<u64, TransferError> {
    let cancel = &request.cancel;
    let expected = request.expected_size;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let mut verifier = request.verifier();
    let limiter = request.limiter();
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        if let Some(limiter) = &limiter {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = limiter.acquire(chunk.len()) => {}
            }
        }

        written += chunk.len() as u64;
        if written > expected {
            return Err(TransferError::SizeMismatch {
                expected,
                actual: written,
            });
        }
        verifier.update(&chunk);
        writer.write_all(&chunk).await?;
        progress.set(written);
    }

    writer.flush().await?;

    if written != expected {
        return Err(TransferError::SizeMismatch {
            expected,
            actual: written,
        });
    }
    verifier
        .finish()
        .map_err(|(expected, actual)| TransferError::DigestMismatch {
            algorithm: request.algorithm.name(),
            expected,
            actual,
        })?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_handles_zero_total() {
        let progress = TransferProgress::new(0);
        assert_eq!(progress.fraction(), 0.0);
    }

    #[test]
    fn fraction_tracks_bytes() {
        let progress = TransferProgress::new(200);
        progress.set(50);
        assert_eq!(progress.bytes(), 50);
        assert_eq!(progress.fraction(), 0.25);
    }
}
