//! Response collector - one supervisor per in-flight transfer
//!
//! A supervisor ticks progress to the aggregator until the transfer resolves, then sends exactly
//! one terminal update. The terminal signal always wins over a pending tick.

use std::io;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;

use crate::aggregator::Update;
use crate::error::TransferError;
use crate::request::TransferRequest;
use crate::worker::TransferHandle;

/// Fan out supervisors until the response channel closes, then wait for all of them
pub(crate) async fn run_collector(
    mut responses: mpsc::Receiver<TransferHandle>,
    updates: mpsc::Sender<Update>,
    progress_interval: Duration,
    retry_limit: u32,
) {
    let supervisors = TaskTracker::new();
    while let Some(handle) = responses.recv().await {
        supervisors.spawn(supervise(
            handle,
            updates.clone(),
            progress_interval,
            retry_limit,
        ));
    }
    drop(updates);
    supervisors.close();
    supervisors.wait().await;
    debug!("collector_exit");
}

async fn supervise(
    handle: TransferHandle,
    updates: mpsc::Sender<Update>,
    progress_interval: Duration,
    retry_limit: u32,
) {
    let TransferHandle {
        request,
        progress,
        mut outcome,
    } = handle;
    let path = request.item.path.clone();

    let mut ticker = interval_at(Instant::now() + progress_interval, progress_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let result = loop {
        tokio::select! {
            biased;
            res = &mut outcome => {
                break res.unwrap_or_else(|_| {
                    Err(TransferError::Io(io::Error::other("transfer abandoned by worker")))
                });
            }
            _ = ticker.tick() => {
                let update = Update::Progress {
                    path: path.clone(),
                    fraction: progress.fraction(),
                    bytes: progress.bytes(),
                };
                if updates.send(update).await.is_err() {
                    return;
                }
            }
        }
    };

    let _ = updates.send(classify(&request, result, retry_limit)).await;
}

/// Terminal classification, in priority order: cancelled, transient (retry), permanent, success
pub(crate) fn classify(
    request: &TransferRequest,
    result: Result<u64, TransferError>,
    retry_limit: u32,
) -> Update {
    let mut item = request.item.clone();
    let error = match result {
        Ok(_) => return Update::Succeeded { item },
        Err(e) => e,
    };

    if error.is_cancelled() || request.cancel.is_cancelled() {
        return Update::Cancelled { item };
    }

    if item.retry_count < retry_limit {
        item.retry_count += 1;
        info!(
            "transfer_retry: {} attempt={} error={}",
            item.path, item.retry_count, error
        );
        Update::Retry {
            item,
            error: error.to_string(),
        }
    } else {
        info!(
            "transfer_failed: {} after {} retries error={}",
            item.path, item.retry_count, error
        );
        Update::Failed {
            item,
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestFactory;
    use crate::types::{ExpectedDigest, WorkItem};
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    fn request(retry_count: u32, cancel: CancellationToken) -> TransferRequest {
        let factory = RequestFactory::new(PathBuf::from("/tmp/m"), "http://h", cancel, None);
        let mut item = WorkItem::new(
            "a.bin",
            11,
            ExpectedDigest::new("sha1", "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"),
        );
        item.retry_count = retry_count;
        factory.build(item).unwrap()
    }

    fn digest_error() -> TransferError {
        TransferError::DigestMismatch {
            algorithm: "sha1",
            expected: "aa".into(),
            actual: "bb".into(),
        }
    }

    #[test]
    fn success_is_terminal() {
        let req = request(0, CancellationToken::new());
        assert!(matches!(classify(&req, Ok(11), 5), Update::Succeeded { .. }));
    }

    #[test]
    fn cancellation_wins_over_error_class() {
        let token = CancellationToken::new();
        let req = request(0, token.clone());
        token.cancel();
        assert!(matches!(
            classify(&req, Err(digest_error()), 5),
            Update::Cancelled { .. }
        ));
        let req = request(0, CancellationToken::new());
        assert!(matches!(
            classify(&req, Err(TransferError::Cancelled), 5),
            Update::Cancelled { .. }
        ));
    }

    #[test]
    fn failures_below_limit_are_retried() {
        let req = request(4, CancellationToken::new());
        match classify(&req, Err(digest_error()), 5) {
            Update::Retry { item, .. } => assert_eq!(item.retry_count, 5),
            _ => panic!("expected retry"),
        }
    }

    #[test]
    fn failure_at_limit_is_permanent() {
        let req = request(5, CancellationToken::new());
        match classify(&req, Err(digest_error()), 5) {
            Update::Failed { item, .. } => assert_eq!(item.retry_count, 5),
            _ => panic!("expected permanent failure"),
        }
    }

    #[test]
    fn size_mismatch_is_transient() {
        let req = request(0, CancellationToken::new());
        let err = TransferError::SizeMismatch {
            expected: 11,
            actual: 3,
        };
        assert!(matches!(classify(&req, Err(err), 5), Update::Retry { .. }));
    }
}
