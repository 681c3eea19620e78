//! Directory materializer - low-priority drain of the empty-directory queue

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::queue::WorkQueue;
use crate::request::safe_relative_path;
use crate::types::{EngineEvent, EventSink};

/// Create every pending empty directory under `install_root`, stopping on cancellation,
/// an empty queue or a storage failure
pub(crate) async fn run_dir_materializer(
    queue: Arc<dyn WorkQueue>,
    install_root: PathBuf,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
) {
    let mut created = 0usize;
    while !cancel.is_cancelled() {
        let dir = match queue.claim_next_dir().await {
            Ok(Some(dir)) => dir,
            Ok(None) => break,
            Err(e) => {
                error!("storage_failure: op=claim_next_dir error={}", e);
                sink.emit(EngineEvent::StorageFailure {
                    message: format!("claim_next_dir: {}", e),
                });
                break;
            }
        };

        let Some(relative) = safe_relative_path(&dir.path) else {
            warn!("empty_dir_skipped: unsafe path {}", dir.path);
            if let Err(e) = queue.mark_dir_done(&dir).await {
                error!("storage_failure: op=mark_dir_done error={}", e);
            }
            continue;
        };
        if let Err(e) = tokio::fs::create_dir_all(install_root.join(relative)).await {
            // Left pending; the next run tries again
            warn!("empty_dir_failed: {} error={}", dir.path, e);
            break;
        }
        if let Err(e) = queue.mark_dir_done(&dir).await {
            error!("storage_failure: op=mark_dir_done error={}", e);
            sink.emit(EngineEvent::StorageFailure {
                message: format!("mark_dir_done: {}", e),
            });
            break;
        }
        created += 1;
    }
    if created > 0 {
        info!("empty_dirs_created: {}", created);
    }
    debug!("dir_materializer_exit");
}
