//! Persistent work queue contract
//!
//! The engine never talks to a database directly. A store implements this trait and is shared as
//! `Arc<dyn WorkQueue>`; it must serialize access to its backing state so that claims are exclusive.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{EmptyDir, Overview, WorkItem};

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn overview(&self) -> Result<Overview, StorageError>;

    /// Sum of sizes of items already marked done
    async fn downloaded_size(&self) -> Result<u64, StorageError>;

    async fn downloaded_files(&self) -> Result<u64, StorageError>;

    /// Atomically claim the lowest-ordinal item that is neither done nor taken.
    /// `Ok(None)` means nothing is left to claim.
    async fn claim_next(&self) -> Result<Option<WorkItem>, StorageError>;

    /// Claim up to `limit` items at once. Not safe for concurrent callers.
    async fn claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, StorageError>;

    /// Mark the item done. Idempotent.
    async fn complete(&self, item: &WorkItem) -> Result<(), StorageError>;

    /// Drop the claim without marking the item done
    async fn release_claim(&self, item: &WorkItem) -> Result<(), StorageError>;

    async fn release_all_claims(&self) -> Result<(), StorageError>;

    /// Clear done and taken flags for every file and directory
    async fn reset_all(&self) -> Result<(), StorageError>;

    /// Next directory not yet materialized. `Ok(None)` when drained.
    async fn claim_next_dir(&self) -> Result<Option<EmptyDir>, StorageError>;

    async fn mark_dir_done(&self, dir: &EmptyDir) -> Result<(), StorageError>;
}
