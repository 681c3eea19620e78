//! [`WorkQueue`] implementation over the index database

use super::IndexDb;
use async_trait::async_trait;
use mirror_dl::{EmptyDir, Overview, StorageError, WorkItem, WorkQueue};

#[async_trait]
impl WorkQueue for IndexDb {
    async fn overview(&self) -> Result<Overview, StorageError> {
        IndexDb::overview(self).await.map_err(StorageError)
    }

    async fn downloaded_size(&self) -> Result<u64, StorageError> {
        IndexDb::downloaded_size(self).await.map_err(StorageError)
    }

    async fn downloaded_files(&self) -> Result<u64, StorageError> {
        IndexDb::downloaded_files(self).await.map_err(StorageError)
    }

    async fn claim_next(&self) -> Result<Option<WorkItem>, StorageError> {
        self.claim_next_file().await.map_err(StorageError)
    }

    async fn claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, StorageError> {
        self.claim_file_batch(limit).await.map_err(StorageError)
    }

    async fn complete(&self, item: &WorkItem) -> Result<(), StorageError> {
        self.complete_file(&item.path).await.map_err(StorageError)
    }

    async fn release_claim(&self, item: &WorkItem) -> Result<(), StorageError> {
        self.release_file(&item.path).await.map_err(StorageError)
    }

    async fn release_all_claims(&self) -> Result<(), StorageError> {
        self.release_all_files()
            .await
            .map(|_| ())
            .map_err(StorageError)
    }

    async fn reset_all(&self) -> Result<(), StorageError> {
        self.reset_files().await.map_err(StorageError)?;
        self.reset_empty_dirs().await.map_err(StorageError)
    }

    async fn claim_next_dir(&self) -> Result<Option<EmptyDir>, StorageError> {
        self.next_empty_dir().await.map_err(StorageError)
    }

    async fn mark_dir_done(&self, dir: &EmptyDir) -> Result<(), StorageError> {
        self.mark_empty_dir_done(&dir.path)
            .await
            .map_err(StorageError)
    }
}
