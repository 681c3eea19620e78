use super::{changes, count, now, DbResult, IndexDb};
use mirror_dl::{ExpectedDigest, WorkItem};
use serde::Serialize;
use turso::{Connection, Row};

/// One row of the file table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub size: i64,
    pub digest_algorithm: String,
    pub digest: String,
    pub done: bool,
    pub taken: bool,
}

/// Get SQL for creating the file table. `id` is the claim order.
pub fn get_table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        size INTEGER NOT NULL,
        digest_algorithm TEXT NOT NULL DEFAULT 'sha1',
        digest TEXT NOT NULL,
        done INTEGER NOT NULL DEFAULT 0,
        taken INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_files_pending ON files(done, taken);
    "
}

const ITEM_COLUMNS: &str = "id, path, size, digest_algorithm, digest";

fn item_from_row(row: &Row) -> DbResult<(i64, WorkItem)> {
    let id: i64 = row.get(0)?;
    let path: String = row.get(1)?;
    let size: i64 = row.get(2)?;
    let algorithm: String = row.get(3)?;
    let digest: String = row.get(4)?;
    Ok((
        id,
        WorkItem::new(path, size.max(0) as u64, ExpectedDigest::new(algorithm, digest)),
    ))
}

/// Insert or replace a file row; a replaced row starts over as not done
pub(crate) async fn upsert_file(
    conn: &Connection,
    path: &str,
    size: i64,
    algorithm: &str,
    digest: &str,
) -> DbResult<()> {
    conn.execute(
        "INSERT INTO files (path, size, digest_algorithm, digest, done, taken, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)
         ON CONFLICT (path) DO UPDATE SET
            size = ?2, digest_algorithm = ?3, digest = ?4, done = 0, taken = 0, updated_at = ?5",
        turso::params![path, size, algorithm, digest, now()],
    )
    .await?;
    Ok(())
}

impl IndexDb {
    pub async fn insert_file(
        &self,
        path: &str,
        size: u64,
        algorithm: &str,
        digest: &str,
    ) -> DbResult<()> {
        let conn = self.conn().await;
        upsert_file(&conn, path, size as i64, algorithm, digest).await
    }

    /// Claim the lowest-id file that is neither done nor taken.
    ///
    /// This is a SELECT followed by an UPDATE, not one statement. Exclusivity comes from the
    /// connection mutex held across both; the `taken = 0` guard on the UPDATE only makes a lost
    /// race visible as `changes() == 0`, which retries the search.
    pub async fn claim_next_file(&self) -> DbResult<Option<WorkItem>> {
        let conn = self.conn().await;
        loop {
            let mut rows = conn
                .query(
                    &format!(
                        "SELECT {} FROM files WHERE done = 0 AND taken = 0 ORDER BY id LIMIT 1",
                        ITEM_COLUMNS
                    ),
                    turso::params![],
                )
                .await?;
            let Some(row) = rows.next().await? else {
                return Ok(None);
            };
            let (id, item) = item_from_row(&row)?;
            drop(rows);

            conn.execute(
                "UPDATE files SET taken = 1, updated_at = ?1
                 WHERE id = ?2 AND done = 0 AND taken = 0",
                turso::params![now(), id],
            )
            .await?;
            if changes(&conn).await? == 1 {
                return Ok(Some(item));
            }
        }
    }

    /// Claim up to `limit` files. Only the run's initializing task calls this.
    pub async fn claim_file_batch(&self, limit: usize) -> DbResult<Vec<WorkItem>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM files WHERE done = 0 AND taken = 0 ORDER BY id LIMIT ?1",
                    ITEM_COLUMNS
                ),
                turso::params![limit as i64],
            )
            .await?;

        let mut claimed = Vec::new();
        while let Some(row) = rows.next().await? {
            claimed.push(item_from_row(&row)?);
        }
        drop(rows);

        let now = now();
        for (id, _) in &claimed {
            conn.execute(
                "UPDATE files SET taken = 1, updated_at = ?1 WHERE id = ?2",
                turso::params![now, *id],
            )
            .await?;
        }
        Ok(claimed.into_iter().map(|(_, item)| item).collect())
    }

    /// Mark done and drop the claim. Idempotent.
    pub async fn complete_file(&self, path: &str) -> DbResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE files SET done = 1, taken = 0, updated_at = ?1 WHERE path = ?2",
            turso::params![now(), path],
        )
        .await?;
        Ok(())
    }

    pub async fn release_file(&self, path: &str) -> DbResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE files SET taken = 0, updated_at = ?1 WHERE path = ?2",
            turso::params![now(), path],
        )
        .await?;
        Ok(())
    }

    /// Clear every claim, returning how many rows were taken
    pub async fn release_all_files(&self) -> DbResult<i64> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE files SET taken = 0 WHERE taken = 1",
            turso::params![],
        )
        .await?;
        changes(&conn).await
    }

    pub(crate) async fn reset_files(&self) -> DbResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE files SET done = 0, taken = 0, updated_at = ?1",
            turso::params![now()],
        )
        .await?;
        Ok(())
    }

    pub async fn downloaded_size(&self) -> DbResult<u64> {
        let conn = self.conn().await;
        let size = count(&conn, "SELECT IFNULL(SUM(size), 0) FROM files WHERE done = 1").await?;
        Ok(size.max(0) as u64)
    }

    pub async fn downloaded_files(&self) -> DbResult<u64> {
        let conn = self.conn().await;
        let files = count(&conn, "SELECT COUNT(*) FROM files WHERE done = 1").await?;
        Ok(files.max(0) as u64)
    }

    pub async fn taken_count(&self) -> DbResult<u64> {
        let conn = self.conn().await;
        let taken = count(&conn, "SELECT COUNT(*) FROM files WHERE taken = 1").await?;
        Ok(taken.max(0) as u64)
    }

    /// Files not yet done
    pub async fn pending_count(&self) -> DbResult<u64> {
        let conn = self.conn().await;
        let pending = count(&conn, "SELECT COUNT(*) FROM files WHERE done = 0").await?;
        Ok(pending.max(0) as u64)
    }

    pub async fn get_file(&self, path: &str) -> DbResult<Option<FileRecord>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT path, size, digest_algorithm, digest, done, taken FROM files WHERE path = ?1",
                turso::params![path],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let done: i64 = row.get(4)?;
            let taken: i64 = row.get(5)?;
            Ok(Some(FileRecord {
                path: row.get(0)?,
                size: row.get(1)?,
                digest_algorithm: row.get(2)?,
                digest: row.get(3)?,
                done: done != 0,
                taken: taken != 0,
            }))
        } else {
            Ok(None)
        }
    }
}
