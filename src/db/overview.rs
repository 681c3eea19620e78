use super::{DbResult, IndexDb};
use mirror_dl::Overview;

/// Get SQL for creating the overview table
pub fn get_table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS overview (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        total_files INTEGER NOT NULL DEFAULT 0,
        total_size INTEGER NOT NULL DEFAULT 0,
        base_url TEXT NOT NULL
    );
    "
}

impl IndexDb {
    /// Mirror description. Totals are always recomputed from the file table.
    pub async fn overview(&self) -> DbResult<Overview> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT name, base_url FROM overview WHERE id = 1",
                turso::params![],
            )
            .await?;
        let (name, base_url): (String, String) = match rows.next().await? {
            Some(row) => (row.get(0)?, row.get(1)?),
            None => return Err("index has no overview; import a manifest first".into()),
        };
        drop(rows);

        let mut rows = conn
            .query(
                "SELECT COUNT(*), IFNULL(SUM(size), 0) FROM files",
                turso::params![],
            )
            .await?;
        let (total_files, total_size): (i64, i64) = match rows.next().await? {
            Some(row) => (row.get(0)?, row.get(1)?),
            None => (0, 0),
        };

        Ok(Overview {
            name,
            total_files: total_files as u64,
            total_size: total_size as u64,
            base_url,
        })
    }

    pub async fn set_overview(&self, name: &str, base_url: &str) -> DbResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO overview (id, name, base_url) VALUES (1, ?1, ?2)
             ON CONFLICT (id) DO UPDATE SET name = ?1, base_url = ?2",
            turso::params![name, base_url],
        )
        .await?;
        Ok(())
    }

    /// Store the current file totals on the overview row
    pub(crate) async fn refresh_totals(&self) -> DbResult<()> {
        let conn = self.conn().await;
        let total_files = super::count(&conn, "SELECT COUNT(*) FROM files").await?;
        let total_size = super::count(&conn, "SELECT IFNULL(SUM(size), 0) FROM files").await?;
        conn.execute(
            "UPDATE overview SET total_files = ?1, total_size = ?2 WHERE id = 1",
            turso::params![total_files, total_size],
        )
        .await?;
        Ok(())
    }
}
