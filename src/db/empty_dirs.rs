use super::{count, DbResult, IndexDb};
use mirror_dl::EmptyDir;
use turso::Connection;

/// Get SQL for creating the empty directory table
pub fn get_table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS empty_dirs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        done INTEGER NOT NULL DEFAULT 0
    );
    "
}

pub(crate) async fn upsert_empty_dir(conn: &Connection, path: &str) -> DbResult<()> {
    conn.execute(
        "INSERT INTO empty_dirs (path, done) VALUES (?1, 0)
         ON CONFLICT (path) DO UPDATE SET done = 0",
        turso::params![path],
    )
    .await?;
    Ok(())
}

impl IndexDb {
    pub async fn insert_empty_dir(&self, path: &str) -> DbResult<()> {
        let conn = self.conn().await;
        upsert_empty_dir(&conn, path).await
    }

    /// First directory not yet materialized
    pub async fn next_empty_dir(&self) -> DbResult<Option<EmptyDir>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT path FROM empty_dirs WHERE done = 0 ORDER BY id LIMIT 1",
                turso::params![],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(EmptyDir { path: row.get(0)? }))
        } else {
            Ok(None)
        }
    }

    pub async fn mark_empty_dir_done(&self, path: &str) -> DbResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE empty_dirs SET done = 1 WHERE path = ?1",
            turso::params![path],
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn reset_empty_dirs(&self) -> DbResult<()> {
        let conn = self.conn().await;
        conn.execute("UPDATE empty_dirs SET done = 0", turso::params![])
            .await?;
        Ok(())
    }

    pub async fn pending_dir_count(&self) -> DbResult<u64> {
        let conn = self.conn().await;
        let pending = count(&conn, "SELECT COUNT(*) FROM empty_dirs WHERE done = 0").await?;
        Ok(pending.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::get_table_sql;

    #[test]
    fn empty_dirs_sql_contains_table() {
        let sql = get_table_sql();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS empty_dirs"));
        assert!(sql.contains("path TEXT NOT NULL UNIQUE"));
    }
}
