use log::info;
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};
use turso::{Builder, Connection};

// Custom error type for database operations
pub type DbError = Box<dyn std::error::Error + Send + Sync>;
pub type DbResult<T> = Result<T, DbError>;

pub mod empty_dirs;
pub mod files;
pub mod manifest;
pub mod overview;
mod queue;

pub use manifest::{Manifest, ManifestFile};

/// Index database file name inside the install root
pub const INDEX_FILE: &str = "mirror-index.sqlite";

/// SQLite index of everything the mirror must contain.
///
/// One connection behind a mutex: every query is serialized, which is what makes a claim exclusive.
pub struct IndexDb {
    conn: Mutex<Connection>,
}

impl IndexDb {
    /// Open (or create) the index, then clear claims left behind by a crashed process
    pub async fn open(db_path: &Path) -> DbResult<Self> {
        let path = db_path
            .to_str()
            .ok_or("database path is not valid UTF-8")?;
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        conn.execute_batch(&format!(
            "{}{}{}",
            overview::get_table_sql(),
            files::get_table_sql(),
            empty_dirs::get_table_sql()
        ))
        .await?;

        let index = Self {
            conn: Mutex::new(conn),
        };
        let cleared = index.release_all_files().await?;
        if cleared > 0 {
            info!("index_open: cleared {} stale claims", cleared);
        }
        Ok(index)
    }

    /// Open the index stored in `install_root`
    pub async fn open_in(install_root: &Path) -> DbResult<Self> {
        Self::open(&install_root.join(INDEX_FILE)).await
    }

    pub(crate) async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Rows touched by the previous statement on this connection
pub(crate) async fn changes(conn: &Connection) -> DbResult<i64> {
    let mut rows = conn.query("SELECT changes()", turso::params![]).await?;
    if let Some(row) = rows.next().await? {
        Ok(row.get(0)?)
    } else {
        Ok(0)
    }
}

/// First column of the first row, or 0
pub(crate) async fn count(conn: &Connection, sql: &str) -> DbResult<i64> {
    let mut rows = conn.query(sql, turso::params![]).await?;
    if let Some(row) = rows.next().await? {
        Ok(row.get(0)?)
    } else {
        Ok(0)
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
