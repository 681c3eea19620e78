//! Local manifest import

use super::empty_dirs::upsert_empty_dir;
use super::files::upsert_file;
use super::{DbError, DbResult, IndexDb};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_algorithm() -> String {
    "sha1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub size: u64,
    pub digest: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

/// Everything the mirror must contain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    #[serde(default)]
    pub empty_dirs: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> DbResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl IndexDb {
    /// Replace the index contents with `manifest` in one transaction
    pub async fn import_manifest(&self, manifest: &Manifest) -> DbResult<()> {
        {
            let conn = self.conn().await;
            conn.execute("BEGIN TRANSACTION", ()).await?;

            let result = async {
                conn.execute("DELETE FROM files", ()).await?;
                conn.execute("DELETE FROM empty_dirs", ()).await?;
                conn.execute(
                    "INSERT INTO overview (id, name, base_url) VALUES (1, ?1, ?2)
                     ON CONFLICT (id) DO UPDATE SET name = ?1, base_url = ?2",
                    turso::params![manifest.name.clone(), manifest.base_url.clone()],
                )
                .await?;
                for file in &manifest.files {
                    upsert_file(
                        &conn,
                        &file.path,
                        file.size as i64,
                        &file.algorithm,
                        &file.digest,
                    )
                    .await?;
                }
                for dir in &manifest.empty_dirs {
                    upsert_empty_dir(&conn, dir).await?;
                }
                Ok::<(), DbError>(())
            }
            .await;

            if let Err(e) = result {
                // Rollback on error
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
            conn.execute("COMMIT", ()).await?;
        }
        self.refresh_totals().await?;

        info!(
            "manifest_imported: {} files={} empty_dirs={}",
            manifest.name,
            manifest.files.len(),
            manifest.empty_dirs.len()
        );
        Ok(())
    }
}
