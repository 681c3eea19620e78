use std::path::Path;

use anyhow::anyhow;
use serde::Serialize;

use crate::db::IndexDb;
use crate::reporter::format_bytes;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub base_url: String,
    pub total_files: u64,
    pub total_size: u64,
    pub downloaded_files: u64,
    pub downloaded_size: u64,
    pub pending_files: u64,
    pub pending_dirs: u64,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({})", self.name, self.base_url)?;
        writeln!(
            f,
            "  files: {}/{} done, {} pending",
            self.downloaded_files, self.total_files, self.pending_files
        )?;
        writeln!(
            f,
            "  size:  {}/{}",
            format_bytes(self.downloaded_size),
            format_bytes(self.total_size)
        )?;
        write!(f, "  empty directories pending: {}", self.pending_dirs)
    }
}

pub async fn status(root: &Path) -> anyhow::Result<StatusReport> {
    let index = IndexDb::open_in(root)
        .await
        .map_err(|e| anyhow!("opening index: {}", e))?;
    let report = async {
        let overview = index.overview().await?;
        Ok::<_, crate::db::DbError>(StatusReport {
            name: overview.name,
            base_url: overview.base_url,
            total_files: overview.total_files,
            total_size: overview.total_size,
            downloaded_files: index.downloaded_files().await?,
            downloaded_size: index.downloaded_size().await?,
            pending_files: index.pending_count().await?,
            pending_dirs: index.pending_dir_count().await?,
        })
    }
    .await
    .map_err(|e| anyhow!("reading index: {}", e))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_renders_sizes() {
        let report = StatusReport {
            name: "Archive".into(),
            base_url: "https://cdn.example.org".into(),
            total_files: 10,
            total_size: 3 * 1024 * 1024,
            downloaded_files: 4,
            downloaded_size: 1024 * 1024,
            pending_files: 6,
            pending_dirs: 2,
        };
        let text = report.to_string();
        assert!(text.contains("4/10 done, 6 pending"));
        assert!(text.contains("1.0MB/3.0MB"));
        assert!(text.contains("empty directories pending: 2"));
    }
}
