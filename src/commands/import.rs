use std::path::Path;

use anyhow::{anyhow, Context};
use log::info;

use crate::db::{IndexDb, Manifest};
use crate::reporter::format_bytes;

/// Build the index inside `root` from a local manifest
pub async fn import(root: &Path, manifest_path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("creating install root {}", root.display()))?;
    let manifest = Manifest::load(manifest_path)
        .map_err(|e| anyhow!("loading manifest {}: {}", manifest_path.display(), e))?;

    let index = IndexDb::open_in(root)
        .await
        .map_err(|e| anyhow!("opening index: {}", e))?;
    index
        .import_manifest(&manifest)
        .await
        .map_err(|e| anyhow!("importing manifest: {}", e))?;

    let total: u64 = manifest.files.iter().map(|f| f.size).sum();
    info!("import_done: {} root={}", manifest.name, root.display());
    println!(
        "Imported {}: {} files ({}), {} empty directories",
        manifest.name,
        manifest.files.len(),
        format_bytes(total),
        manifest.empty_dirs.len()
    );
    Ok(())
}
