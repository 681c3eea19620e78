//! Manifest builder for a local reference tree

use std::path::Path;

use anyhow::{anyhow, Context};
use log::{debug, info};
use mirror_dl::{ContentHasher, DigestAlgorithm};
use tokio::io::AsyncReadExt;

use crate::db::{Manifest, ManifestFile};
use crate::reporter::format_bytes;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Walk `source` and describe every file and empty directory under it.
/// Paths are relative to `source` and always use `/`.
pub async fn build_manifest(
    source: &Path,
    name: &str,
    base_url: &str,
    algorithm: DigestAlgorithm,
) -> anyhow::Result<Manifest> {
    if !source.is_dir() {
        return Err(anyhow!("not a directory: {}", source.display()));
    }

    let mut files = Vec::new();
    let mut empty_dirs = Vec::new();
    let mut stack = vec![source.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("reading directory {}", current.display()))?;

        let mut empty = true;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("reading entry in {}", current.display()))?
        {
            empty = false;
            let path = entry.path();
            let metadata = tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("reading metadata of {}", path.display()))?;

            if metadata.is_dir() {
                stack.push(path);
            } else if metadata.is_file() {
                let relative = relative_path(source, &path)?;
                debug!("index_file: {} size={}", relative, metadata.len());
                files.push(ManifestFile {
                    digest: hash_file(&path, algorithm).await?,
                    path: relative,
                    size: metadata.len(),
                    algorithm: algorithm.name().to_string(),
                });
            }
        }
        if empty && current.as_path() != source {
            empty_dirs.push(relative_path(source, &current)?);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    empty_dirs.sort();

    Ok(Manifest {
        name: name.to_string(),
        base_url: base_url.to_string(),
        files,
        empty_dirs,
    })
}

/// Index `source` and write the manifest JSON to `out`
pub async fn index(
    source: &Path,
    out: &Path,
    name: Option<&str>,
    base_url: &str,
    algorithm: DigestAlgorithm,
) -> anyhow::Result<Manifest> {
    let name = match name {
        Some(name) => name.to_string(),
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mirror".to_string()),
    };
    let manifest = build_manifest(source, &name, base_url, algorithm).await?;

    let json = serde_json::to_string_pretty(&manifest)?;
    tokio::fs::write(out, json)
        .await
        .with_context(|| format!("writing manifest {}", out.display()))?;

    let total: u64 = manifest.files.iter().map(|f| f.size).sum();
    info!(
        "index_done: {} files={} empty_dirs={} out={}",
        manifest.name,
        manifest.files.len(),
        manifest.empty_dirs.len(),
        out.display()
    );
    println!(
        "Indexed {}: {} files ({}), {} empty directories -> {}",
        manifest.name,
        manifest.files.len(),
        format_bytes(total),
        manifest.empty_dirs.len(),
        out.display()
    );
    Ok(manifest)
}

fn relative_path(root: &Path, path: &Path) -> anyhow::Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

async fn hash_file(path: &Path, algorithm: DigestAlgorithm) -> anyhow::Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finish()))
}
