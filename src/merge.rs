//! Assembles fetched chunks into the destination file.

use std::io;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::chunk::ChunkStorage;
use crate::error::DownloadResult;
use crate::package::DownloadPackage;

/// Append every chunk, in start-offset order, into the destination file.
///
/// No seeking: the chunks tile the resource contiguously, so a strict
/// in-order append reproduces it exactly. Each on-disk temp file is
/// removed right after its bytes are copied; in-memory buffers stay with
/// their chunks until the package is cleared.
///
/// Pre-flight removed any stale destination, so the append starts from an
/// empty file.
pub(crate) async fn merge_package(package: &mut DownloadPackage) -> DownloadResult<()> {
    let begun = std::time::Instant::now();
    package.chunks.sort_by_key(|c| c.start());

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&package.destination)
        .await?;
    let mut writer = BufWriter::new(file);

    for chunk in &mut package.chunks {
        debug_assert!(chunk.is_filled());
        match &chunk.storage {
            ChunkStorage::Memory { data: Some(buffer) } => {
                writer.write_all(buffer).await?;
            }
            ChunkStorage::Disk { path: Some(path) } => {
                let mut source = File::open(path).await?;
                tokio::io::copy(&mut source, &mut writer).await?;
            }
            ChunkStorage::Memory { data: None } | ChunkStorage::Disk { path: None } => {
                return Err(io::Error::other(format!(
                    "chunk {} has no storage to merge",
                    chunk.id()
                ))
                .into());
            }
        }
    }

    writer.flush().await?;

    for chunk in &mut package.chunks {
        if matches!(chunk.storage, ChunkStorage::Disk { .. }) {
            chunk.release_storage().await;
        }
    }

    debug!(
        destination = %package.destination.display(),
        bytes = package.total_size,
        chunks = package.chunks.len(),
        elapsed_ms = begun.elapsed().as_millis() as u64,
        "merged chunks into destination"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::plan_chunks;
    use reqwest::Url;

    fn package_at(dir: &std::path::Path) -> DownloadPackage {
        DownloadPackage::new(
            Url::parse("http://test.invalid/out.bin").unwrap(),
            dir.join("out.bin"),
        )
    }

    #[tokio::test]
    async fn test_merge_memory_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = package_at(dir.path());
        package.total_size = 10;
        package.chunks = plan_chunks(10, 2, 0, true);
        package.chunks[0].fill(&[0, 1, 2, 3, 4]);
        package.chunks[1].fill(&[5, 6, 7, 8, 9]);
        // Out-of-order chunk list must not matter.
        package.chunks.reverse();

        merge_package(&mut package).await.unwrap();

        let merged = tokio::fs::read(&package.destination).await.unwrap();
        assert_eq!(merged, (0u8..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_merge_disk_chunks_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = package_at(dir.path());
        package.total_size = 8;
        package.chunks = plan_chunks(8, 2, 0, false);

        let mut temp_paths = Vec::new();
        for (i, chunk) in package.chunks.iter_mut().enumerate() {
            let path = chunk.ensure_temp_file(dir.path(), ".tmp").await.unwrap();
            let bytes: Vec<u8> = (0..4).map(|b| (i * 4 + b) as u8).collect();
            tokio::fs::write(&path, &bytes).await.unwrap();
            chunk.advance(4);
            temp_paths.push(path);
        }

        merge_package(&mut package).await.unwrap();

        let merged = tokio::fs::read(&package.destination).await.unwrap();
        assert_eq!(merged, (0u8..8).collect::<Vec<_>>());
        for path in temp_paths {
            assert!(!path.exists(), "temp file should be gone after merge");
        }
    }

    #[tokio::test]
    async fn test_merge_without_storage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = package_at(dir.path());
        package.total_size = 4;
        package.chunks = plan_chunks(4, 1, 0, true);
        package.chunks[0].position = 4; // filled cursor, no buffer

        assert!(merge_package(&mut package).await.is_err());
    }
}
