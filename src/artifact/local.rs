//! Local filesystem artifact repository (`file://` URIs).
//!
//! Writes stream into a temp file next to the destination in
//! `chunk_size` pieces and are renamed into place, so a reader never sees a
//! partially written object.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::{join_path, missing, normalize_path, ArtifactRepository, FileInfo};
use crate::{Error, Result};

const TEMP_MARKER: &str = ".tmp-";

/// Artifact repository backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalArtifactRepository {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalArtifactRepository {
    /// Default write chunk size (8 MiB).
    pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

    /// Create a repository rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the write chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let relative = normalize_path(path)?;
        let full = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&relative)
        };
        Ok((relative, full))
    }
}

fn io_error(path: &str, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => missing(path),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
            target: path.to_string(),
            reason: err.to_string(),
        },
        _ => Error::unavailable("local artifact io", path, err),
    }
}

impl ArtifactRepository for LocalArtifactRepository {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let (relative, target) = self.resolve(path)?;
        if relative.is_empty() {
            return Err(Error::invalid_argument(
                "path",
                "cannot write an object at the repository root",
            ));
        }
        let parent = target.parent().unwrap_or(self.root.as_path()).to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| io_error(path, e))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}{TEMP_MARKER}{}", Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            for chunk in bytes.chunks(self.chunk_size) {
                file.write_all(chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(path, err));
        }
        debug!(path = %target.display(), bytes = bytes.len(), "wrote artifact");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let (_, target) = self.resolve(path)?;
        if fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            return Err(missing(path));
        }
        fs::read(&target).await.map_err(|e| io_error(path, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let (relative, dir) = self.resolve(prefix)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(prefix, e)),
        }

        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&dir).await.map_err(|e| io_error(prefix, e))?;
        while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(prefix, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.contains(TEMP_MARKER) {
                continue;
            }
            let meta = entry.metadata().await.map_err(|e| io_error(prefix, e))?;
            let path = join_path(&relative, &name);
            if meta.is_dir() {
                entries.push(FileInfo::dir(path));
            } else {
                entries.push(FileInfo::file(path, meta.len()));
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (_, target) = self.resolve(path)?;
        let result = match fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target).await,
            Ok(_) => fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }
}
