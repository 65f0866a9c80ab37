//! Artifact Repository
//!
//! Path-addressed byte storage behind a URI scheme. The tracking store and
//! model registry only persist root URIs; bytes move through
//! [`ArtifactRoot`], which resolves a URI to a backend via the
//! [`ArtifactRepositoryRegistry`] and adds retry and deadline handling.
//!
//! # Example
//!
//! ```rust
//! use trueno_track::artifact::ArtifactRepositoryRegistry;
//! use trueno_track::config::TrackingConfig;
//!
//! # async fn example() -> trueno_track::Result<()> {
//! let registry = ArtifactRepositoryRegistry::with_defaults(&TrackingConfig::default());
//! let root = registry.resolve("memory://mlruns/0/abc/artifacts")?;
//!
//! root.put("model/weights.json", b"[1.0, 2.0]".to_vec()).await?;
//! assert_eq!(root.get("model/weights.json").await?, b"[1.0, 2.0]".to_vec());
//!
//! let entries = root.list("").await?;
//! assert_eq!(entries[0].path, "model");
//! assert!(entries[0].is_dir);
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency
//!
//! `put` is atomic: readers see either the previous object or the complete
//! new one. `get` of a path is consistent once `put` returns. `list` may lag
//! behind writes on backends with weaker listing guarantees; the bundled
//! backends list consistently.

#[cfg(feature = "compression")]
mod compressed;
mod local;
mod memory;
mod registry;
mod root;
mod uri;

#[cfg(feature = "compression")]
pub use compressed::{CompressedArtifactRepository, Compression};
pub use local::LocalArtifactRepository;
pub use memory::MemoryArtifactRepository;
pub use registry::{ArtifactRepositoryRegistry, RepositoryFactory};
pub use root::ArtifactRoot;
pub use uri::ArtifactUri;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Entity;
use crate::{Error, Result};

/// One entry returned by [`ArtifactRepository::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the repository root
    pub path: String,
    /// Size in bytes; `None` for directories
    pub size: Option<u64>,
    /// Whether the entry is a directory (a common prefix)
    pub is_dir: bool,
}

impl FileInfo {
    /// A file entry.
    #[must_use]
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size: Some(size),
            is_dir: false,
        }
    }

    /// A directory entry.
    #[must_use]
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            is_dir: true,
        }
    }
}

/// Byte storage backend for one artifact root.
///
/// Paths are relative to the repository root and use `/` separators; the
/// empty path names the root itself (valid for `list` and `delete`).
pub trait ArtifactRepository: Send + Sync {
    /// Store `bytes` at `path`, replacing any existing object atomically.
    fn put(&self, path: &str, bytes: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Read the object at `path`.
    ///
    /// Fails `NotFound` if no object exists there.
    fn get(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Direct children of `prefix`, sorted by path.
    ///
    /// A missing prefix lists as empty.
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<FileInfo>>> + Send;

    /// Delete the object or subtree at `path`. Deleting nothing succeeds.
    fn delete(&self, path: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Boxed future returned by [`DynArtifactRepository`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe form of [`ArtifactRepository`], for scheme-based dispatch.
///
/// Implemented for every `ArtifactRepository`; backends never implement it
/// directly.
pub trait DynArtifactRepository: Send + Sync {
    /// See [`ArtifactRepository::put`].
    fn put_boxed<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>>;
    /// See [`ArtifactRepository::get`].
    fn get_boxed<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
    /// See [`ArtifactRepository::list`].
    fn list_boxed<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<FileInfo>>>;
    /// See [`ArtifactRepository::delete`].
    fn delete_boxed<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>>;
}

impl<R: ArtifactRepository + 'static> DynArtifactRepository for R {
    fn put_boxed<'a>(&'a self, path: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.put(path, bytes))
    }

    fn get_boxed<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(self.get(path))
    }

    fn list_boxed<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<FileInfo>>> {
        Box::pin(self.list(prefix))
    }

    fn delete_boxed<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.delete(path))
    }
}

/// Normalize a relative artifact path: drop empty and `.` segments, reject
/// `..` so no path escapes its root.
///
/// # Errors
///
/// `InvalidArgument` if the path contains a `..` segment.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split(|c: char| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(Error::invalid_argument(
                    "path",
                    format!("artifact path '{path}' must not contain '..'"),
                ))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Join two normalized relative paths.
#[must_use]
pub fn join_path(base: &str, child: &str) -> String {
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{child}"),
    }
}

pub(crate) fn missing(path: &str) -> Error {
    Error::not_found(Entity::Artifact, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a/b/c").unwrap(), "a/b/c");
        assert_eq!(normalize_path("/a//b/./c/").unwrap(), "a/b/c");
        assert_eq!(normalize_path("").unwrap(), "");
        assert!(normalize_path("a/../b").is_err());
        assert!(normalize_path("..").is_err());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "x"), "x");
        assert_eq!(join_path("a", ""), "a");
        assert_eq!(join_path("a", "b/c"), "a/b/c");
    }

    #[test]
    fn test_file_info_constructors() {
        let file = FileInfo::file("model.json", 12);
        assert_eq!(file.size, Some(12));
        assert!(!file.is_dir);
        let dir = FileInfo::dir("data");
        assert_eq!(dir.size, None);
        assert!(dir.is_dir);
    }
}
