//! Compressed artifact repository wrapper
//!
//! Transparent LZ4/ZSTD compression over any [`ArtifactRepository`]. Object
//! sizes reported by `list` are the stored (compressed) sizes.

use super::{ArtifactRepository, FileInfo};
use crate::{Error, Result};

/// Compression algorithm for stored artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// LZ4 - fast, the default
    #[default]
    Lz4,
    /// ZSTD - better ratio, slower
    Zstd,
}

impl Compression {
    /// Algorithm name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Compress `data`.
    ///
    /// # Errors
    /// `BackendUnavailable` if the encoder fails.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::unavailable("zstd compress", "", e)),
        }
    }

    /// Decompress `data`.
    ///
    /// # Errors
    /// `InvalidArgument` if the stored bytes are corrupt.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::invalid_argument("artifact", format!("lz4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::invalid_argument("artifact", format!("zstd decompression failed: {e}"))),
        }
    }
}

/// Repository wrapper compressing payloads on `put` and decompressing on `get`.
///
/// # Example
///
/// ```rust
/// use trueno_track::artifact::{
///     ArtifactRepository, CompressedArtifactRepository, Compression, MemoryArtifactRepository,
/// };
///
/// # async fn example() -> trueno_track::Result<()> {
/// let store = CompressedArtifactRepository::new(MemoryArtifactRepository::new(), Compression::Lz4);
/// store.put("weights.bin", vec![0u8; 10_000]).await?;
/// assert_eq!(store.get("weights.bin").await?.len(), 10_000);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CompressedArtifactRepository<S: ArtifactRepository> {
    inner: S,
    compression: Compression,
}

impl<S: ArtifactRepository> CompressedArtifactRepository<S> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: S, compression: Compression) -> Self {
        Self { inner, compression }
    }

    /// The wrapped repository
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Compression algorithm
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }
}

impl<S: ArtifactRepository> ArtifactRepository for CompressedArtifactRepository<S> {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let compressed = self.compression.compress(&bytes)?;
        self.inner.put(path, compressed).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let stored = self.inner.get(path).await?;
        self.compression.decompress(&stored)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }
}
