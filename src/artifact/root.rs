//! Resolved artifact roots with retry and deadline handling

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::warn;

use super::{join_path, normalize_path, DynArtifactRepository, FileInfo};
use crate::config::RetryPolicy;
use crate::{Error, Result};

/// An artifact URI bound to its backend.
///
/// Every operation runs under the root's deadline. Operations are all
/// idempotent (`put` overwrites with the same content on replay), so
/// transient `BackendUnavailable` failures are retried with backoff; other
/// errors return immediately.
#[derive(Clone)]
pub struct ArtifactRoot {
    uri: String,
    repo: Arc<dyn DynArtifactRepository>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for ArtifactRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRoot")
            .field("uri", &self.uri)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ArtifactRoot {
    /// Bind `uri` to an already-constructed backend.
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        repo: Arc<dyn DynArtifactRepository>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            uri: uri.into(),
            repo,
            retry,
            timeout,
        }
    }

    /// The root URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// URI of `path` below this root.
    #[must_use]
    pub fn uri_of(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            self.uri.clone()
        } else {
            format!("{}/{path}", self.uri.trim_end_matches('/'))
        }
    }

    /// The same root with a different deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The same root with a different retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, path: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let target = self.uri_of(path);
        let attempts = async {
            let mut attempt = 1;
            loop {
                match f().await {
                    Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                        let backoff = self.retry.backoff_for(attempt);
                        warn!(
                            operation,
                            target = %target,
                            attempt,
                            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "retrying artifact operation"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    result => return result,
                }
            }
        };
        tokio::time::timeout(self.timeout, attempts)
            .await
            .map_err(|_| Error::unavailable(operation, target.clone(), "deadline exceeded"))?
    }

    /// Store `bytes` at `path`.
    ///
    /// # Errors
    ///
    /// Backend errors after retries; `BackendUnavailable` on deadline expiry.
    pub async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.run("put", path, || self.repo.put_boxed(path, bytes.clone()))
            .await
    }

    /// Read the object at `path`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; otherwise as [`ArtifactRoot::put`].
    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.run("get", path, || self.repo.get_boxed(path)).await
    }

    /// Direct children of `prefix`.
    ///
    /// # Errors
    ///
    /// As [`ArtifactRoot::put`].
    pub async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        self.run("list", prefix, || self.repo.list_boxed(prefix)).await
    }

    /// Delete the object or subtree at `path`.
    ///
    /// # Errors
    ///
    /// As [`ArtifactRoot::put`].
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.run("delete", path, || self.repo.delete_boxed(path)).await
    }

    /// Every file (not directory) below `prefix`, sorted by path.
    ///
    /// # Errors
    ///
    /// As [`ArtifactRoot::list`].
    pub async fn list_recursive(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut pending = vec![normalize_path(prefix)?];
        while let Some(dir) = pending.pop() {
            for entry in self.list(&dir).await? {
                if entry.is_dir {
                    pending.push(entry.path);
                } else {
                    files.push(entry);
                }
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Read every file below `prefix`. Paths in the result are relative to
    /// `prefix`.
    ///
    /// # Errors
    ///
    /// As [`ArtifactRoot::get`].
    pub async fn download_all(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = normalize_path(prefix)?;
        let mut out = Vec::new();
        for file in self.list_recursive(&prefix).await? {
            let bytes = self.get(&file.path).await?;
            let relative = file
                .path
                .strip_prefix(&prefix)
                .map_or(file.path.as_str(), |rest| rest.trim_start_matches('/'))
                .to_string();
            out.push((relative, bytes));
        }
        Ok(out)
    }

    /// Write `files` below `prefix`.
    ///
    /// # Errors
    ///
    /// As [`ArtifactRoot::put`]; files written before a failure stay written.
    pub async fn upload_all(&self, prefix: &str, files: &[(String, Vec<u8>)]) -> Result<()> {
        let prefix = normalize_path(prefix)?;
        for (path, bytes) in files {
            self.put(&join_path(&prefix, &normalize_path(path)?), bytes.clone())
                .await?;
        }
        Ok(())
    }

    /// Copy every file below `prefix` into `dest` and return the SHA-256
    /// digest over the copied paths and bytes, in path order.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is nothing to copy; otherwise backend errors.
    pub async fn copy_tree(&self, prefix: &str, dest: &Self) -> Result<String> {
        let files = self.download_all(prefix).await?;
        if files.is_empty() {
            return Err(super::missing(&self.uri_of(prefix)));
        }
        let mut hasher = Sha256::new();
        for (path, bytes) in &files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(bytes);
            dest.put(path, bytes.clone()).await?;
        }
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactRepository, MemoryArtifactRepository};
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls of every operation with a transient error.
    struct FlakyRepository {
        inner: MemoryArtifactRepository,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyRepository {
        fn check(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::unavailable("test", "flaky", "connection reset"));
            }
            Ok(())
        }
    }

    impl ArtifactRepository for FlakyRepository {
        async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
            self.check()?;
            self.inner.put(path, bytes).await
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>> {
            self.check()?;
            self.inner.get(path).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
            self.check()?;
            self.inner.list(prefix).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.check()?;
            self.inner.delete(path).await
        }
    }

    /// Never completes.
    struct StalledRepository;

    impl ArtifactRepository for StalledRepository {
        async fn put(&self, _path: &str, _bytes: Vec<u8>) -> Result<()> {
            std::future::pending().await
        }

        async fn get(&self, _path: &str) -> Result<Vec<u8>> {
            std::future::pending().await
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<FileInfo>> {
            std::future::pending().await
        }

        async fn delete(&self, _path: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn memory_root(uri: &str) -> (MemoryArtifactRepository, ArtifactRoot) {
        let repo = MemoryArtifactRepository::new();
        let root = ArtifactRoot::new(
            uri,
            Arc::new(repo.clone()),
            RetryPolicy::none(),
            Duration::from_secs(5),
        );
        (repo, root)
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let flaky = FlakyRepository {
            inner: MemoryArtifactRepository::new(),
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let root = ArtifactRoot::new("memory://x", Arc::new(flaky), fast_retry(3), Duration::from_secs(5));
        root.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(root.get("a").await.unwrap(), b"1".to_vec());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let flaky = FlakyRepository {
            inner: MemoryArtifactRepository::new(),
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let root = ArtifactRoot::new("memory://x", Arc::new(flaky), fast_retry(2), Duration::from_secs(5));
        let err = root.put("a", b"1".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (_, root) = memory_root("memory://x");
        let err = root.with_retry(fast_retry(5)).get("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let root = ArtifactRoot::new(
            "memory://stalled",
            Arc::new(StalledRepository),
            RetryPolicy::none(),
            Duration::from_millis(20),
        );
        let err = root.get("a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn test_recursive_listing_and_bulk_transfer() {
        let (_, src) = memory_root("memory://src");
        src.upload_all(
            "model",
            &[
                ("MLmodel.json".to_string(), b"{}".to_vec()),
                ("data/weights.json".to_string(), b"[1]".to_vec()),
            ],
        )
        .await
        .unwrap();

        let files = src.list_recursive("").await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["model/MLmodel.json", "model/data/weights.json"]);

        let downloaded = src.download_all("model").await.unwrap();
        assert_eq!(downloaded[0].0, "MLmodel.json");
        assert_eq!(downloaded[1].0, "data/weights.json");
    }

    #[tokio::test]
    async fn test_copy_tree_digest_is_content_addressed() {
        let (_, src) = memory_root("memory://src");
        let (dest_repo, dest) = memory_root("memory://dest");
        src.put("model/a", b"1".to_vec()).await.unwrap();

        let first = src.copy_tree("model", &dest).await.unwrap();
        assert_eq!(dest_repo.get("a").await.unwrap(), b"1".to_vec());
        assert_eq!(first.len(), 64);

        let (_, other) = memory_root("memory://other");
        other.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(other.copy_tree("", &dest).await.unwrap(), first);

        let err = src.copy_tree("nothing", &dest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_uri_of() {
        let (_, root) = memory_root("memory://mlruns/0/abc/artifacts/");
        assert_eq!(root.uri_of("model"), "memory://mlruns/0/abc/artifacts/model");
        assert_eq!(root.uri_of(""), "memory://mlruns/0/abc/artifacts/");
    }
}
