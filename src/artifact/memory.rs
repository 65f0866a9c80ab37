//! In-memory artifact repository using `DashMap`.
//!
//! Objects live in a shared map keyed by full path, so several repositories
//! created from the same store (one per artifact root) see each other's
//! objects. Data is lost on process restart.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::{join_path, missing, normalize_path, ArtifactRepository, FileInfo};
use crate::Result;

/// In-memory artifact repository scoped to a key prefix.
///
/// # Example
///
/// ```rust
/// use trueno_track::artifact::{ArtifactRepository, MemoryArtifactRepository};
///
/// # async fn example() -> trueno_track::Result<()> {
/// let repo = MemoryArtifactRepository::new();
/// repo.put("model/MLmodel.json", b"{}".to_vec()).await?;
/// assert_eq!(repo.get("model/MLmodel.json").await?, b"{}".to_vec());
///
/// let scoped = repo.scoped("model")?;
/// assert_eq!(scoped.get("MLmodel.json").await?, b"{}".to_vec());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactRepository {
    objects: Arc<DashMap<String, Vec<u8>>>,
    prefix: String,
}

impl MemoryArtifactRepository {
    /// Create an empty repository rooted at the top of a fresh object map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository over the same objects, rooted at `prefix` below this one.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `prefix` contains `..`.
    pub fn scoped(&self, prefix: &str) -> Result<Self> {
        Ok(Self {
            objects: Arc::clone(&self.objects),
            prefix: join_path(&self.prefix, &normalize_path(prefix)?),
        })
    }

    /// Root prefix of this repository within the shared map.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of objects in the shared map (all prefixes).
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the shared map holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn key(&self, path: &str) -> Result<String> {
        Ok(join_path(&self.prefix, &normalize_path(path)?))
    }
}

impl ArtifactRepository for MemoryArtifactRepository {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let key = self.key(path)?;
        if key.is_empty() || key == self.prefix {
            return Err(crate::Error::invalid_argument(
                "path",
                "cannot write an object at the repository root",
            ));
        }
        self.objects.insert(key, bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path)?;
        self.objects
            .get(&key)
            .map(|v| v.value().clone())
            .ok_or_else(|| missing(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileInfo>> {
        let relative = normalize_path(prefix)?;
        let base = join_path(&self.prefix, &relative);
        let dir_prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{base}/")
        };

        let mut entries: BTreeMap<String, FileInfo> = BTreeMap::new();
        for object in self.objects.iter() {
            let Some(rest) = object.key().strip_prefix(&dir_prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    let path = join_path(&relative, child);
                    entries
                        .entry(path.clone())
                        .or_insert_with(|| FileInfo::dir(path));
                }
                None => {
                    let path = join_path(&relative, rest);
                    entries.insert(path.clone(), FileInfo::file(path, object.value().len() as u64));
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.key(path)?;
        if key.is_empty() {
            self.objects.clear();
            return Ok(());
        }
        let dir_prefix = format!("{key}/");
        self.objects
            .retain(|k, _| k != &key && !k.starts_with(&dir_prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let repo = MemoryArtifactRepository::new();
        repo.put("a.txt", b"one".to_vec()).await.unwrap();
        repo.put("a.txt", b"two".to_vec()).await.unwrap();
        assert_eq!(repo.get("a.txt").await.unwrap(), b"two".to_vec());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let repo = MemoryArtifactRepository::new();
        let err = repo.get("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_direct_children() {
        let repo = MemoryArtifactRepository::new();
        repo.put("model/MLmodel.json", b"{}".to_vec()).await.unwrap();
        repo.put("model/data/weights.json", b"[1]".to_vec()).await.unwrap();
        repo.put("metrics.csv", b"x".to_vec()).await.unwrap();

        let root = repo.list("").await.unwrap();
        assert_eq!(
            root,
            vec![FileInfo::file("metrics.csv", 1), FileInfo::dir("model")]
        );

        let model = repo.list("model").await.unwrap();
        assert_eq!(
            model,
            vec![FileInfo::file("model/MLmodel.json", 2), FileInfo::dir("model/data")]
        );
        assert!(repo.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scoped_repositories_share_objects() {
        let repo = MemoryArtifactRepository::new();
        let run_a = repo.scoped("exp/run-a").unwrap();
        let run_b = repo.scoped("exp/run-b").unwrap();
        run_a.put("x", b"a".to_vec()).await.unwrap();
        run_b.put("x", b"b".to_vec()).await.unwrap();

        assert_eq!(repo.get("exp/run-a/x").await.unwrap(), b"a".to_vec());
        assert_eq!(run_b.get("x").await.unwrap(), b"b".to_vec());
        assert_eq!(repo.list("exp").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_subtree_is_idempotent() {
        let repo = MemoryArtifactRepository::new();
        repo.put("model/a", b"1".to_vec()).await.unwrap();
        repo.put("model/b/c", b"2".to_vec()).await.unwrap();
        repo.put("modelx", b"3".to_vec()).await.unwrap();

        repo.delete("model").await.unwrap();
        repo.delete("model").await.unwrap();
        assert_eq!(repo.list("").await.unwrap(), vec![FileInfo::file("modelx", 1)]);
    }

    #[tokio::test]
    async fn test_rejects_parent_segments() {
        let repo = MemoryArtifactRepository::new();
        let err = repo.put("../escape", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
