//! Scheme-to-backend registration point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::{
    normalize_path, ArtifactRoot, ArtifactUri, DynArtifactRepository, LocalArtifactRepository,
    MemoryArtifactRepository,
};
use crate::config::{RetryPolicy, TrackingConfig};
use crate::{Error, Result};

/// Builds a repository rooted at a parsed URI.
pub type RepositoryFactory =
    Arc<dyn Fn(&ArtifactUri) -> Result<Arc<dyn DynArtifactRepository>> + Send + Sync>;

/// Maps URI schemes to repository factories.
///
/// Backends register once at startup; resolution never falls back to a
/// default backend, an unknown scheme fails `UnsupportedScheme`.
#[derive(Clone)]
pub struct ArtifactRepositoryRegistry {
    factories: Arc<DashMap<String, RepositoryFactory>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for ArtifactRepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        schemes.sort();
        f.debug_struct("ArtifactRepositoryRegistry")
            .field("schemes", &schemes)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ArtifactRepositoryRegistry {
    /// An empty registry using the config's retry policy and deadline.
    #[must_use]
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            factories: Arc::new(DashMap::new()),
            retry: config.retry,
            timeout: config.operation_timeout,
        }
    }

    /// A registry with the bundled `file` and `memory` backends.
    ///
    /// All `memory://` roots resolved through this registry share one
    /// object map, keyed by `authority/path`.
    #[must_use]
    pub fn with_defaults(config: &TrackingConfig) -> Self {
        let registry = Self::new(config);

        let chunk_size = config.upload_chunk_size;
        registry.register(
            "file",
            Arc::new(move |uri: &ArtifactUri| -> Result<Arc<dyn DynArtifactRepository>> {
                let path = PathBuf::from(uri.path());
                let repo: Arc<dyn DynArtifactRepository> =
                    Arc::new(LocalArtifactRepository::new(path).with_chunk_size(chunk_size));
                Ok(repo)
            }),
        );

        let objects = MemoryArtifactRepository::new();
        registry.register(
            "memory",
            Arc::new(move |uri: &ArtifactUri| -> Result<Arc<dyn DynArtifactRepository>> {
                let prefix = normalize_path(&format!("{}/{}", uri.authority(), uri.path()))?;
                let repo: Arc<dyn DynArtifactRepository> = Arc::new(objects.scoped(&prefix)?);
                Ok(repo)
            }),
        );
        registry
    }

    /// Register (or replace) the factory for `scheme`.
    pub fn register(&self, scheme: &str, factory: RepositoryFactory) {
        debug!(scheme, "registered artifact backend");
        self.factories.insert(scheme.to_ascii_lowercase(), factory);
    }

    /// Whether a backend is registered for `scheme`.
    #[must_use]
    pub fn supports(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Resolve `uri` to a scoped, retrying artifact root.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed URI, `UnsupportedScheme` when no
    /// backend is registered for its scheme.
    pub fn resolve(&self, uri: &str) -> Result<ArtifactRoot> {
        let parsed = ArtifactUri::parse(uri)?;
        // clone out so the factory runs without holding the shard lock
        let factory = self
            .factories
            .get(parsed.scheme())
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| Error::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
                uri: uri.to_string(),
            })?;
        let repo = factory(&parsed)?;
        Ok(ArtifactRoot::new(uri, repo, self.retry, self.timeout))
    }
}
