//! Configuration for the tracking service and its components
//!
//! All knobs live in one [`TrackingConfig`], constructed through
//! [`TrackingConfig::builder`] or loaded from a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signature::{MismatchPolicy, SchemaEnforcement};
use crate::{Error, Result};

/// Bounded retry with exponential backoff for idempotent artifact operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Configuration for the tracking store, artifact layer and model registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Root under which experiment artifact locations are allocated.
    pub default_artifact_root: String,
    /// Root under which registered model version payloads are copied.
    pub registry_artifact_root: String,
    /// Page size used when a search does not specify one.
    pub default_max_results: usize,
    /// Largest page size a search may request.
    pub max_results_limit: usize,
    /// Soft-deleted entities younger than this survive a purge.
    pub restore_window: Duration,
    /// Retry policy for idempotent artifact operations.
    pub retry: RetryPolicy,
    /// Deadline for a single artifact operation and for a model version copy.
    pub operation_timeout: Duration,
    /// Chunk size for streaming writes in the local backend.
    pub upload_chunk_size: usize,
    /// Treatment of unknown input fields during signature validation.
    pub schema_enforcement: SchemaEnforcement,
    /// Whether a signature violation rejects the call or is only logged.
    pub mismatch_policy: MismatchPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_artifact_root: "memory://mlruns".to_string(),
            registry_artifact_root: "memory://registry".to_string(),
            default_max_results: 1000,
            max_results_limit: 50_000,
            restore_window: Duration::from_secs(30 * 24 * 60 * 60),
            retry: RetryPolicy::default(),
            operation_timeout: Duration::from_secs(30),
            upload_chunk_size: 8 * 1024 * 1024,
            schema_enforcement: SchemaEnforcement::Strict,
            mismatch_policy: MismatchPolicy::Reject,
        }
    }
}

impl TrackingConfig {
    /// Create a configuration builder starting from defaults.
    #[must_use]
    pub fn builder() -> TrackingConfigBuilder {
        TrackingConfigBuilder::default()
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`BackendUnavailable` if the file cannot be read and
    /// `InvalidArgument` if it is not valid configuration JSON.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.default_max_results == 0 {
            return Err(Error::invalid_argument(
                "default_max_results",
                "must be positive",
            ));
        }
        if self.default_max_results > self.max_results_limit {
            return Err(Error::invalid_argument(
                "default_max_results",
                format!("exceeds max_results_limit {}", self.max_results_limit),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_argument("retry.max_attempts", "must be at least 1"));
        }
        if self.upload_chunk_size == 0 {
            return Err(Error::invalid_argument("upload_chunk_size", "must be positive"));
        }
        Ok(())
    }
}

/// Builder for [`TrackingConfig`].
#[derive(Debug, Default)]
pub struct TrackingConfigBuilder {
    config: TrackingConfig,
}

impl TrackingConfigBuilder {
    /// Set the default artifact root for new experiments.
    #[must_use]
    pub fn default_artifact_root(mut self, root: impl Into<String>) -> Self {
        self.config.default_artifact_root = root.into();
        self
    }

    /// Set the artifact root for registered model versions.
    #[must_use]
    pub fn registry_artifact_root(mut self, root: impl Into<String>) -> Self {
        self.config.registry_artifact_root = root.into();
        self
    }

    /// Set the default search page size.
    #[must_use]
    pub const fn default_max_results(mut self, n: usize) -> Self {
        self.config.default_max_results = n;
        self
    }

    /// Set the largest allowed search page size.
    #[must_use]
    pub const fn max_results_limit(mut self, n: usize) -> Self {
        self.config.max_results_limit = n;
        self
    }

    /// Set the purge restore window.
    #[must_use]
    pub const fn restore_window(mut self, window: Duration) -> Self {
        self.config.restore_window = window;
        self
    }

    /// Set the artifact retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the per-operation deadline.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Set the local backend write chunk size.
    #[must_use]
    pub const fn upload_chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload_chunk_size = bytes;
        self
    }

    /// Set the schema enforcement mode.
    #[must_use]
    pub const fn schema_enforcement(mut self, mode: SchemaEnforcement) -> Self {
        self.config.schema_enforcement = mode;
        self
    }

    /// Set the signature mismatch policy.
    #[must_use]
    pub const fn mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.config.mismatch_policy = policy;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is inconsistent.
    pub fn build(self) -> Result<TrackingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
