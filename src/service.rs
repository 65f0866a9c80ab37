//! Tracking service facade
//!
//! Wires the tracking store, artifact backends, flavor registry and model
//! registry together and resolves the logical `runs:/` and `models:/` URIs
//! into concrete artifact URIs.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::artifact::{join_path, normalize_path, ArtifactRepositoryRegistry, ArtifactRoot};
use crate::config::TrackingConfig;
use crate::error::Entity;
use crate::experiment::{
    CreateRun, PurgeReport, RunRecord, RunStatus, TrackingStore, RUNS_URI_PREFIX,
};
use crate::flavor::{FlavorRegistry, LoadedModel, ModelDescriptor, SaveOptions};
use crate::registry::{ModelRegistry, ModelVersion, MODELS_URI_PREFIX};
use crate::{Error, ErrorKind, Result};

/// Entry point owning every component.
///
/// # Example
///
/// ```rust
/// use trueno_track::flavor::{LinearModel, SaveOptions};
/// use trueno_track::experiment::DEFAULT_EXPERIMENT_ID;
/// use trueno_track::service::TrackingService;
///
/// # async fn example() -> trueno_track::Result<()> {
/// let service = TrackingService::builder().build()?;
/// let run = service.start_run(DEFAULT_EXPERIMENT_ID)?;
/// run.log_param("alpha", "0.5")?;
/// run.log_metric("rmse", 0.72, 0)?;
///
/// let model = LinearModel::new(vec!["x".into()], vec![0.5], 0.1);
/// let version = service
///     .register_model(run.run_id(), "model", &model, &["linear"], SaveOptions::default(), "demo")
///     .await?;
/// run.finish()?;
///
/// let loaded = service.load_model(&format!("models:/demo/{}", version.version())).await?;
/// assert_eq!(loaded.flavor(), "linear");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TrackingService {
    config: TrackingConfig,
    tracking: Arc<TrackingStore>,
    artifacts: ArtifactRepositoryRegistry,
    flavors: Arc<FlavorRegistry>,
    registry: Arc<ModelRegistry>,
}

/// Builder for [`TrackingService`].
#[derive(Debug, Default)]
pub struct TrackingServiceBuilder {
    config: Option<TrackingConfig>,
    tracking: Option<Arc<TrackingStore>>,
    artifacts: Option<ArtifactRepositoryRegistry>,
    flavors: Option<Arc<FlavorRegistry>>,
}

impl TrackingServiceBuilder {
    /// Use this configuration (defaults otherwise).
    #[must_use]
    pub fn config(mut self, config: TrackingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an existing tracking store, e.g. one loaded from a snapshot.
    #[must_use]
    pub fn tracking_store(mut self, store: Arc<TrackingStore>) -> Self {
        self.tracking = Some(store);
        self
    }

    /// Use these artifact backends instead of the built-in `file` and
    /// `memory` ones.
    #[must_use]
    pub fn artifacts(mut self, artifacts: ArtifactRepositoryRegistry) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Use this flavor registry instead of the built-in one.
    #[must_use]
    pub fn flavors(mut self, flavors: Arc<FlavorRegistry>) -> Self {
        self.flavors = Some(flavors);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configuration is inconsistent.
    pub fn build(self) -> Result<TrackingService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let tracking = self
            .tracking
            .unwrap_or_else(|| Arc::new(TrackingStore::new(config.clone())));
        let artifacts = self
            .artifacts
            .unwrap_or_else(|| ArtifactRepositoryRegistry::with_defaults(&config));
        let flavors = self
            .flavors
            .unwrap_or_else(|| Arc::new(FlavorRegistry::with_defaults()));
        let registry = Arc::new(ModelRegistry::new(
            config.clone(),
            artifacts.clone(),
            Arc::clone(&tracking),
        ));
        Ok(TrackingService {
            config,
            tracking,
            artifacts,
            flavors,
            registry,
        })
    }
}

impl TrackingService {
    /// Create a service builder.
    #[must_use]
    pub fn builder() -> TrackingServiceBuilder {
        TrackingServiceBuilder::default()
    }

    /// Create a service with default components.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configuration is inconsistent.
    pub fn new(config: TrackingConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Tracking store.
    #[must_use]
    pub const fn tracking(&self) -> &Arc<TrackingStore> {
        &self.tracking
    }

    /// Artifact backends.
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactRepositoryRegistry {
        &self.artifacts
    }

    /// Flavor registry.
    #[must_use]
    pub const fn flavors(&self) -> &Arc<FlavorRegistry> {
        &self.flavors
    }

    /// Model registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // URI resolution
    // ------------------------------------------------------------------

    /// Turn a logical URI into a concrete artifact URI.
    ///
    /// `runs:/<run_id>/<path>` resolves under the run's artifact root,
    /// `models:/<name>/<version|stage|latest>` to a ready version's payload.
    /// Anything else is returned unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown runs or versions; `InvalidArgument` for
    /// malformed logical URIs; `InvalidState` for versions that are not ready.
    pub fn resolve_uri(&self, uri: &str) -> Result<String> {
        if uri.starts_with(RUNS_URI_PREFIX) {
            return self.tracking.resolve_runs_uri(uri);
        }
        if uri.starts_with(MODELS_URI_PREFIX) {
            let version = self.registry.resolve_models_uri(uri)?;
            return self
                .registry
                .get_model_version_download_uri(version.name(), version.version());
        }
        Ok(uri.to_string())
    }

    /// Resolve any supported URI to an artifact root.
    ///
    /// # Errors
    ///
    /// As [`TrackingService::resolve_uri`], plus `UnsupportedScheme`.
    pub fn artifact_root(&self, uri: &str) -> Result<ArtifactRoot> {
        self.artifacts.resolve(&self.resolve_uri(uri)?)
    }

    /// Artifact root of a live run.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run is absent or deleted.
    pub fn run_artifacts(&self, run_id: &str) -> Result<ArtifactRoot> {
        let run = self.tracking.get_run(run_id)?;
        self.artifacts.resolve(run.info.artifact_uri())
    }

    /// Artifact root of a ready model version.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidState` if not ready.
    pub fn model_version_artifacts(&self, name: &str, version: u64) -> Result<ArtifactRoot> {
        let uri = self.registry.get_model_version_download_uri(name, version)?;
        self.artifacts.resolve(&uri)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Start a run in `experiment_id`.
    ///
    /// The returned guard marks the run FAILED if dropped before
    /// [`ActiveRun::finish`] or [`ActiveRun::kill`].
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::create_run`].
    pub fn start_run(&self, experiment_id: &str) -> Result<ActiveRun> {
        self.start_run_with(CreateRun::new(experiment_id))
    }

    /// Start a run from a full request.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::create_run_with`].
    pub fn start_run_with(&self, request: CreateRun) -> Result<ActiveRun> {
        let run = self.tracking.create_run_with(request)?;
        Ok(ActiveRun {
            store: Arc::clone(&self.tracking),
            info: run.info,
            closed: false,
        })
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Save `model` below `artifact_path` in a running run's artifacts.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown runs, `InvalidState` for finished ones, plus
    /// flavor and artifact errors.
    pub async fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model: &(dyn Any + Send + Sync),
        flavors: &[&str],
        options: SaveOptions,
    ) -> Result<ModelDescriptor> {
        let run = self.tracking.get_run(run_id)?;
        if run.info.status().is_terminal() {
            return Err(Error::invalid_state(
                Entity::Run,
                run_id,
                run.info.status(),
                "cannot log models to a finished run",
            ));
        }
        let root = self.artifacts.resolve(run.info.artifact_uri())?;
        self.flavors
            .save_model(&root, artifact_path, model, flavors, options.run_id(run_id))
            .await
    }

    /// Save `model` into the run and register it as a new version of
    /// `name`, creating the registered model on first use.
    ///
    /// # Errors
    ///
    /// As [`TrackingService::log_model`] and
    /// [`ModelRegistry::create_model_version`].
    pub async fn register_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model: &(dyn Any + Send + Sync),
        flavors: &[&str],
        options: SaveOptions,
        name: &str,
    ) -> Result<ModelVersion> {
        self.log_model(run_id, artifact_path, model, flavors, options)
            .await?;
        match self.registry.create_registered_model(name, None) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
        let source = format!(
            "{RUNS_URI_PREFIX}{run_id}/{}",
            normalize_path(artifact_path)?
        );
        self.registry
            .create_model_version(name, &source, Some(run_id))
            .await
    }

    /// Load the model saved at `uri` (`runs:/`, `models:/` or concrete).
    ///
    /// # Errors
    ///
    /// As [`TrackingService::resolve_uri`] and [`FlavorRegistry::load_model`].
    pub async fn load_model(&self, uri: &str) -> Result<LoadedModel> {
        let root = self.artifact_root(uri)?;
        self.flavors.load_model(&root, "", &self.config).await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Purge soft-deleted runs and experiments older than the restore
    /// window, then delete the purged runs' artifact roots.
    ///
    /// # Errors
    ///
    /// Artifact deletion failures. Metadata is already purged when one is
    /// returned.
    pub async fn purge_deleted(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let report = self.tracking.purge_deleted(now);
        for uri in &report.artifact_uris {
            self.artifacts.resolve(uri)?.delete("").await?;
        }
        info!(artifact_roots = report.artifact_uris.len(), "deleted purged artifacts");
        Ok(report)
    }
}

/// A run started by [`TrackingService::start_run`].
///
/// Dropping the guard without calling [`ActiveRun::finish`] or
/// [`ActiveRun::kill`] marks the run FAILED, which covers early returns
/// and panics in the training code.
#[derive(Debug)]
pub struct ActiveRun {
    store: Arc<TrackingStore>,
    info: RunRecord,
    closed: bool,
}

impl ActiveRun {
    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.info.run_id()
    }

    /// Owning experiment id.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        self.info.experiment_id()
    }

    /// Artifact root URI.
    #[must_use]
    pub fn artifact_uri(&self) -> &str {
        self.info.artifact_uri()
    }

    /// `runs:/` URI of a path inside this run's artifacts.
    #[must_use]
    pub fn artifact_path_uri(&self, path: &str) -> String {
        join_path(&format!("{RUNS_URI_PREFIX}{}", self.run_id()), path.trim_matches('/'))
    }

    /// Log a metric point stamped now.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::log_metric`].
    pub fn log_metric(&self, key: &str, value: f64, step: i64) -> Result<()> {
        self.store
            .log_metric(self.run_id(), key, value, Utc::now(), step)
    }

    /// Log a parameter.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::log_param`].
    pub fn log_param(&self, key: &str, value: &str) -> Result<()> {
        self.store.log_param(self.run_id(), key, value)
    }

    /// Set a tag.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::set_tag`].
    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_tag(self.run_id(), key, value)
    }

    /// Mark the run FINISHED.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::update_run_status`].
    pub fn finish(self) -> Result<RunRecord> {
        self.close(RunStatus::Finished)
    }

    /// Mark the run KILLED.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::update_run_status`].
    pub fn kill(self) -> Result<RunRecord> {
        self.close(RunStatus::Killed)
    }

    fn close(mut self, status: RunStatus) -> Result<RunRecord> {
        self.closed = true;
        self.store.update_run_status(self.info.run_id(), status, None)
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(run_id = %self.info.run_id(), "run dropped without finishing, marking failed");
        if let Err(err) = self
            .store
            .update_run_status(self.info.run_id(), RunStatus::Failed, None)
        {
            warn!(run_id = %self.info.run_id(), error = %err, "could not mark run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{ViewType, DEFAULT_EXPERIMENT_ID};
    use crate::flavor::LinearModel;

    fn service() -> TrackingService {
        TrackingService::builder().build().unwrap()
    }

    #[test]
    fn test_dropped_run_is_failed() {
        let service = service();
        let run_id = {
            let run = service.start_run(DEFAULT_EXPERIMENT_ID).unwrap();
            run.log_metric("loss", 1.0, 0).unwrap();
            run.run_id().to_string()
        };
        let run = service.tracking().get_run(&run_id).unwrap();
        assert_eq!(run.info.status(), RunStatus::Failed);
        assert!(run.info.end_time().is_some());
    }

    #[test]
    fn test_finished_run_stays_finished() {
        let service = service();
        let run = service.start_run(DEFAULT_EXPERIMENT_ID).unwrap();
        let run_id = run.run_id().to_string();
        assert_eq!(run.finish().unwrap().status(), RunStatus::Finished);
        assert_eq!(
            service.tracking().get_run(&run_id).unwrap().info.status(),
            RunStatus::Finished
        );

        let killed = service.start_run(DEFAULT_EXPERIMENT_ID).unwrap();
        assert_eq!(killed.kill().unwrap().status(), RunStatus::Killed);
    }

    #[test]
    fn test_resolve_uri_passthrough_and_runs() {
        let service = service();
        let run = service.start_run(DEFAULT_EXPERIMENT_ID).unwrap();
        assert_eq!(service.resolve_uri("file:///tmp/x").unwrap(), "file:///tmp/x");
        let resolved = service.resolve_uri(&run.artifact_path_uri("model")).unwrap();
        assert_eq!(resolved, format!("{}/model", run.artifact_uri()));
        assert_eq!(
            service.resolve_uri("models:/nothing/1").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_log_model_requires_running_run() {
        let service = service();
        let model = LinearModel::new(vec!["x".into()], vec![1.0], 0.0);
        let run = service.start_run(DEFAULT_EXPERIMENT_ID).unwrap();
        let run_id = run.run_id().to_string();
        service
            .log_model(&run_id, "model", &model, &["linear"], SaveOptions::default())
            .await
            .unwrap();
        run.finish().unwrap();

        let err = service
            .log_model(&run_id, "again", &model, &["linear"], SaveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let loaded = service.load_model(&format!("runs:/{run_id}/model")).await.unwrap();
        assert_eq!(loaded.descriptor().run_id(), Some(run_id.as_str()));
        assert_eq!(loaded.descriptor().artifact_path(), Some("model"));
    }

    #[tokio::test]
    async fn test_purge_deletes_artifacts() {
        let service = service();
        let model = LinearModel::new(vec!["x".into()], vec![1.0], 0.0);
        let run = service.start_run(DEFAULT_EXPERIMENT_ID).unwrap();
        let run_id = run.run_id().to_string();
        service
            .log_model(&run_id, "model", &model, &["linear"], SaveOptions::default())
            .await
            .unwrap();
        run.finish().unwrap();
        let root = service.run_artifacts(&run_id).unwrap();
        service.tracking().delete_run(&run_id).unwrap();

        let far_future = Utc::now() + chrono::Duration::days(365);
        let report = service.purge_deleted(far_future).await.unwrap();
        assert_eq!(report.run_ids, vec![run_id.clone()]);
        assert!(root.list_recursive("").await.unwrap().is_empty());
        assert!(service.tracking().find_run(&run_id, ViewType::All).is_err());
    }
}
