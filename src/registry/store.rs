//! Model Registry store
//!
//! ## Design
//!
//! Each registered model is one `DashMap` entry holding its version
//! counter and versions. Every mutation of a model or its versions runs
//! under that entry's write guard, which serializes version allocation and
//! archive-and-promote transitions per model name. Readers clone under the
//! shard read guard, so they never observe a transition half applied.
//!
//! The payload copy of a new version runs outside any guard: the version
//! is inserted as `PENDING_REGISTRATION` and finalized once the copy ends.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ModelStage, ModelVersion, ModelVersionStatus, RegisteredModel};
use crate::artifact::{ArtifactRepositoryRegistry, ArtifactRoot};
use crate::config::TrackingConfig;
use crate::error::Entity;
use crate::experiment::filter::{FieldValue, FilterKey, FilterNamespace, FilterSubject, SearchFilter};
use crate::experiment::search::{paginate, query_fingerprint, OrderBy, Page, SortKey, ViewType};
use crate::experiment::{
    validate_key, validate_value, write_atomically, TrackingStore, MAX_KEY_LENGTH,
    MAX_TAG_VALUE_LENGTH, RUNS_URI_PREFIX,
};
use crate::{Error, Result};

/// Scheme prefix of registry URIs: `models:/<name>/<version|stage|latest>`.
pub const MODELS_URI_PREFIX: &str = "models:/";

/// Attributes usable in registered model filters and orderings.
pub const REGISTERED_MODEL_ATTRIBUTES: &[&str] =
    &["name", "description", "creation_time", "last_updated_time"];

/// Attributes usable in model version filters and orderings.
pub const MODEL_VERSION_ATTRIBUTES: &[&str] = &[
    "name",
    "version",
    "run_id",
    "source",
    "current_stage",
    "status",
    "creation_time",
    "last_updated_time",
];

const SEARCH_NAMESPACES: [FilterNamespace; 2] = [FilterNamespace::Attribute, FilterNamespace::Tag];

/// Search request for registered models or model versions.
#[derive(Debug, Clone, Default)]
pub struct RegistrySearch {
    /// Filter expression over attributes and `tags.<key>`
    pub filter: String,
    /// Ordering clauses
    pub order_by: Vec<String>,
    /// Page size; defaults to the configured default
    pub max_results: Option<usize>,
    /// Token from a previous page
    pub page_token: Option<String>,
}

impl RegistrySearch {
    /// Search everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter expression.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Add an ordering clause.
    #[must_use]
    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by.push(clause.into());
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    /// Resume from a page token.
    #[must_use]
    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelEntry {
    model: RegisteredModel,
    // distinguishes a recreated model from the one it replaced
    #[serde(default = "new_generation")]
    generation: String,
    next_version: u64,
    versions: BTreeMap<u64, ModelVersion>,
}

fn new_generation() -> String {
    Uuid::new_v4().simple().to_string()
}

impl ModelEntry {
    fn new(model: RegisteredModel) -> Self {
        Self {
            model,
            generation: new_generation(),
            next_version: 1,
            versions: BTreeMap::new(),
        }
    }

    fn version(&self, version: u64) -> Result<&ModelVersion> {
        self.versions
            .get(&version)
            .ok_or_else(|| version_not_found(self.model.name(), version))
    }

    fn version_mut(&mut self, version: u64) -> Result<&mut ModelVersion> {
        let name = self.model.name().to_string();
        self.versions
            .get_mut(&version)
            .ok_or_else(|| version_not_found(&name, version))
    }
}

fn version_not_found(name: &str, version: u64) -> Error {
    Error::not_found(Entity::ModelVersion, format!("{name}/{version}"))
}

#[allow(clippy::cast_precision_loss)]
fn millis(time: chrono::DateTime<chrono::Utc>) -> FieldValue<'static> {
    FieldValue::Number(time.timestamp_millis() as f64)
}

impl FilterSubject for RegisteredModel {
    fn lookup(&self, key: &FilterKey) -> Option<FieldValue<'_>> {
        match key.namespace {
            FilterNamespace::Tag => self
                .tags()
                .get(&key.name)
                .map(|v| FieldValue::Text(Cow::Borrowed(v.as_str()))),
            FilterNamespace::Attribute => match key.name.as_str() {
                "name" => Some(FieldValue::Text(Cow::Borrowed(self.name()))),
                "description" => self.description().map(|d| FieldValue::Text(Cow::Borrowed(d))),
                "creation_time" => Some(millis(self.created_at())),
                "last_updated_time" => Some(millis(self.last_updated_at())),
                _ => None,
            },
            FilterNamespace::Metric | FilterNamespace::Param => None,
        }
    }
}

impl FilterSubject for ModelVersion {
    fn lookup(&self, key: &FilterKey) -> Option<FieldValue<'_>> {
        let text = |s: &'static str| Some(FieldValue::Text(Cow::Borrowed(s)));
        match key.namespace {
            FilterNamespace::Tag => self
                .tags()
                .get(&key.name)
                .map(|v| FieldValue::Text(Cow::Borrowed(v.as_str()))),
            FilterNamespace::Attribute => match key.name.as_str() {
                "name" => Some(FieldValue::Text(Cow::Borrowed(self.name()))),
                #[allow(clippy::cast_precision_loss)]
                "version" => Some(FieldValue::Number(self.version() as f64)),
                "run_id" => self.run_id().map(|r| FieldValue::Text(Cow::Borrowed(r))),
                "source" => Some(FieldValue::Text(Cow::Borrowed(self.source()))),
                "current_stage" => text(self.current_stage().as_str()),
                "status" => text(self.status().as_str()),
                "creation_time" => Some(millis(self.created_at())),
                "last_updated_time" => Some(millis(self.last_updated_at())),
                _ => None,
            },
            FilterNamespace::Metric | FilterNamespace::Param => None,
        }
    }
}

fn validate_model_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_argument("name", "model name must not be empty"));
    }
    if name.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid_argument(
            "name",
            format!("model name exceeds {MAX_KEY_LENGTH} characters"),
        ));
    }
    if name.contains('/') {
        return Err(Error::invalid_argument(
            "name",
            format!("model name '{name}' must not contain '/'"),
        ));
    }
    Ok(())
}

fn validate_tag(key: &str, value: &str) -> Result<()> {
    validate_key("tag", key)?;
    validate_value("tag", key, value, MAX_TAG_VALUE_LENGTH)
}

/// Versioned catalog of named models.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use trueno_track::artifact::ArtifactRepositoryRegistry;
/// use trueno_track::config::TrackingConfig;
/// use trueno_track::experiment::TrackingStore;
/// use trueno_track::registry::{ModelRegistry, ModelStage};
///
/// # async fn example() -> trueno_track::Result<()> {
/// let config = TrackingConfig::default();
/// let artifacts = ArtifactRepositoryRegistry::with_defaults(&config);
/// artifacts
///     .resolve("memory://staging/churn")?
///     .put("model.json", b"{}".to_vec())
///     .await?;
///
/// let tracking = Arc::new(TrackingStore::new(config.clone()));
/// let registry = ModelRegistry::new(config, artifacts, tracking);
/// registry.create_registered_model("churn", None)?;
/// let v1 = registry
///     .create_model_version("churn", "memory://staging/churn", None)
///     .await?;
/// assert!(v1.is_ready());
///
/// let promoted = registry.transition_stage("churn", v1.version(), "Production", true)?;
/// assert_eq!(promoted.current_stage(), ModelStage::Production);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ModelRegistry {
    config: TrackingConfig,
    models: DashMap<String, ModelEntry>,
    artifacts: ArtifactRepositoryRegistry,
    tracking: Arc<TrackingStore>,
}

impl ModelRegistry {
    /// Create an empty registry.
    ///
    /// Provenance checks and `runs:/` sources resolve through `tracking`;
    /// payloads are copied through `artifacts`.
    #[must_use]
    pub fn new(
        config: TrackingConfig,
        artifacts: ArtifactRepositoryRegistry,
        tracking: Arc<TrackingStore>,
    ) -> Self {
        Self {
            config,
            models: DashMap::new(),
            artifacts,
            tracking,
        }
    }

    /// The configuration this registry was built with.
    #[must_use]
    pub const fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Artifact backends used for version payloads.
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactRepositoryRegistry {
        &self.artifacts
    }

    /// Tracking store used for provenance.
    #[must_use]
    pub const fn tracking(&self) -> &Arc<TrackingStore> {
        &self.tracking
    }

    /// Number of registered models.
    #[must_use]
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    fn with_model<T>(&self, name: &str, f: impl FnOnce(&mut ModelEntry) -> Result<T>) -> Result<T> {
        let mut entry = self
            .models
            .get_mut(name)
            .ok_or_else(|| Error::not_found(Entity::RegisteredModel, name))?;
        f(&mut *entry)
    }

    fn read_model<T>(&self, name: &str, f: impl FnOnce(&ModelEntry) -> Result<T>) -> Result<T> {
        let entry = self
            .models
            .get(name)
            .ok_or_else(|| Error::not_found(Entity::RegisteredModel, name))?;
        f(&entry)
    }

    // ------------------------------------------------------------------
    // Registered models
    // ------------------------------------------------------------------

    /// Create a registered model.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is taken; `InvalidArgument` for empty
    /// names or names containing `/`.
    pub fn create_registered_model(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<RegisteredModel> {
        validate_model_name(name)?;
        match self.models.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::already_exists(Entity::RegisteredModel, name)),
            Entry::Vacant(slot) => {
                let model = RegisteredModel::new(name, description.map(str::to_string));
                slot.insert(ModelEntry::new(model.clone()));
                info!(model = name, "created registered model");
                Ok(model)
            }
        }
    }

    /// Get a registered model.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent.
    pub fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        self.read_model(name, |entry| Ok(entry.model.clone()))
    }

    /// Replace a registered model's description.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent.
    pub fn update_registered_model(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<RegisteredModel> {
        self.with_model(name, |entry| {
            entry.model.set_description(description.map(str::to_string));
            Ok(entry.model.clone())
        })
    }

    /// Set a tag on a registered model (last write wins).
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidArgument` for bad keys or values.
    pub fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        validate_tag(key, value)?;
        self.with_model(name, |entry| {
            entry.model.tags_mut().insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Remove a tag from a registered model. Removing an absent tag succeeds.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model is absent.
    pub fn delete_registered_model_tag(&self, name: &str, key: &str) -> Result<()> {
        self.with_model(name, |entry| {
            entry.model.tags_mut().remove(key);
            Ok(())
        })
    }

    /// Delete a registered model and every version record.
    ///
    /// Payload bytes already copied stay where they are.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent.
    pub fn delete_registered_model(&self, name: &str) -> Result<()> {
        let (_, entry) = self
            .models
            .remove(name)
            .ok_or_else(|| Error::not_found(Entity::RegisteredModel, name))?;
        info!(model = name, versions = entry.versions.len(), "deleted registered model");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Model versions
    // ------------------------------------------------------------------

    /// Register a new version of `name` from `source`.
    ///
    /// The version number is allocated and the pending record inserted in
    /// one step under the model's guard, so concurrent callers never share
    /// a number. The payload below `source` is then copied to
    /// `<registry_artifact_root>/<name>/<version>` within
    /// `operation_timeout`. A failed copy yields a version in
    /// `FAILED_REGISTRATION` whose number stays consumed.
    ///
    /// `source` may be a `runs:/<run_id>/<path>` URI.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown model or run, or when the model is deleted
    /// (or deleted and recreated) before the copy finishes; the copied bytes
    /// are left in place and a recreated model's versions are never touched.
    /// `UnsupportedScheme` for a source no backend handles. Copy failures
    /// are reported through the returned version's status instead.
    pub async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion> {
        if source.trim().is_empty() {
            return Err(Error::invalid_argument("source", "source must not be empty"));
        }
        if !self.models.contains_key(name) {
            return Err(Error::not_found(Entity::RegisteredModel, name));
        }
        if let Some(run_id) = run_id {
            self.tracking.find_run(run_id, ViewType::All)?;
        }
        let resolved = if source.starts_with(RUNS_URI_PREFIX) {
            self.tracking.resolve_runs_uri(source)?
        } else {
            source.to_string()
        };
        let source_root = self.artifacts.resolve(&resolved)?;

        let (pending, generation) = self.with_model(name, |entry| {
            let version = entry.next_version;
            entry.next_version += 1;
            let location = format!(
                "{}/{name}/{version}",
                self.config.registry_artifact_root.trim_end_matches('/')
            );
            let record =
                ModelVersion::pending(name, version, source, run_id.map(str::to_string), location);
            entry.versions.insert(version, record.clone());
            entry.model.touch();
            Ok((record, entry.generation.clone()))
        })?;
        debug!(model = name, version = pending.version(), source = %resolved, "allocated model version");

        let outcome = self.copy_payload(&source_root, pending.storage_location()).await;
        let finalized = self.with_model(name, |entry| {
            if entry.generation != generation {
                return Err(Error::not_found(Entity::RegisteredModel, name));
            }
            let record = entry.version_mut(pending.version())?;
            match outcome {
                Ok(digest) => record.mark_ready(digest),
                Err(err) => {
                    warn!(
                        model = name,
                        version = pending.version(),
                        error = %err,
                        "model version registration failed"
                    );
                    record.mark_failed(err.to_string());
                }
            }
            Ok(record.clone())
        });
        if let Err(err) = &finalized {
            warn!(
                model = name,
                version = pending.version(),
                error = %err,
                "model or version removed while the payload was copied"
            );
        }
        let version = finalized?;
        info!(
            model = name,
            version = version.version(),
            status = %version.status(),
            "created model version"
        );
        Ok(version)
    }

    async fn copy_payload(&self, source: &ArtifactRoot, location: &str) -> Result<String> {
        let dest = self.artifacts.resolve(location)?;
        match tokio::time::timeout(self.config.operation_timeout, source.copy_tree("", &dest)).await {
            Ok(result) => result,
            Err(_) => Err(Error::unavailable("copy", location, "deadline exceeded")),
        }
    }

    /// Get a model version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model or version is absent.
    pub fn get_model_version(&self, name: &str, version: u64) -> Result<ModelVersion> {
        self.read_model(name, |entry| entry.version(version).cloned())
    }

    /// Replace a model version's description.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model or version is absent.
    pub fn update_model_version(
        &self,
        name: &str,
        version: u64,
        description: Option<&str>,
    ) -> Result<ModelVersion> {
        self.with_model(name, |entry| {
            let record = entry.version_mut(version)?;
            record.set_description(description.map(str::to_string));
            Ok(record.clone())
        })
    }

    /// Set a tag on a model version (last write wins).
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidArgument` for bad keys or values.
    pub fn set_model_version_tag(&self, name: &str, version: u64, key: &str, value: &str) -> Result<()> {
        validate_tag(key, value)?;
        self.with_model(name, |entry| {
            entry
                .version_mut(version)?
                .tags_mut()
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Remove a tag from a model version. Removing an absent tag succeeds.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model or version is absent.
    pub fn delete_model_version_tag(&self, name: &str, version: u64, key: &str) -> Result<()> {
        self.with_model(name, |entry| {
            entry.version_mut(version)?.tags_mut().remove(key);
            Ok(())
        })
    }

    /// Delete a version record. Its number is never reused and its payload
    /// bytes stay in place.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model or version is absent.
    pub fn delete_model_version(&self, name: &str, version: u64) -> Result<()> {
        self.with_model(name, |entry| {
            entry
                .versions
                .remove(&version)
                .ok_or_else(|| version_not_found(name, version))?;
            entry.model.touch();
            Ok(())
        })?;
        info!(model = name, version, "deleted model version");
        Ok(())
    }

    /// URI of a ready version's payload.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidState` if registration has not
    /// completed successfully.
    pub fn get_model_version_download_uri(&self, name: &str, version: u64) -> Result<String> {
        let record = self.get_model_version(name, version)?;
        if !record.is_ready() {
            return Err(Error::invalid_state(
                Entity::ModelVersion,
                record.id(),
                record.status(),
                "payload is not available",
            ));
        }
        Ok(record.storage_location().to_string())
    }

    // ------------------------------------------------------------------
    // Stage transitions
    // ------------------------------------------------------------------

    /// Move a version to `stage` (case-insensitive stage name).
    ///
    /// With `archive_existing` and a target of Staging or Production, every
    /// other version of the model in that stage moves to Archived in the
    /// same critical section.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown stage name; `NotFound` for an
    /// unknown model or version; `InvalidState` for versions that are not
    /// ready or transitions out of Archived other than to None.
    pub fn transition_stage(
        &self,
        name: &str,
        version: u64,
        stage: &str,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        let target: ModelStage = stage.parse()?;
        self.transition(name, version, None, target, archive_existing)
    }

    /// Like [`ModelRegistry::transition_stage`], but only if the version is
    /// currently in `expected`. The precondition is checked against the
    /// committed stage inside the critical section.
    ///
    /// # Errors
    ///
    /// `Conflict` if the current stage is not `expected`; otherwise as
    /// [`ModelRegistry::transition_stage`].
    pub fn transition_stage_if(
        &self,
        name: &str,
        version: u64,
        expected: ModelStage,
        target: ModelStage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        self.transition(name, version, Some(expected), target, archive_existing)
    }

    fn transition(
        &self,
        name: &str,
        version: u64,
        expected: Option<ModelStage>,
        target: ModelStage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        self.with_model(name, |entry| {
            let record = entry.version(version)?;
            let current = record.current_stage();
            if let Some(expected) = expected {
                if current != expected {
                    return Err(Error::Conflict {
                        entity: Entity::ModelVersion,
                        id: record.id(),
                        key: "current_stage".to_string(),
                        existing: current.to_string(),
                        attempted: expected.to_string(),
                    });
                }
            }
            if !record.is_ready() {
                return Err(Error::invalid_state(
                    Entity::ModelVersion,
                    record.id(),
                    record.status(),
                    format!("cannot move to {target} before registration completes"),
                ));
            }
            if !current.can_transition_to(target) {
                return Err(Error::invalid_state(
                    Entity::ModelVersion,
                    record.id(),
                    current,
                    format!("cannot move to {target}"),
                ));
            }

            let mut archived = Vec::new();
            if archive_existing && target.is_exclusive() {
                for other in entry
                    .versions
                    .values_mut()
                    .filter(|v| v.version() != version && v.current_stage() == target)
                {
                    other.set_stage(ModelStage::Archived);
                    archived.push(other.version());
                }
            }
            let record = entry.version_mut(version)?;
            if current != target {
                record.set_stage(target);
            }
            let updated = record.clone();
            entry.model.touch();
            info!(
                model = name,
                version,
                from = %current,
                to = %target,
                archived = ?archived,
                "transitioned model version"
            );
            Ok(updated)
        })
    }

    /// Newest version in each requested stage, in stage order. An empty
    /// `stages` means every stage.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model is absent.
    pub fn get_latest_versions(&self, name: &str, stages: &[ModelStage]) -> Result<Vec<ModelVersion>> {
        self.read_model(name, |entry| {
            Ok(ModelStage::ALL
                .into_iter()
                .filter(|stage| stages.is_empty() || stages.contains(stage))
                .filter_map(|stage| {
                    entry
                        .versions
                        .values()
                        .rev()
                        .find(|v| v.current_stage() == stage)
                        .cloned()
                })
                .collect())
        })
    }

    /// Resolve `models:/<name>/<version>`, `models:/<name>/<stage>` or
    /// `models:/<name>/latest` to a version.
    ///
    /// Stage and `latest` references pick the newest ready version.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed URIs; `NotFound` if nothing matches.
    pub fn resolve_models_uri(&self, uri: &str) -> Result<ModelVersion> {
        let malformed = || {
            Error::invalid_argument(
                "uri",
                format!("'{uri}' is not models:/<name>/<version|stage|latest>"),
            )
        };
        let rest = uri
            .strip_prefix(MODELS_URI_PREFIX)
            .ok_or_else(malformed)?
            .trim_start_matches('/');
        let (name, reference) = rest.split_once('/').ok_or_else(malformed)?;
        let reference = reference.trim_end_matches('/');
        if name.is_empty() || reference.is_empty() {
            return Err(malformed());
        }

        if let Ok(version) = reference.parse::<u64>() {
            return self.get_model_version(name, version);
        }
        let stage = if reference.eq_ignore_ascii_case("latest") {
            None
        } else {
            Some(reference.parse::<ModelStage>()?)
        };
        self.read_model(name, |entry| {
            entry
                .versions
                .values()
                .rev()
                .filter(|v| v.is_ready())
                .find(|v| stage.map_or(true, |s| v.current_stage() == s))
                .cloned()
                .ok_or_else(|| Error::not_found(Entity::ModelVersion, uri))
        })
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    fn page_size(&self, requested: Option<usize>) -> Result<usize> {
        let max_results = requested.unwrap_or(self.config.default_max_results);
        if max_results == 0 || max_results > self.config.max_results_limit {
            return Err(Error::invalid_argument(
                "max_results",
                format!(
                    "must be between 1 and {}, got {max_results}",
                    self.config.max_results_limit
                ),
            ));
        }
        Ok(max_results)
    }

    /// Search registered models. Default order is `name ASC`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed filters, orderings, page sizes or tokens.
    pub fn search_registered_models(&self, request: &RegistrySearch) -> Result<Page<RegisteredModel>> {
        let max_results = self.page_size(request.max_results)?;
        let filter = SearchFilter::parse(&request.filter)?;
        filter.restrict(&SEARCH_NAMESPACES, REGISTERED_MODEL_ATTRIBUTES)?;
        let mut orders =
            OrderBy::parse_all(&request.order_by, &SEARCH_NAMESPACES, REGISTERED_MODEL_ATTRIBUTES)?;
        if orders.is_empty() {
            orders.push(OrderBy::asc(FilterKey::new(FilterNamespace::Attribute, "name")));
        }

        let rows = self
            .models
            .iter()
            .filter(|entry| filter.matches(&entry.model))
            .map(|entry| {
                let key = SortKey::of(&entry.model, &orders, entry.model.name());
                (key, entry.model.clone())
            })
            .collect();
        let fingerprint = query_fingerprint(
            &["registered_models".to_string()],
            &request.filter,
            &request.order_by,
            ViewType::All,
        );
        paginate(rows, &orders, &fingerprint, request.page_token.as_deref(), max_results)
    }

    /// Search model versions across all models. Default order is
    /// `name ASC, version DESC`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed filters, orderings, page sizes or tokens.
    pub fn search_model_versions(&self, request: &RegistrySearch) -> Result<Page<ModelVersion>> {
        let max_results = self.page_size(request.max_results)?;
        let filter = SearchFilter::parse(&request.filter)?;
        filter.restrict(&SEARCH_NAMESPACES, MODEL_VERSION_ATTRIBUTES)?;
        let mut orders =
            OrderBy::parse_all(&request.order_by, &SEARCH_NAMESPACES, MODEL_VERSION_ATTRIBUTES)?;
        if orders.is_empty() {
            orders.push(OrderBy::asc(FilterKey::new(FilterNamespace::Attribute, "name")));
            orders.push(OrderBy::desc(FilterKey::new(FilterNamespace::Attribute, "version")));
        }

        let mut rows = Vec::new();
        for entry in &self.models {
            for version in entry.versions.values().filter(|v| filter.matches(*v)) {
                // zero-padded so the tie-breaker orders numerically
                let id = format!("{}/{:020}", version.name(), version.version());
                rows.push((SortKey::of(version, &orders, &id), version.clone()));
            }
        }
        let fingerprint = query_fingerprint(
            &["model_versions".to_string()],
            &request.filter,
            &request.order_by,
            ViewType::All,
        );
        paginate(rows, &orders, &fingerprint, request.page_token.as_deref(), max_results)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write a JSON snapshot of every model and version.
    ///
    /// # Errors
    ///
    /// I/O failures map through the error taxonomy.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut models: Vec<ModelEntry> = self.models.iter().map(|e| e.value().clone()).collect();
        models.sort_by(|a, b| a.model.name().cmp(b.model.name()));
        let bytes = serde_json::to_vec(&models)?;
        write_atomically(path.as_ref(), &bytes)
    }

    /// Load a registry from a snapshot written by
    /// [`ModelRegistry::save_snapshot`].
    ///
    /// Versions still pending when the snapshot was taken are marked
    /// failed, since their copy can no longer complete.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file is missing; `InvalidArgument` if it is corrupt.
    pub fn load_snapshot<P: AsRef<Path>>(
        path: P,
        config: TrackingConfig,
        artifacts: ArtifactRepositoryRegistry,
        tracking: Arc<TrackingStore>,
    ) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let entries: Vec<ModelEntry> = serde_json::from_slice(&bytes)?;
        let models = DashMap::new();
        for mut entry in entries {
            for version in entry.versions.values_mut() {
                if version.status() == ModelVersionStatus::PendingRegistration {
                    version.mark_failed("registration interrupted");
                }
            }
            models.insert(entry.model.name().to_string(), entry);
        }
        Ok(Self {
            config,
            models,
            artifacts,
            tracking,
        })
    }
}
