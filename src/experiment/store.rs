//! Tracking Store - concurrent storage for experiment tracking data
//!
//! ## Design
//!
//! Runs live in a `DashMap` keyed by run id, so logging to different runs
//! never contends. Experiments and the live-name index sit behind one
//! `RwLock` (the catalog); experiment mutations are rare and need the name
//! index and the record to change together.
//!
//! Lock order is always catalog, then run shard. Operations touching only a
//! run (metric/param/tag logging, reads) take just the run shard.
//!
//! ## Time-Series Storage
//!
//! Metrics are stored per run and key in insertion order. Reads sort by
//! `(step, timestamp)` with a stable sort, so insertion order breaks the
//! remaining ties. Each series keeps a hash index of its points and the
//! position of its latest one, so replay checks and summaries do not scan.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::filter::{FieldValue, FilterKey, FilterNamespace, FilterSubject, SearchFilter};
use super::param_record::{
    validate_key, validate_value, MAX_PARAM_VALUE_LENGTH, MAX_TAG_VALUE_LENGTH,
};
use super::search::{paginate, query_fingerprint, OrderBy, Page, SortKey, ViewType};
use super::{
    ExperimentRecord, LifecycleStage, MetricRecord, ParamRecord, RunRecord, RunStatus, TagRecord,
};
use crate::config::TrackingConfig;
use crate::error::Entity;
use crate::{Error, Result};

/// Id of the experiment created with every store.
pub const DEFAULT_EXPERIMENT_ID: &str = "0";
/// Name of the experiment created with every store.
pub const DEFAULT_EXPERIMENT_NAME: &str = "Default";

/// Scheme prefix of run-relative artifact URIs.
pub const RUNS_URI_PREFIX: &str = "runs:/";

/// Attributes usable in run filters and orderings.
pub const RUN_ATTRIBUTES: &[&str] = &[
    "run_id",
    "run_name",
    "experiment_id",
    "status",
    "start_time",
    "end_time",
    "artifact_uri",
    "lifecycle_stage",
];

/// Attributes usable in experiment filters.
pub const EXPERIMENT_ATTRIBUTES: &[&str] = &[
    "experiment_id",
    "name",
    "artifact_location",
    "lifecycle_stage",
    "creation_time",
    "last_update_time",
];

/// Which metric points [`TrackingStore::get_metric_history`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricHistoryView {
    /// Every logged point, ordered by `(step, timestamp)`.
    #[default]
    All,
    /// One point per step: the latest by timestamp, then insertion.
    LatestPerStep,
}

/// Run data surfaced by reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunData {
    /// Latest point per metric key, ordered by key.
    pub metrics: Vec<MetricRecord>,
    /// Params by key.
    pub params: BTreeMap<String, String>,
    /// Tags by key.
    pub tags: BTreeMap<String, String>,
}

/// A run with its summarized data.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Run metadata
    pub info: RunRecord,
    /// Latest metrics, params and tags
    pub data: RunData,
}

impl Run {
    /// Latest value of a metric, if logged.
    #[must_use]
    pub fn latest_metric(&self, key: &str) -> Option<f64> {
        self.data
            .metrics
            .iter()
            .find(|m| m.key() == key)
            .map(MetricRecord::value)
    }
}

/// Request to create a run.
#[derive(Debug, Clone)]
pub struct CreateRun {
    experiment_id: String,
    start_time: Option<DateTime<Utc>>,
    run_name: Option<String>,
    status: RunStatus,
    tags: Vec<TagRecord>,
}

impl CreateRun {
    /// Create a request for a run in `experiment_id`.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            start_time: None,
            run_name: None,
            status: RunStatus::Running,
            tags: Vec::new(),
        }
    }

    /// Set the start time (defaults to now).
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Set the run name.
    #[must_use]
    pub fn run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    /// Create the run as `Scheduled` instead of `Running`.
    #[must_use]
    pub const fn scheduled(mut self) -> Self {
        self.status = RunStatus::Scheduled;
        self
    }

    /// Add an initial tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(TagRecord::new(key, value));
        self
    }
}

/// Search request for runs.
#[derive(Debug, Clone, Default)]
pub struct SearchRuns {
    /// Experiments to search
    pub experiment_ids: Vec<String>,
    /// Filter expression (see [`SearchFilter`])
    pub filter: String,
    /// Ordering clauses; defaults to `start_time DESC`
    pub order_by: Vec<String>,
    /// Page size; defaults to the configured default
    pub max_results: Option<usize>,
    /// Token from a previous page
    pub page_token: Option<String>,
    /// Lifecycle view
    pub view: ViewType,
}

impl SearchRuns {
    /// Search the given experiments with no filter.
    #[must_use]
    pub fn new<I, S>(experiment_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            experiment_ids: experiment_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the filter expression.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Add an ordering clause.
    ///
    /// Pages resume after the last sort key of the previous page, judged
    /// against each run's current values. Ordering on immutable attributes
    /// (`start_time`, `run_id`, params) is stable across a traversal. When
    /// ordering on a metric, tag or status that changes between page
    /// fetches, the changed run may be returned twice or skipped, because
    /// it moves across the cursor.
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

    /// Set the lifecycle view.
    #[must_use]
    pub const fn view(mut self, view: ViewType) -> Self {
        self.view = view;
        self
    }
}

/// Entities removed by [`TrackingStore::purge_deleted`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Purged experiment ids
    pub experiment_ids: Vec<String>,
    /// Purged run ids
    pub run_ids: Vec<String>,
    /// Artifact roots of purged runs, for the caller to delete
    pub artifact_uris: Vec<String>,
}

/// Identity of a metric point within one series: step, timestamp and the
/// value's bit pattern.
type PointId = (i64, i64, u32, u64);

fn point_id(metric: &MetricRecord) -> PointId {
    let ts = metric.timestamp();
    (
        metric.step(),
        ts.timestamp(),
        ts.timestamp_subsec_nanos(),
        metric.value().to_bits(),
    )
}

/// One metric key's points in insertion order, with an index of the points
/// already seen and the position of the latest one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<MetricRecord>", into = "Vec<MetricRecord>")]
struct MetricSeries {
    points: Vec<MetricRecord>,
    seen: FxHashSet<PointId>,
    latest: usize,
}

impl MetricSeries {
    fn contains(&self, metric: &MetricRecord) -> bool {
        self.seen.contains(&point_id(metric))
    }

    /// Returns whether the point was new.
    fn push(&mut self, metric: MetricRecord) -> bool {
        if !self.seen.insert(point_id(&metric)) {
            return false;
        }
        // later inserts win ties
        let newer = self
            .points
            .get(self.latest)
            .map_or(true, |latest| metric.series_cmp(latest).is_ge());
        if newer {
            self.latest = self.points.len();
        }
        self.points.push(metric);
        true
    }

    fn latest(&self) -> Option<&MetricRecord> {
        self.points.get(self.latest)
    }
}

impl From<Vec<MetricRecord>> for MetricSeries {
    fn from(points: Vec<MetricRecord>) -> Self {
        let mut series = Self::default();
        for point in points {
            series.push(point);
        }
        series
    }
}

impl From<MetricSeries> for Vec<MetricRecord> {
    fn from(series: MetricSeries) -> Self {
        series.points
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunEntry {
    info: RunRecord,
    metrics: BTreeMap<String, MetricSeries>,
    params: BTreeMap<String, String>,
    tags: BTreeMap<String, String>,
    // soft-deleted together with its experiment; restored with it
    cascade_deleted: bool,
}

impl RunEntry {
    fn new(info: RunRecord) -> Self {
        Self {
            info,
            metrics: BTreeMap::new(),
            params: BTreeMap::new(),
            tags: BTreeMap::new(),
            cascade_deleted: false,
        }
    }

    fn latest(&self, key: &str) -> Option<&MetricRecord> {
        self.metrics.get(key)?.latest()
    }

    fn has_point(&self, metric: &MetricRecord) -> bool {
        self.metrics
            .get(metric.key())
            .is_some_and(|series| series.contains(metric))
    }

    fn snapshot(&self) -> Run {
        Run {
            info: self.info.clone(),
            data: RunData {
                metrics: self
                    .metrics
                    .keys()
                    .filter_map(|key| self.latest(key).cloned())
                    .collect(),
                params: self.params.clone(),
                tags: self.tags.clone(),
            },
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.info.status().is_terminal() {
            return Err(Error::invalid_state(
                Entity::Run,
                self.info.run_id(),
                self.info.status(),
                "run is terminated; no further metrics or params",
            ));
        }
        Ok(())
    }

    /// Returns whether the point was new.
    fn push_metric(&mut self, metric: MetricRecord) -> bool {
        self.metrics
            .entry(metric.key().to_string())
            .or_default()
            .push(metric)
    }

    fn check_param(&self, key: &str, value: &str) -> Result<bool> {
        match self.params.get(key) {
            Some(existing) if existing == value => Ok(false),
            Some(existing) => Err(Error::Conflict {
                entity: Entity::Param,
                id: self.info.run_id().to_string(),
                key: key.to_string(),
                existing: existing.clone(),
                attempted: value.to_string(),
            }),
            None => Ok(true),
        }
    }
}

impl FilterSubject for RunEntry {
    fn lookup(&self, key: &FilterKey) -> Option<FieldValue<'_>> {
        let text = |s: &str| Some(FieldValue::Text(Cow::Owned(s.to_string())));
        match key.namespace {
            FilterNamespace::Metric => self.latest(&key.name).map(|m| FieldValue::Number(m.value())),
            FilterNamespace::Param => self
                .params
                .get(&key.name)
                .map(|v| FieldValue::Text(Cow::Borrowed(v.as_str()))),
            FilterNamespace::Tag => self
                .tags
                .get(&key.name)
                .map(|v| FieldValue::Text(Cow::Borrowed(v.as_str()))),
            FilterNamespace::Attribute => match key.name.as_str() {
                "run_id" => text(self.info.run_id()),
                "run_name" => self.info.run_name().and_then(text),
                "experiment_id" => text(self.info.experiment_id()),
                "status" => text(self.info.status().as_str()),
                #[allow(clippy::cast_precision_loss)]
                "start_time" => Some(FieldValue::Number(
                    self.info.start_time().timestamp_millis() as f64,
                )),
                #[allow(clippy::cast_precision_loss)]
                "end_time" => self
                    .info
                    .end_time()
                    .map(|t| FieldValue::Number(t.timestamp_millis() as f64)),
                "artifact_uri" => text(self.info.artifact_uri()),
                "lifecycle_stage" => text(&self.info.lifecycle_stage().to_string()),
                _ => None,
            },
        }
    }
}

impl FilterSubject for ExperimentRecord {
    fn lookup(&self, key: &FilterKey) -> Option<FieldValue<'_>> {
        match key.namespace {
            FilterNamespace::Tag => self
                .tags()
                .get(&key.name)
                .map(|v| FieldValue::Text(Cow::Borrowed(v.as_str()))),
            FilterNamespace::Attribute => match key.name.as_str() {
                "experiment_id" => Some(FieldValue::Text(Cow::Borrowed(self.experiment_id()))),
                "name" => Some(FieldValue::Text(Cow::Borrowed(self.name()))),
                "artifact_location" => {
                    Some(FieldValue::Text(Cow::Borrowed(self.artifact_location())))
                }
                "lifecycle_stage" => Some(FieldValue::Text(Cow::Owned(
                    self.lifecycle_stage().to_string(),
                ))),
                #[allow(clippy::cast_precision_loss)]
                "creation_time" => Some(FieldValue::Number(
                    self.created_at().timestamp_millis() as f64,
                )),
                #[allow(clippy::cast_precision_loss)]
                "last_update_time" => Some(FieldValue::Number(
                    self.last_updated_at().timestamp_millis() as f64,
                )),
                _ => None,
            },
            FilterNamespace::Metric | FilterNamespace::Param => None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    experiments: BTreeMap<String, ExperimentRecord>,
    // live (non-deleted) name -> id
    names: BTreeMap<String, String>,
}

impl Catalog {
    fn live(&self, experiment_id: &str) -> Result<&ExperimentRecord> {
        self.experiments
            .get(experiment_id)
            .filter(|e| e.is_active())
            .ok_or_else(|| Error::not_found(Entity::Experiment, experiment_id))
    }

    fn live_mut(&mut self, experiment_id: &str) -> Result<&mut ExperimentRecord> {
        self.experiments
            .get_mut(experiment_id)
            .filter(|e| e.is_active())
            .ok_or_else(|| Error::not_found(Entity::Experiment, experiment_id))
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_experiment_id: u64,
    catalog: Catalog,
    runs: Vec<RunEntry>,
}

/// Durable store for experiments, runs, metrics, params and tags.
///
/// All methods take `&self`; share the store across threads with `Arc`.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use trueno_track::config::TrackingConfig;
/// use trueno_track::experiment::{MetricHistoryView, TrackingStore};
///
/// let store = TrackingStore::new(TrackingConfig::default());
/// let exp = store.create_experiment("mnist", None).unwrap();
/// let run = store.create_run(&exp, Utc::now()).unwrap();
///
/// for step in 0..100 {
///     let loss = 1.0 / (step as f64 + 1.0);
///     store.log_metric(&run, "loss", loss, Utc::now(), step).unwrap();
/// }
///
/// let history = store.get_metric_history(&run, "loss", MetricHistoryView::All).unwrap();
/// assert_eq!(history.len(), 100);
/// ```
#[derive(Debug)]
pub struct TrackingStore {
    config: TrackingConfig,
    catalog: RwLock<Catalog>,
    runs: DashMap<String, RunEntry>,
    next_experiment_id: AtomicU64,
}

impl TrackingStore {
    /// Create an empty store holding only the default experiment.
    #[must_use]
    pub fn new(config: TrackingConfig) -> Self {
        let location = experiment_location(&config, DEFAULT_EXPERIMENT_ID);
        let mut catalog = Catalog::default();
        catalog.experiments.insert(
            DEFAULT_EXPERIMENT_ID.to_string(),
            ExperimentRecord::new(DEFAULT_EXPERIMENT_ID, DEFAULT_EXPERIMENT_NAME, location),
        );
        catalog.names.insert(
            DEFAULT_EXPERIMENT_NAME.to_string(),
            DEFAULT_EXPERIMENT_ID.to_string(),
        );
        Self {
            config,
            catalog: RwLock::new(catalog),
            runs: DashMap::new(),
            next_experiment_id: AtomicU64::new(1),
        }
    }

    /// The configuration this store was built with.
    #[must_use]
    pub const fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Number of experiments in any lifecycle stage.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.catalog.read().experiments.len()
    }

    /// Number of runs in any lifecycle stage.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    /// Create an experiment and return its id.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a live experiment has the name; `InvalidArgument`
    /// for an empty name.
    pub fn create_experiment(&self, name: &str, artifact_location: Option<&str>) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("name", "experiment name must not be empty"));
        }
        let mut catalog = self.catalog.write();
        if catalog.names.contains_key(name) {
            return Err(Error::already_exists(Entity::Experiment, name));
        }
        let id = self.next_experiment_id.fetch_add(1, Ordering::SeqCst).to_string();
        let location = artifact_location
            .map_or_else(|| experiment_location(&self.config, &id), str::to_string);
        catalog
            .experiments
            .insert(id.clone(), ExperimentRecord::new(&id, name, location));
        catalog.names.insert(name.to_string(), id.clone());
        info!(experiment_id = %id, name, "created experiment");
        Ok(id)
    }

    /// Get a live experiment.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or soft-deleted.
    pub fn get_experiment(&self, experiment_id: &str) -> Result<ExperimentRecord> {
        self.find_experiment(experiment_id, ViewType::ActiveOnly)
    }

    /// Get an experiment visible under `view`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or outside the view.
    pub fn find_experiment(&self, experiment_id: &str, view: ViewType) -> Result<ExperimentRecord> {
        self.catalog
            .read()
            .experiments
            .get(experiment_id)
            .filter(|e| view.includes(e.lifecycle_stage()))
            .cloned()
            .ok_or_else(|| Error::not_found(Entity::Experiment, experiment_id))
    }

    /// Get a live experiment by name.
    ///
    /// # Errors
    ///
    /// `NotFound` if no live experiment has the name.
    pub fn get_experiment_by_name(&self, name: &str) -> Result<ExperimentRecord> {
        let catalog = self.catalog.read();
        catalog
            .names
            .get(name)
            .and_then(|id| catalog.experiments.get(id))
            .cloned()
            .ok_or_else(|| Error::not_found(Entity::Experiment, name))
    }

    /// Experiments matching `filter` under `view`, ordered by creation.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed filter.
    pub fn search_experiments(&self, view: ViewType, filter: &str) -> Result<Vec<ExperimentRecord>> {
        let filter = SearchFilter::parse(filter)?;
        filter.restrict(
            &[FilterNamespace::Attribute, FilterNamespace::Tag],
            EXPERIMENT_ATTRIBUTES,
        )?;
        let mut found: Vec<ExperimentRecord> = self
            .catalog
            .read()
            .experiments
            .values()
            .filter(|e| view.includes(e.lifecycle_stage()) && filter.matches(*e))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.created_at(), e.experiment_id().parse::<u64>().unwrap_or(u64::MAX)));
        Ok(found)
    }

    /// Rename a live experiment.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or deleted; `AlreadyExists` if the name is taken.
    pub fn rename_experiment(&self, experiment_id: &str, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            return Err(Error::invalid_argument("name", "experiment name must not be empty"));
        }
        let mut catalog = self.catalog.write();
        let old_name = catalog.live(experiment_id)?.name().to_string();
        if old_name == new_name {
            return Ok(());
        }
        if catalog.names.contains_key(new_name) {
            return Err(Error::already_exists(Entity::Experiment, new_name));
        }
        catalog.names.remove(&old_name);
        catalog
            .names
            .insert(new_name.to_string(), experiment_id.to_string());
        catalog.live_mut(experiment_id)?.rename(new_name);
        info!(experiment_id, old_name, new_name, "renamed experiment");
        Ok(())
    }

    /// Set a tag on a live experiment (last write wins).
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or deleted; `InvalidArgument` for a bad key/value.
    pub fn set_experiment_tag(&self, experiment_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("tag", key)?;
        validate_value("tag", key, value, MAX_TAG_VALUE_LENGTH)?;
        self.catalog
            .write()
            .live_mut(experiment_id)?
            .set_tag(key, value);
        Ok(())
    }

    /// Soft-delete an experiment and its live runs.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or already deleted.
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        let mut catalog = self.catalog.write();
        let now = Utc::now();
        let name = {
            let experiment = catalog.live_mut(experiment_id)?;
            experiment.mark_deleted(now);
            experiment.name().to_string()
        };
        catalog.names.remove(&name);

        let mut cascaded = 0usize;
        for mut entry in self.runs.iter_mut() {
            if entry.info.experiment_id() == experiment_id && entry.info.is_active() {
                entry.info.mark_deleted(now);
                entry.cascade_deleted = true;
                cascaded += 1;
            }
        }
        info!(experiment_id, runs = cascaded, "soft-deleted experiment");
        Ok(())
    }

    /// Restore a soft-deleted experiment and the runs deleted with it.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidState` if not deleted; `AlreadyExists`
    /// if a live experiment now holds its name.
    pub fn restore_experiment(&self, experiment_id: &str) -> Result<()> {
        let mut catalog = self.catalog.write();
        let experiment = catalog
            .experiments
            .get(experiment_id)
            .ok_or_else(|| Error::not_found(Entity::Experiment, experiment_id))?;
        if experiment.is_active() {
            return Err(Error::invalid_state(
                Entity::Experiment,
                experiment_id,
                experiment.lifecycle_stage(),
                "only deleted experiments can be restored",
            ));
        }
        let name = experiment.name().to_string();
        if catalog.names.contains_key(&name) {
            return Err(Error::already_exists(Entity::Experiment, name));
        }
        catalog.names.insert(name, experiment_id.to_string());
        if let Some(experiment) = catalog.experiments.get_mut(experiment_id) {
            experiment.mark_restored();
        }

        for mut entry in self.runs.iter_mut() {
            if entry.info.experiment_id() == experiment_id && entry.cascade_deleted {
                entry.info.mark_restored();
                entry.cascade_deleted = false;
            }
        }
        info!(experiment_id, "restored experiment");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Create a running run in `experiment_id` and return its id.
    ///
    /// # Errors
    ///
    /// `NotFound` if the experiment never existed; `InvalidState` if it is deleted.
    pub fn create_run(&self, experiment_id: &str, start_time: DateTime<Utc>) -> Result<String> {
        self.create_run_with(CreateRun::new(experiment_id).start_time(start_time))
            .map(|run| run.info.run_id().to_string())
    }

    /// Create a run from a full request.
    ///
    /// # Errors
    ///
    /// As [`TrackingStore::create_run`], plus `InvalidArgument` for bad tags.
    pub fn create_run_with(&self, request: CreateRun) -> Result<Run> {
        for tag in &request.tags {
            validate_key("tag", tag.key())?;
            validate_value("tag", tag.key(), tag.value(), MAX_TAG_VALUE_LENGTH)?;
        }

        // held across the insert so a concurrent delete cannot interleave
        let catalog = self.catalog.read();
        let experiment = catalog
            .experiments
            .get(&request.experiment_id)
            .ok_or_else(|| Error::not_found(Entity::Experiment, &request.experiment_id))?;
        if !experiment.is_active() {
            return Err(Error::invalid_state(
                Entity::Experiment,
                &request.experiment_id,
                experiment.lifecycle_stage(),
                "cannot create runs in a deleted experiment",
            ));
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let artifact_uri = format!(
            "{}/{run_id}/artifacts",
            experiment.artifact_location().trim_end_matches('/')
        );
        let mut builder = RunRecord::builder(&run_id, &request.experiment_id, artifact_uri)
            .status(request.status)
            .start_time(request.start_time.unwrap_or_else(Utc::now));
        if let Some(name) = &request.run_name {
            builder = builder.run_name(name);
        }
        let mut entry = RunEntry::new(builder.build());
        for tag in request.tags {
            entry.tags.insert(tag.key().to_string(), tag.value().to_string());
        }
        let run = entry.snapshot();
        self.runs.insert(run_id.clone(), entry);
        drop(catalog);

        info!(run_id = %run_id, experiment_id = %request.experiment_id, "created run");
        Ok(run)
    }

    /// Get a live run with its latest metrics, params and tags.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or soft-deleted.
    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.find_run(run_id, ViewType::ActiveOnly)
    }

    /// Get a run visible under `view`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or outside the view.
    pub fn find_run(&self, run_id: &str, view: ViewType) -> Result<Run> {
        self.runs
            .get(run_id)
            .filter(|entry| view.includes(entry.info.lifecycle_stage()))
            .map(|entry| entry.snapshot())
            .ok_or_else(|| Error::not_found(Entity::Run, run_id))
    }

    /// Resolve `runs:/<run_id>/<path>` to a concrete URI under the run's
    /// artifact root. Deleted runs still resolve.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a URI that is not `runs:/`; `NotFound` for an
    /// unknown run.
    pub fn resolve_runs_uri(&self, uri: &str) -> Result<String> {
        let rest = uri
            .strip_prefix(RUNS_URI_PREFIX)
            .ok_or_else(|| Error::invalid_argument("uri", format!("'{uri}' is not a runs:/ URI")))?;
        let rest = rest.trim_start_matches('/');
        let (run_id, path) = rest.split_once('/').unwrap_or((rest, ""));
        if run_id.is_empty() {
            return Err(Error::invalid_argument("uri", format!("'{uri}' has no run id")));
        }
        let run = self.find_run(run_id, ViewType::All)?;
        let path = crate::artifact::normalize_path(path)?;
        Ok(crate::artifact::join_path(run.info.artifact_uri(), &path))
    }

    fn with_live_run<T>(&self, run_id: &str, f: impl FnOnce(&mut RunEntry) -> Result<T>) -> Result<T> {
        let mut entry = self
            .runs
            .get_mut(run_id)
            .filter(|entry| entry.info.is_active())
            .ok_or_else(|| Error::not_found(Entity::Run, run_id))?;
        f(&mut *entry)
    }

    /// Advance a run's status.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or deleted; `InvalidState` when leaving a
    /// terminal status or moving backwards.
    pub fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<RunRecord> {
        self.with_live_run(run_id, |entry| {
            entry.info.transition(status, end_time)?;
            debug!(run_id, %status, "updated run status");
            Ok(entry.info.clone())
        })
    }

    /// Rename a live run.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or deleted.
    pub fn rename_run(&self, run_id: &str, name: &str) -> Result<()> {
        self.with_live_run(run_id, |entry| {
            entry.info.set_run_name(name);
            Ok(())
        })
    }

    /// Soft-delete a run.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or already deleted.
    pub fn delete_run(&self, run_id: &str) -> Result<()> {
        self.with_live_run(run_id, |entry| {
            entry.info.mark_deleted(Utc::now());
            entry.cascade_deleted = false;
            Ok(())
        })?;
        info!(run_id, "soft-deleted run");
        Ok(())
    }

    /// Restore a soft-deleted run.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidState` if not deleted or if its
    /// experiment is deleted.
    pub fn restore_run(&self, run_id: &str) -> Result<()> {
        let catalog = self.catalog.read();
        let mut entry = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::not_found(Entity::Run, run_id))?;
        if entry.info.is_active() {
            return Err(Error::invalid_state(
                Entity::Run,
                run_id,
                entry.info.lifecycle_stage(),
                "only deleted runs can be restored",
            ));
        }
        if catalog.live(entry.info.experiment_id()).is_err() {
            return Err(Error::invalid_state(
                Entity::Experiment,
                entry.info.experiment_id(),
                LifecycleStage::Deleted,
                "restore the experiment first",
            ));
        }
        entry.info.mark_restored();
        entry.cascade_deleted = false;
        drop(entry);
        drop(catalog);
        info!(run_id, "restored run");
        Ok(())
    }

    /// Append a metric point. Replaying an identical point is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run is absent or deleted; `InvalidState` if the run
    /// is terminated; `InvalidArgument` for a bad key.
    pub fn log_metric(
        &self,
        run_id: &str,
        key: &str,
        value: f64,
        timestamp: DateTime<Utc>,
        step: i64,
    ) -> Result<()> {
        validate_key("metric", key)?;
        let metric = MetricRecord::builder(run_id, key, step, value)
            .timestamp(timestamp)
            .build();
        self.with_live_run(run_id, |entry| {
            if entry.has_point(&metric) {
                return Ok(());
            }
            entry.ensure_writable()?;
            entry.push_metric(metric);
            Ok(())
        })
    }

    /// Record a param; the first value written for a key wins.
    ///
    /// # Errors
    ///
    /// `Conflict` if the key holds a different value; `NotFound`,
    /// `InvalidState` and `InvalidArgument` as for metrics.
    pub fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("param", key)?;
        validate_value("param", key, value, MAX_PARAM_VALUE_LENGTH)?;
        self.with_live_run(run_id, |entry| {
            if !entry.check_param(key, value)? {
                return Ok(());
            }
            entry.ensure_writable()?;
            entry.params.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Set a run tag (last write wins). Allowed on terminated runs.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run is absent or deleted; `InvalidArgument` for a bad key.
    pub fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        validate_key("tag", key)?;
        validate_value("tag", key, value, MAX_TAG_VALUE_LENGTH)?;
        self.with_live_run(run_id, |entry| {
            entry.tags.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Remove a run tag. Removing an absent tag succeeds.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run is absent or deleted.
    pub fn delete_tag(&self, run_id: &str, key: &str) -> Result<()> {
        self.with_live_run(run_id, |entry| {
            entry.tags.remove(key);
            Ok(())
        })
    }

    /// Log metrics, params and tags as one unit: either all apply or none.
    ///
    /// # Errors
    ///
    /// Any error the individual operations would raise; nothing is written
    /// when one is raised. Duplicate param keys with different values inside
    /// the batch fail `Conflict`.
    pub fn log_batch(
        &self,
        run_id: &str,
        metrics: &[MetricRecord],
        params: &[ParamRecord],
        tags: &[TagRecord],
    ) -> Result<()> {
        for metric in metrics {
            validate_key("metric", metric.key())?;
        }
        for param in params {
            validate_key("param", param.key())?;
            validate_value("param", param.key(), param.value(), MAX_PARAM_VALUE_LENGTH)?;
        }
        for tag in tags {
            validate_key("tag", tag.key())?;
            validate_value("tag", tag.key(), tag.value(), MAX_TAG_VALUE_LENGTH)?;
        }

        self.with_live_run(run_id, |entry| {
            let mut new_params: BTreeMap<&str, &str> = BTreeMap::new();
            for param in params {
                if let Some(prior) = new_params.get(param.key()) {
                    if *prior != param.value() {
                        return Err(Error::Conflict {
                            entity: Entity::Param,
                            id: run_id.to_string(),
                            key: param.key().to_string(),
                            existing: (*prior).to_string(),
                            attempted: param.value().to_string(),
                        });
                    }
                    continue;
                }
                if entry.check_param(param.key(), param.value())? {
                    new_params.insert(param.key(), param.value());
                }
            }

            let metrics: Vec<MetricRecord> = metrics
                .iter()
                .map(|m| m.clone().with_run_id(run_id))
                .collect();
            let has_new_metric = metrics.iter().any(|m| !entry.has_point(m));
            if has_new_metric || !new_params.is_empty() {
                entry.ensure_writable()?;
            }

            for metric in metrics {
                entry.push_metric(metric);
            }
            for (key, value) in new_params {
                entry.params.insert(key.to_string(), value.to_string());
            }
            for tag in tags {
                entry.tags.insert(tag.key().to_string(), tag.value().to_string());
            }
            Ok(())
        })
    }

    /// Metric history for one key of a live run. Unknown keys yield an empty list.
    ///
    /// # Errors
    ///
    /// `NotFound` if the run is absent or deleted.
    pub fn get_metric_history(
        &self,
        run_id: &str,
        key: &str,
        view: MetricHistoryView,
    ) -> Result<Vec<MetricRecord>> {
        let entry = self
            .runs
            .get(run_id)
            .filter(|entry| entry.info.is_active())
            .ok_or_else(|| Error::not_found(Entity::Run, run_id))?;
        let mut points = entry
            .metrics
            .get(key)
            .map(|series| series.points.clone())
            .unwrap_or_default();
        drop(entry);

        // stable: insertion order survives among equal (step, timestamp)
        points.sort_by(MetricRecord::series_cmp);
        if view == MetricHistoryView::LatestPerStep {
            let mut latest: Vec<MetricRecord> = Vec::with_capacity(points.len());
            for point in points {
                match latest.last_mut() {
                    Some(last) if last.step() == point.step() => *last = point,
                    _ => latest.push(point),
                }
            }
            return Ok(latest);
        }
        Ok(points)
    }

    /// Search runs across experiments.
    ///
    /// Ordering is total (ties broken by run id). Page tokens are opaque and
    /// keyset-based: a traversal started before concurrent appends neither
    /// repeats nor skips runs that existed when it started, as long as the
    /// sort keys of those runs do not change (see [`SearchRuns::order_by`]).
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed filters, orderings, page sizes or tokens.
    pub fn search_runs(&self, request: &SearchRuns) -> Result<Page<Run>> {
        let max_results = request
            .max_results
            .unwrap_or(self.config.default_max_results);
        if max_results == 0 || max_results > self.config.max_results_limit {
            return Err(Error::invalid_argument(
                "max_results",
                format!(
                    "must be between 1 and {}, got {max_results}",
                    self.config.max_results_limit
                ),
            ));
        }
        let all_namespaces = [
            FilterNamespace::Metric,
            FilterNamespace::Param,
            FilterNamespace::Tag,
            FilterNamespace::Attribute,
        ];
        let filter = SearchFilter::parse(&request.filter)?;
        filter.restrict(&all_namespaces, RUN_ATTRIBUTES)?;
        let mut orders = OrderBy::parse_all(&request.order_by, &all_namespaces, RUN_ATTRIBUTES)?;
        if orders.is_empty() {
            orders.push(OrderBy::desc(FilterKey::new(
                FilterNamespace::Attribute,
                "start_time",
            )));
        }

        let scope: FxHashSet<&str> = request.experiment_ids.iter().map(String::as_str).collect();
        let rows: Vec<(SortKey, Run)> = self
            .runs
            .iter()
            .filter(|entry| {
                scope.contains(entry.info.experiment_id())
                    && request.view.includes(entry.info.lifecycle_stage())
                    && filter.matches(entry.value())
            })
            .map(|entry| {
                let key = SortKey::of(entry.value(), &orders, entry.info.run_id());
                (key, entry.snapshot())
            })
            .collect();

        let fingerprint = query_fingerprint(
            &request.experiment_ids,
            &request.filter,
            &request.order_by,
            request.view,
        );
        paginate(
            rows,
            &orders,
            &fingerprint,
            request.page_token.as_deref(),
            max_results,
        )
    }

    // ------------------------------------------------------------------
    // Purge and persistence
    // ------------------------------------------------------------------

    /// Permanently remove entities soft-deleted before `now - restore_window`.
    ///
    /// Runs of a purged experiment are purged with it regardless of their
    /// own state. Artifact bytes are not touched; the report lists the
    /// artifact roots for the caller to delete.
    pub fn purge_deleted(&self, now: DateTime<Utc>) -> PurgeReport {
        let window = chrono::Duration::from_std(self.config.restore_window)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired = |deleted_at: Option<DateTime<Utc>>| deleted_at.is_some_and(|t| t <= cutoff);

        let mut catalog = self.catalog.write();
        let purged_experiments: Vec<String> = catalog
            .experiments
            .values()
            .filter(|e| !e.is_active() && expired(e.deleted_at()))
            .map(|e| e.experiment_id().to_string())
            .collect();
        for id in &purged_experiments {
            catalog.experiments.remove(id);
        }
        let purged_set: FxHashSet<&str> = purged_experiments.iter().map(String::as_str).collect();

        let mut report = PurgeReport {
            experiment_ids: purged_experiments.clone(),
            ..PurgeReport::default()
        };
        self.runs.retain(|run_id, entry| {
            let purge = purged_set.contains(entry.info.experiment_id())
                || (!entry.info.is_active() && expired(entry.info.deleted_at()));
            if purge {
                report.run_ids.push(run_id.clone());
                report.artifact_uris.push(entry.info.artifact_uri().to_string());
            }
            !purge
        });
        drop(catalog);

        report.run_ids.sort();
        info!(
            experiments = report.experiment_ids.len(),
            runs = report.run_ids.len(),
            "purged soft-deleted entities"
        );
        report
    }

    /// Write a JSON snapshot of the whole store.
    ///
    /// The snapshot is written to a sibling temp file and renamed into place.
    ///
    /// # Errors
    ///
    /// I/O failures map through the error taxonomy.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let catalog = self.catalog.read();
        let mut runs: Vec<RunEntry> = self.runs.iter().map(|e| e.value().clone()).collect();
        runs.sort_by(|a, b| a.info.run_id().cmp(b.info.run_id()));
        let snapshot = SnapshotRef {
            next_experiment_id: self.next_experiment_id.load(Ordering::SeqCst),
            catalog: &*catalog,
            runs: &runs,
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        drop(catalog);
        write_atomically(path.as_ref(), &bytes)
    }

    /// Load a store from a snapshot written by [`TrackingStore::save_snapshot`].
    ///
    /// # Errors
    ///
    /// `NotFound` if the file is missing; `InvalidArgument` if it is corrupt.
    pub fn load_snapshot<P: AsRef<Path>>(path: P, config: TrackingConfig) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let runs = DashMap::new();
        for entry in snapshot.runs {
            runs.insert(entry.info.run_id().to_string(), entry);
        }
        Ok(Self {
            config,
            catalog: RwLock::new(snapshot.catalog),
            runs,
            next_experiment_id: AtomicU64::new(snapshot.next_experiment_id),
        })
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    next_experiment_id: u64,
    catalog: &'a Catalog,
    runs: &'a [RunEntry],
}

fn experiment_location(config: &TrackingConfig, experiment_id: &str) -> String {
    format!(
        "{}/{experiment_id}",
        config.default_artifact_root.trim_end_matches('/')
    )
}

pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> TrackingStore {
        TrackingStore::new(TrackingConfig::default())
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_store_default() {
        let store = store();
        assert_eq!(store.experiment_count(), 1);
        assert_eq!(store.run_count(), 0);
        let default = store.get_experiment_by_name(DEFAULT_EXPERIMENT_NAME).unwrap();
        assert_eq!(default.experiment_id(), DEFAULT_EXPERIMENT_ID);
        assert_eq!(default.artifact_location(), "memory://mlruns/0");
    }

    #[test]
    fn test_create_experiment_name_collision() {
        let store = store();
        store.create_experiment("exp", None).unwrap();
        let err = store.create_experiment("exp", None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_deleted_name_can_be_reused_but_blocks_restore() {
        let store = store();
        let first = store.create_experiment("exp", None).unwrap();
        store.delete_experiment(&first).unwrap();
        let second = store.create_experiment("exp", None).unwrap();
        assert_ne!(first, second);

        let err = store.restore_experiment(&first).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_run_artifact_uri_under_experiment_location() {
        let store = store();
        let exp = store.create_experiment("exp", Some("file:///tmp/art/")).unwrap();
        let run_id = store.create_run(&exp, ts(0)).unwrap();
        let run = store.get_run(&run_id).unwrap();
        assert_eq!(
            run.info.artifact_uri(),
            format!("file:///tmp/art/{run_id}/artifacts")
        );
    }

    #[test]
    fn test_latest_metric_prefers_step_then_timestamp_then_insertion() {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        store.log_metric(&run, "loss", 0.9, ts(5), 3).unwrap();
        store.log_metric(&run, "loss", 0.5, ts(1), 4).unwrap();
        store.log_metric(&run, "loss", 0.4, ts(1), 4).unwrap();
        let summary = store.get_run(&run).unwrap();
        assert_eq!(summary.latest_metric("loss"), Some(0.4));
    }

    #[test]
    fn test_latest_per_step_view() {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        store.log_metric(&run, "acc", 0.1, ts(2), 0).unwrap();
        store.log_metric(&run, "acc", 0.2, ts(1), 0).unwrap();
        store.log_metric(&run, "acc", 0.3, ts(3), 1).unwrap();

        let all = store.get_metric_history(&run, "acc", MetricHistoryView::All).unwrap();
        assert_eq!(all.iter().map(MetricRecord::value).collect::<Vec<_>>(), vec![0.2, 0.1, 0.3]);

        let latest = store
            .get_metric_history(&run, "acc", MetricHistoryView::LatestPerStep)
            .unwrap();
        assert_eq!(latest.iter().map(MetricRecord::value).collect::<Vec<_>>(), vec![0.1, 0.3]);
    }

    #[test]
    fn test_long_series_detects_replays() {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        let n = 50_000i64;
        for step in 0..n {
            store.log_metric(&run, "loss", 1.0 / (1.0 + step as f64), ts(step), step).unwrap();
        }
        // replays anywhere in the series leave it unchanged
        for step in [0, n / 2, n - 1] {
            store.log_metric(&run, "loss", 1.0 / (1.0 + step as f64), ts(step), step).unwrap();
        }
        store.log_metric(&run, "loss", 0.5, ts(0), 0).unwrap();

        let all = store.get_metric_history(&run, "loss", MetricHistoryView::All).unwrap();
        assert_eq!(all.len(), usize::try_from(n).unwrap() + 1);
        let latest = store.get_run(&run).unwrap().latest_metric("loss").unwrap();
        assert_eq!(latest.to_bits(), (1.0 / n as f64).to_bits());
    }

    #[test]
    fn test_log_to_terminated_run() {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        store.log_metric(&run, "loss", 1.0, ts(1), 0).unwrap();
        store.update_run_status(&run, RunStatus::Finished, None).unwrap();

        // exact replay is still accepted
        store.log_metric(&run, "loss", 1.0, ts(1), 0).unwrap();
        let err = store.log_metric(&run, "loss", 0.5, ts(2), 1).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
        let err = store.log_param(&run, "lr", "0.1").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);

        // tags remain writable
        store.set_tag(&run, "note", "done").unwrap();
    }

    #[test]
    fn test_log_batch_is_all_or_nothing() {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        store.log_param(&run, "lr", "0.01").unwrap();

        let metrics = vec![MetricRecord::builder("ignored", "loss", 0, 1.0).timestamp(ts(1)).build()];
        let params = vec![ParamRecord::new("batch", "32"), ParamRecord::new("lr", "0.02")];
        let tags = vec![TagRecord::new("t", "v")];
        let err = store.log_batch(&run, &metrics, &params, &tags).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);

        let summary = store.get_run(&run).unwrap();
        assert!(summary.data.metrics.is_empty());
        assert!(!summary.data.params.contains_key("batch"));
        assert!(summary.data.tags.is_empty());

        let params = vec![ParamRecord::new("batch", "32")];
        store.log_batch(&run, &metrics, &params, &tags).unwrap();
        let summary = store.get_run(&run).unwrap();
        assert_eq!(summary.data.metrics[0].run_id(), run);
        assert_eq!(summary.data.params.get("batch").map(String::as_str), Some("32"));
    }

    #[test]
    fn test_delete_experiment_cascades_and_restores_runs() {
        let store = store();
        let exp = store.create_experiment("exp", None).unwrap();
        let kept = store.create_run(&exp, ts(0)).unwrap();
        let separately_deleted = store.create_run(&exp, ts(1)).unwrap();
        store.delete_run(&separately_deleted).unwrap();

        store.delete_experiment(&exp).unwrap();
        assert_eq!(store.get_run(&kept).unwrap_err().kind(), crate::ErrorKind::NotFound);
        let err = store.create_run(&exp, ts(2)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);

        store.restore_experiment(&exp).unwrap();
        assert!(store.get_run(&kept).is_ok());
        assert!(store.get_run(&separately_deleted).is_err());
    }

    #[test]
    fn test_purge_respects_restore_window() {
        let config = TrackingConfig::builder()
            .restore_window(std::time::Duration::from_secs(3600))
            .build()
            .unwrap();
        let store = TrackingStore::new(config);
        let exp = store.create_experiment("exp", None).unwrap();
        let run = store.create_run(&exp, ts(0)).unwrap();
        let live = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        store.delete_experiment(&exp).unwrap();

        let report = store.purge_deleted(Utc::now());
        assert!(report.experiment_ids.is_empty());

        let report = store.purge_deleted(Utc::now() + chrono::Duration::hours(2));
        assert_eq!(report.experiment_ids, vec![exp.clone()]);
        assert_eq!(report.run_ids, vec![run.clone()]);
        assert_eq!(report.artifact_uris.len(), 1);
        assert!(store.find_run(&run, ViewType::All).is_err());
        assert!(store.find_experiment(&exp, ViewType::All).is_err());
        assert!(store.get_run(&live).is_ok());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = store();
        let exp = store.create_experiment("exp", None).unwrap();
        let run = store.create_run(&exp, ts(0)).unwrap();
        store.log_metric(&run, "loss", 0.5, ts(1), 0).unwrap();
        store.log_param(&run, "lr", "0.01").unwrap();
        store.save_snapshot(&path).unwrap();

        let loaded = TrackingStore::load_snapshot(&path, TrackingConfig::default()).unwrap();
        assert_eq!(loaded.get_run(&run).unwrap(), store.get_run(&run).unwrap());
        // the replay index is rebuilt on load
        loaded.log_metric(&run, "loss", 0.5, ts(1), 0).unwrap();
        let history = loaded.get_metric_history(&run, "loss", MetricHistoryView::All).unwrap();
        assert_eq!(history.len(), 1);
        assert!(loaded.create_experiment("exp", None).is_err());
        let next = loaded.create_experiment("other", None).unwrap();
        assert_ne!(next, exp);
    }

    #[test]
    fn test_search_experiments_by_tag() {
        let store = store();
        let a = store.create_experiment("a", None).unwrap();
        store.create_experiment("b", None).unwrap();
        store.set_experiment_tag(&a, "team", "vision").unwrap();

        let found = store
            .search_experiments(ViewType::ActiveOnly, "tags.team = 'vision'")
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "a");
        assert!(store.search_experiments(ViewType::All, "metrics.x > 1").is_err());
    }

    #[test]
    fn test_resolve_runs_uri() {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        let resolved = store.resolve_runs_uri(&format!("runs:/{run}/model")).unwrap();
        assert_eq!(resolved, format!("memory://mlruns/0/{run}/artifacts/model"));
        assert_eq!(
            store.resolve_runs_uri(&format!("runs:/{run}")).unwrap(),
            format!("memory://mlruns/0/{run}/artifacts")
        );

        store.delete_run(&run).unwrap();
        assert!(store.resolve_runs_uri(&format!("runs:/{run}/model")).is_ok());
        assert_eq!(
            store.resolve_runs_uri("runs:/missing/x").unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
        assert_eq!(
            store.resolve_runs_uri("file:///tmp/x").unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
    }
}
