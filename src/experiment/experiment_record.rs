//! Experiments group runs and own the artifact prefix their runs write under

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Soft-delete lifecycle shared by experiments and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    /// Visible to normal reads.
    #[default]
    Active,
    /// Hidden from normal reads, kept for audit until purged.
    Deleted,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Deleted => f.write_str("deleted"),
        }
    }
}

/// A named experiment.
///
/// Names are unique among live experiments only. A soft-deleted experiment
/// keeps its name until it is purged or renamed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: String,
    name: String,
    artifact_location: String,
    lifecycle_stage: LifecycleStage,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    tags: BTreeMap<String, String>,
}

impl ExperimentRecord {
    /// Active experiment created now.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        artifact_location: impl Into<String>,
    ) -> Self {
        Self::builder(experiment_id, name, artifact_location).build()
    }

    /// Builder for records restored from snapshots or carrying initial tags.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        artifact_location: impl Into<String>,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_id, name, artifact_location)
    }

    /// Experiment id.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Current name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URI prefix under which run artifact roots are created.
    #[must_use]
    pub fn artifact_location(&self) -> &str {
        &self.artifact_location
    }

    /// Active or soft-deleted.
    #[must_use]
    pub const fn lifecycle_stage(&self) -> LifecycleStage {
        self.lifecycle_stage
    }

    /// Whether the experiment is visible to normal reads.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifecycle_stage == LifecycleStage::Active
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last rename, tag change or lifecycle change.
    #[must_use]
    pub const fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// When the experiment was soft-deleted.
    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Tags by key.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub(crate) fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
        self.touch();
    }

    pub(crate) fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.lifecycle_stage = LifecycleStage::Deleted;
        self.deleted_at = Some(at);
        self.last_updated_at = at;
    }

    pub(crate) fn mark_restored(&mut self) {
        self.lifecycle_stage = LifecycleStage::Active;
        self.deleted_at = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    experiment_id: String,
    name: String,
    artifact_location: String,
    created_at: DateTime<Utc>,
    tags: BTreeMap<String, String>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        artifact_location: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            artifact_location: artifact_location.into(),
            created_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    /// Add an initial tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Override the creation time.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: self.experiment_id,
            name: self.name,
            artifact_location: self.artifact_location,
            lifecycle_stage: LifecycleStage::Active,
            created_at: self.created_at,
            last_updated_at: self.created_at,
            deleted_at: None,
            tags: self.tags,
        }
    }
}
