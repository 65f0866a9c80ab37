//! Runs: one training or evaluation attempt inside an experiment

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LifecycleStage;
use crate::{Error, Result};

/// Lifecycle status of a run.
///
/// Statuses only move forward: `Scheduled -> Running -> {Finished, Failed,
/// Killed}`. Terminal statuses cannot be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Queued, not yet executing.
    Scheduled,
    /// Executing and accepting metrics.
    Running,
    /// Ended normally.
    Finished,
    /// Ended with an error, or its client went away.
    Failed,
    /// Stopped on request.
    Killed,
}

impl RunStatus {
    /// Whether the status can never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::Running => 1,
            Self::Finished | Self::Failed | Self::Killed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal progression.
    ///
    /// Re-asserting the current status is always legal (retry-safe).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self as u8 == next as u8 {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(Self::Scheduled),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            "KILLED" => Ok(Self::Killed),
            _ => Err(Error::invalid_argument(
                "status",
                format!("unknown run status '{s}'"),
            )),
        }
    }
}

/// Run metadata: identity, status, timing and artifact root.
///
/// Metrics, params and tags live next to the record in the store and are
/// returned together as [`super::Run`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    run_id: String,
    experiment_id: String,
    run_name: Option<String>,
    status: RunStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    artifact_uri: String,
    lifecycle_stage: LifecycleStage,
    deleted_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Builder with the run starting now in `Running` status.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        artifact_uri: impl Into<String>,
    ) -> RunRecordBuilder {
        RunRecordBuilder::new(run_id, experiment_id, artifact_uri)
    }

    /// Globally unique run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Owning experiment.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Display name, if one was given.
    #[must_use]
    pub fn run_name(&self) -> Option<&str> {
        self.run_name.as_deref()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// When the run started.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Set once the run reaches a terminal status.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Artifact root URI.
    #[must_use]
    pub fn artifact_uri(&self) -> &str {
        &self.artifact_uri
    }

    /// Active or soft-deleted.
    #[must_use]
    pub const fn lifecycle_stage(&self) -> LifecycleStage {
        self.lifecycle_stage
    }

    /// Whether the run is visible to normal reads.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifecycle_stage == LifecycleStage::Active
    }

    /// When the run was soft-deleted.
    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Move to `status`, stamping `end_time` when it becomes terminal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when leaving a terminal status or moving backwards.
    pub fn transition(&mut self, status: RunStatus, end_time: Option<DateTime<Utc>>) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(Error::invalid_state(
                crate::error::Entity::Run,
                &self.run_id,
                self.status,
                format!("cannot move to {status}"),
            ));
        }
        if status == self.status {
            return Ok(());
        }
        self.status = status;
        if status.is_terminal() {
            self.end_time = Some(end_time.unwrap_or_else(Utc::now));
        }
        Ok(())
    }

    pub(crate) fn set_run_name(&mut self, name: impl Into<String>) {
        self.run_name = Some(name.into());
    }

    pub(crate) fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.lifecycle_stage = LifecycleStage::Deleted;
        self.deleted_at = Some(at);
    }

    pub(crate) fn mark_restored(&mut self) {
        self.lifecycle_stage = LifecycleStage::Active;
        self.deleted_at = None;
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct RunRecordBuilder {
    run_id: String,
    experiment_id: String,
    artifact_uri: String,
    run_name: Option<String>,
    status: RunStatus,
    start_time: DateTime<Utc>,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        artifact_uri: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            artifact_uri: artifact_uri.into(),
            run_name: None,
            status: RunStatus::Running,
            start_time: Utc::now(),
        }
    }

    /// Set the run name.
    #[must_use]
    pub fn run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    /// Set the initial status (`Running` by default).
    #[must_use]
    pub const fn status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        RunRecord {
            run_id: self.run_id,
            experiment_id: self.experiment_id,
            run_name: self.run_name,
            status: self.status,
            start_time: self.start_time,
            end_time: None,
            artifact_uri: self.artifact_uri,
            lifecycle_stage: LifecycleStage::Active,
            deleted_at: None,
        }
    }
}
