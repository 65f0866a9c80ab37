//! Model Version - numbered snapshot of a registered model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Workflow stage of a model version.
///
/// `None -> Staging -> Production` is the promotion path and versions may
/// move freely among those three. `Archived` is reachable from any of them;
/// leaving `Archived` re-enters `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum ModelStage {
    /// Not in any workflow stage.
    #[default]
    None,
    /// Candidate under validation.
    Staging,
    /// Serving.
    Production,
    /// Retired.
    Archived,
}

impl ModelStage {
    /// Every stage, in workflow order.
    pub const ALL: [Self; 4] = [Self::None, Self::Staging, Self::Production, Self::Archived];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Staging => "Staging",
            Self::Production => "Production",
            Self::Archived => "Archived",
        }
    }

    /// Whether a transition into this stage can archive its other occupants.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }

    /// Whether moving from `self` to `next` is legal.
    ///
    /// Staying put is always legal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next || self != Self::Archived || next == Self::None
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStage {
    type Err = Error;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::invalid_argument(
                    "stage",
                    format!("'{s}' is not one of None, Staging, Production, Archived"),
                )
            })
    }
}

/// Registration status of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelVersionStatus {
    /// Number allocated, payload copy in progress.
    PendingRegistration,
    /// Payload copied and digested.
    Ready,
    /// Payload copy failed; the number stays consumed.
    FailedRegistration,
}

impl ModelVersionStatus {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingRegistration => "PENDING_REGISTRATION",
            Self::Ready => "READY",
            Self::FailedRegistration => "FAILED_REGISTRATION",
        }
    }
}

impl fmt::Display for ModelVersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numbered version of a registered model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    name: String,
    version: u64,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    current_stage: ModelStage,
    description: Option<String>,
    source: String,
    run_id: Option<String>,
    status: ModelVersionStatus,
    status_message: Option<String>,
    storage_location: String,
    content_digest: Option<String>,
    tags: BTreeMap<String, String>,
}

impl ModelVersion {
    pub(crate) fn pending(
        name: impl Into<String>,
        version: u64,
        source: impl Into<String>,
        run_id: Option<String>,
        storage_location: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            version,
            created_at: now,
            last_updated_at: now,
            current_stage: ModelStage::None,
            description: None,
            source: source.into(),
            run_id,
            status: ModelVersionStatus::PendingRegistration,
            status_message: None,
            storage_location: storage_location.into(),
            content_digest: None,
            tags: BTreeMap::new(),
        }
    }

    /// Registered model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version number, starting at 1.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last modification time.
    #[must_use]
    pub const fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Current workflow stage.
    #[must_use]
    pub const fn current_stage(&self) -> ModelStage {
        self.current_stage
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Source artifact URI as given at registration.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run that produced the model, if recorded.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Registration status.
    #[must_use]
    pub const fn status(&self) -> ModelVersionStatus {
        self.status
    }

    /// Failure detail for `FailedRegistration`.
    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// URI the payload was copied to.
    #[must_use]
    pub fn storage_location(&self) -> &str {
        &self.storage_location
    }

    /// SHA-256 over the copied files, once ready.
    #[must_use]
    pub fn content_digest(&self) -> Option<&str> {
        self.content_digest.as_deref()
    }

    /// Tags.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Whether stage transitions are allowed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ModelVersionStatus::Ready
    }

    pub(crate) fn id(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    pub(crate) fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    pub(crate) fn set_stage(&mut self, stage: ModelStage) {
        self.current_stage = stage;
        self.touch();
    }

    pub(crate) fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.touch();
    }

    pub(crate) fn tags_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.touch();
        &mut self.tags
    }

    pub(crate) fn mark_ready(&mut self, digest: String) {
        self.status = ModelVersionStatus::Ready;
        self.content_digest = Some(digest);
        self.status_message = None;
        self.touch();
    }

    pub(crate) fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = ModelVersionStatus::FailedRegistration;
        self.status_message = Some(message.into());
        self.touch();
    }
}
