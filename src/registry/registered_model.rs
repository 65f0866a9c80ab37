//! Registered Model - named catalog entry owning model versions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named model in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    name: String,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    description: Option<String>,
    tags: BTreeMap<String, String>,
}

impl RegisteredModel {
    pub(crate) fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            last_updated_at: now,
            description,
            tags: BTreeMap::new(),
        }
    }

    /// Unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last time the model or one of its versions changed.
    #[must_use]
    pub const fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Tags.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub(crate) fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    pub(crate) fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.touch();
    }

    pub(crate) fn tags_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.touch();
        &mut self.tags
    }
}
