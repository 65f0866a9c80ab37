//! Param and Tag records plus key/value validation

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Longest accepted metric/param/tag key.
pub const MAX_KEY_LENGTH: usize = 250;
/// Longest accepted param value.
pub const MAX_PARAM_VALUE_LENGTH: usize = 6000;
/// Longest accepted tag value.
pub const MAX_TAG_VALUE_LENGTH: usize = 8000;

/// A write-once run parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamRecord {
    key: String,
    value: String,
}

impl ParamRecord {
    /// Create a param record.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the param key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the param value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A mutable, last-write-wins tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagRecord {
    key: String,
    value: String,
}

impl TagRecord {
    /// Create a tag record.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the tag key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the tag value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Validate a metric/param/tag key.
///
/// Keys are path-like: non-empty, bounded, no absolute paths and no `..`
/// segments, since some backends materialize them as file names.
///
/// # Errors
///
/// Returns `InvalidArgument` naming the rejected key.
pub fn validate_key(kind: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_argument(kind, "key must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid_argument(
            kind,
            format!("key '{key}' exceeds {MAX_KEY_LENGTH} characters"),
        ));
    }
    if key.starts_with('/') || key.split('/').any(|seg| seg == "..") {
        return Err(Error::invalid_argument(
            kind,
            format!("key '{key}' must be a relative path without '..'"),
        ));
    }
    Ok(())
}

pub(crate) fn validate_value(kind: &str, key: &str, value: &str, limit: usize) -> Result<()> {
    if value.len() > limit {
        return Err(Error::invalid_argument(
            kind,
            format!("value for '{key}' exceeds {limit} characters"),
        ));
    }
    Ok(())
}
