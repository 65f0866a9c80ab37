//! Error types for trueno-track
//!
//! Every failure carries its taxonomy kind plus the offending entity
//! identifiers, so callers can react programmatically instead of parsing
//! messages.

use std::fmt;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Entity kinds referenced by errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// Experiment
    Experiment,
    /// Run
    Run,
    /// Metric series
    Metric,
    /// Run parameter
    Param,
    /// Tag on any taggable entity
    Tag,
    /// Artifact path
    Artifact,
    /// Registered model
    RegisteredModel,
    /// Model version
    ModelVersion,
    /// Saved model descriptor
    Model,
    /// Search page token
    PageToken,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Experiment => "experiment",
            Self::Run => "run",
            Self::Metric => "metric",
            Self::Param => "param",
            Self::Tag => "tag",
            Self::Artifact => "artifact",
            Self::RegisteredModel => "registered model",
            Self::ModelVersion => "model version",
            Self::Model => "model",
            Self::PageToken => "page token",
        };
        f.write_str(name)
    }
}

/// Error taxonomy kinds, for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced entity absent or soft-deleted
    NotFound,
    /// Unique-constraint violation on create
    AlreadyExists,
    /// Write-once value mismatch
    Conflict,
    /// Operation illegal for the current lifecycle state
    InvalidState,
    /// Malformed input
    InvalidArgument,
    /// Data fails validation against a recorded schema
    SignatureMismatch,
    /// No registered flavor handler
    UnsupportedFlavor,
    /// No registered artifact backend
    UnsupportedScheme,
    /// Transient storage failure, safe to retry with backoff
    BackendUnavailable,
    /// Rejected by a policy layer
    PermissionDenied,
}

/// trueno-track error types
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced entity is absent or soft-deleted
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of entity looked up
        entity: Entity,
        /// Identifier used for the lookup
        id: String,
    },

    /// Unique constraint violated on create
    #[error("{entity} '{id}' already exists")]
    AlreadyExists {
        /// Kind of entity created
        entity: Entity,
        /// Colliding identifier
        id: String,
    },

    /// Write-once value mismatch
    #[error("conflicting write to {entity} '{key}' on '{id}': stored '{existing}', attempted '{attempted}'")]
    Conflict {
        /// Kind of value written
        entity: Entity,
        /// Owning entity identifier
        id: String,
        /// Key of the value
        key: String,
        /// Value already stored
        existing: String,
        /// Value the caller tried to write
        attempted: String,
    },

    /// Operation illegal for the entity's current lifecycle state
    #[error("invalid state for {entity} '{id}': {current} ({reason})")]
    InvalidState {
        /// Kind of entity
        entity: Entity,
        /// Entity identifier
        id: String,
        /// Current state of the entity
        current: String,
        /// What was attempted
        reason: String,
    },

    /// Malformed argument
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Argument name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Data does not conform to the recorded signature
    #[error("signature mismatch on '{field}': expected {expected}, got {actual}")]
    SignatureMismatch {
        /// Offending field (column name or `<tensor>`)
        field: String,
        /// What the signature requires
        expected: String,
        /// What the data provided
        actual: String,
    },

    /// None of the declared flavors has a registered loader
    #[error("no supported flavor among {declared:?}")]
    UnsupportedFlavor {
        /// Flavors declared by the descriptor (or requested by the caller)
        declared: Vec<String>,
    },

    /// No artifact backend registered for the URI scheme
    #[error("unsupported artifact URI scheme '{scheme}' in '{uri}'")]
    UnsupportedScheme {
        /// Scheme that failed to resolve
        scheme: String,
        /// Full URI
        uri: String,
    },

    /// Transient backend failure (safe to retry with backoff)
    #[error("backend unavailable during {operation} on '{target}': {reason}")]
    BackendUnavailable {
        /// Operation being performed
        operation: String,
        /// Path or URI being accessed
        target: String,
        /// Underlying cause
        reason: String,
    },

    /// Rejected by a policy layer above the core
    #[error("permission denied on '{target}': {reason}")]
    PermissionDenied {
        /// Path or entity being accessed
        target: String,
        /// Underlying cause
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for [`Error::AlreadyExists`].
    pub fn already_exists(entity: Entity, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for [`Error::InvalidState`].
    pub fn invalid_state(
        entity: Entity,
        id: impl Into<String>,
        current: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            entity,
            id: id.into(),
            current: current.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::BackendUnavailable`].
    pub fn unavailable(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::BackendUnavailable {
            operation: operation.into(),
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            Self::UnsupportedFlavor { .. } => ErrorKind::UnsupportedFlavor,
            Self::UnsupportedScheme { .. } => ErrorKind::UnsupportedScheme,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
        }
    }

    /// Whether an idempotent operation may be replayed after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::NotFound => Self::not_found(Entity::Artifact, err.to_string()),
            Io::PermissionDenied => Self::PermissionDenied {
                target: String::new(),
                reason: err.to_string(),
            },
            Io::AlreadyExists => Self::already_exists(Entity::Artifact, err.to_string()),
            _ => Self::unavailable("io", "", err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument("json", err.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::invalid_argument("arrow", err.to_string())
    }
}
