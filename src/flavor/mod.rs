//! Flavor Registry
//!
//! A flavor is a named packaging format: it knows how to turn an in-memory
//! model into files plus a config fragment (`save`) and how to turn those
//! files back into something that predicts (`load`). A saved model can
//! declare several flavors; loaders try them in declaration order and use
//! the first one registered locally.
//!
//! Flavors register once at startup. Registering a second flavor under an
//! existing name fails instead of replacing it.
//!
//! # Example
//!
//! ```rust
//! use trueno_track::artifact::ArtifactRepositoryRegistry;
//! use trueno_track::config::TrackingConfig;
//! use trueno_track::flavor::{FlavorRegistry, LinearModel, SaveOptions};
//!
//! # async fn example() -> trueno_track::Result<()> {
//! let config = TrackingConfig::default();
//! let artifacts = ArtifactRepositoryRegistry::with_defaults(&config);
//! let root = artifacts.resolve("memory://models/churn")?;
//!
//! let flavors = FlavorRegistry::with_defaults();
//! let model = LinearModel::new(vec!["x".into()], vec![2.0], 1.0);
//! flavors.save_model(&root, "model", &model, &["linear"], SaveOptions::default()).await?;
//!
//! let loaded = flavors.load_model(&root, "model", &config).await?;
//! assert_eq!(loaded.flavor(), "linear");
//! # Ok(())
//! # }
//! ```

mod descriptor;
mod linear;
mod loaded;
mod registry;

pub use descriptor::{FlavorEntry, ModelDescriptor, MODEL_DESCRIPTOR_FILE};
pub use linear::{LinearFlavor, LinearModel};
pub use loaded::LoadedModel;
pub use registry::{FlavorRegistry, SaveOptions};

use std::any::Any;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::artifact::normalize_path;
use crate::error::Entity;
use crate::signature::ModelData;
use crate::{Error, Result};

/// Something that maps structured input to structured output.
pub trait Predictor: Send + Sync {
    /// Run the model.
    ///
    /// # Errors
    ///
    /// Flavor-specific failures, typically `InvalidArgument` for input the
    /// model cannot interpret.
    fn predict(&self, input: &ModelData) -> Result<ModelData>;
}

/// A named save/load capability pair.
pub trait Flavor: Send + Sync {
    /// Registry key, also written into the descriptor.
    fn name(&self) -> &str;

    /// Write `model` into `ctx` and return this flavor's config fragment.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `model` is not a type this flavor handles.
    fn save(&self, model: &dyn Any, ctx: &mut SaveContext) -> Result<Value>;

    /// Rebuild a predictor from the config fragment and the model's files.
    ///
    /// Must only read from `files`.
    ///
    /// # Errors
    ///
    /// `NotFound` for missing files, `InvalidArgument` for corrupt ones.
    fn load(&self, config: &Value, files: &ModelFiles) -> Result<Box<dyn Predictor>>;
}

/// Files a flavor writes while saving, keyed by path relative to the model
/// directory.
#[derive(Debug, Default)]
pub struct SaveContext {
    files: BTreeMap<String, Vec<u8>>,
}

impl SaveContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for paths escaping the model directory, the
    /// reserved descriptor name, or a path already written.
    pub fn write(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let path = normalize_path(path)?;
        if path.is_empty() || path == MODEL_DESCRIPTOR_FILE {
            return Err(Error::invalid_argument(
                "path",
                format!("'{path}' is reserved in a model directory"),
            ));
        }
        if self.files.contains_key(&path) {
            return Err(Error::already_exists(Entity::Artifact, path));
        }
        self.files.insert(path, bytes);
        Ok(())
    }

    /// Add a JSON file.
    ///
    /// # Errors
    ///
    /// As [`SaveContext::write`], plus serialization failures.
    pub fn write_json<T: Serialize>(&mut self, path: &str, value: &T) -> Result<()> {
        self.write(path, serde_json::to_vec_pretty(value)?)
    }

    /// Files written so far.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub(crate) fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }
}

/// Read-only view of a saved model's files.
#[derive(Debug, Default, Clone)]
pub struct ModelFiles {
    files: BTreeMap<String, Vec<u8>>,
}

impl ModelFiles {
    /// Wrap downloaded files.
    #[must_use]
    pub fn new(files: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }

    /// Bytes of a file.
    ///
    /// # Errors
    ///
    /// `NotFound` if the model has no such file.
    pub fn get(&self, path: &str) -> Result<&[u8]> {
        let path = normalize_path(path)?;
        self.files
            .get(&path)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::not_found(Entity::Artifact, path))
    }

    /// Parse a JSON file.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing, `InvalidArgument` if malformed.
    pub fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(serde_json::from_slice(self.get(path)?)?)
    }

    /// Paths of every file, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}
