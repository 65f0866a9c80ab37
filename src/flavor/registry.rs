//! Flavor registration plus model save/load through artifact roots

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    Flavor, LinearFlavor, LoadedModel, ModelDescriptor, ModelFiles, SaveContext,
    MODEL_DESCRIPTOR_FILE,
};
use crate::artifact::{join_path, normalize_path, ArtifactRoot};
use crate::config::TrackingConfig;
use crate::error::Entity;
use crate::signature::{infer_signature, MismatchPolicy, ModelData, ModelSignature, SchemaEnforcement};
use crate::{Error, ErrorKind, Result};

/// Optional metadata recorded when saving a model.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    signature: Option<ModelSignature>,
    input_example: Option<ModelData>,
    run_id: Option<String>,
    dependencies: Vec<String>,
    metadata: BTreeMap<String, Value>,
}

impl SaveOptions {
    /// Record an explicit signature.
    #[must_use]
    pub fn signature(mut self, signature: ModelSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Infer the input signature from example data when no explicit
    /// signature is given.
    #[must_use]
    pub fn input_example(mut self, example: impl Into<ModelData>) -> Self {
        self.input_example = Some(example.into());
        self
    }

    /// Record the source run.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Declare a runtime dependency.
    #[must_use]
    pub fn dependency(mut self, requirement: impl Into<String>) -> Self {
        self.dependencies.push(requirement.into());
        self
    }

    /// Add a free-form top-level descriptor field.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Flavors known to this process, keyed by name.
#[derive(Default)]
pub struct FlavorRegistry {
    flavors: DashMap<String, Arc<dyn Flavor>>,
}

impl std::fmt::Debug for FlavorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlavorRegistry")
            .field("flavors", &self.names())
            .finish()
    }
}

impl FlavorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the bundled `linear` flavor.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry
            .flavors
            .insert(LinearFlavor::NAME.to_string(), Arc::new(LinearFlavor));
        registry
    }

    /// Register a flavor.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a flavor with the same name is registered.
    pub fn register(&self, flavor: Arc<dyn Flavor>) -> Result<()> {
        let name = flavor.name().to_string();
        match self.flavors.entry(name.clone()) {
            Entry::Occupied(_) => Err(Error::already_exists(
                Entity::Model,
                format!("flavor {name}"),
            )),
            Entry::Vacant(slot) => {
                slot.insert(flavor);
                debug!(flavor = %name, "registered flavor");
                Ok(())
            }
        }
    }

    /// Look up a flavor.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Flavor>> {
        self.flavors.get(name).map(|f| Arc::clone(f.value()))
    }

    /// Registered flavor names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flavors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run every requested flavor's `save` and build the descriptor.
    ///
    /// Returns the descriptor and the model files (relative to the model
    /// directory), without writing anything.
    ///
    /// # Errors
    ///
    /// `UnsupportedFlavor` if a requested flavor is not registered;
    /// otherwise the flavors' own errors.
    pub fn package(
        &self,
        model: &dyn Any,
        flavors: &[&str],
        options: SaveOptions,
    ) -> Result<(ModelDescriptor, BTreeMap<String, Vec<u8>>)> {
        if flavors.is_empty() {
            return Err(Error::invalid_argument("flavors", "at least one flavor is required"));
        }
        let resolved = flavors
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| Error::UnsupportedFlavor {
                    declared: vec![(*name).to_string()],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut descriptor = ModelDescriptor::new();
        let mut ctx = SaveContext::new();
        for flavor in resolved {
            let config = flavor.save(model, &mut ctx)?;
            descriptor.push_flavor(flavor.name(), config);
        }

        let signature = match (options.signature, &options.input_example) {
            (Some(signature), _) => Some(signature),
            (None, Some(example)) => Some(infer_signature(example, None)?),
            (None, None) => None,
        };
        descriptor.set_signature(signature);
        descriptor.set_dependencies(options.dependencies);
        descriptor.set_run(options.run_id, None);
        for (key, value) in options.metadata {
            descriptor.insert_extra(key, value);
        }
        Ok((descriptor, ctx.into_files()))
    }

    /// Save `model` under `path` in `root`.
    ///
    /// Model files are written first and the descriptor last, so a reader
    /// that finds a descriptor finds every file it references.
    ///
    /// # Errors
    ///
    /// As [`FlavorRegistry::package`], plus artifact errors.
    pub async fn save_model(
        &self,
        root: &ArtifactRoot,
        path: &str,
        model: &(dyn Any + Send + Sync),
        flavors: &[&str],
        options: SaveOptions,
    ) -> Result<ModelDescriptor> {
        let dir = normalize_path(path)?;
        let (mut descriptor, files) = self.package(model, flavors, options)?;
        let run_id = descriptor.run_id().map(str::to_string);
        if run_id.is_some() {
            descriptor.set_run(run_id, Some(dir.clone()));
        }

        let files: Vec<(String, Vec<u8>)> = files.into_iter().collect();
        root.upload_all(&dir, &files).await?;
        root.put(&join_path(&dir, MODEL_DESCRIPTOR_FILE), descriptor.to_json()?)
            .await?;
        info!(
            uri = %root.uri_of(&dir),
            flavors = ?descriptor.flavor_names(),
            "saved model"
        );
        Ok(descriptor)
    }

    /// Read the descriptor of the model saved under `path`.
    ///
    /// # Errors
    ///
    /// `NotFound` (entity `model`) if there is no descriptor.
    pub async fn read_descriptor(root: &ArtifactRoot, path: &str) -> Result<ModelDescriptor> {
        let dir = normalize_path(path)?;
        let bytes = root
            .get(&join_path(&dir, MODEL_DESCRIPTOR_FILE))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => Error::not_found(Entity::Model, root.uri_of(&dir)),
                _ => err,
            })?;
        ModelDescriptor::from_json(&bytes)
    }

    /// Load the model saved under `path` using the configured enforcement
    /// and mismatch policy.
    ///
    /// # Errors
    ///
    /// As [`FlavorRegistry::load_model_with`].
    pub async fn load_model(
        &self,
        root: &ArtifactRoot,
        path: &str,
        config: &TrackingConfig,
    ) -> Result<LoadedModel> {
        self.load_model_with(root, path, config.schema_enforcement, config.mismatch_policy)
            .await
    }

    /// Load the model saved under `path`.
    ///
    /// Declared flavors are tried in order; the first one registered here
    /// loads the model.
    ///
    /// # Errors
    ///
    /// `NotFound` without a descriptor, `UnsupportedFlavor` when no declared
    /// flavor is registered, or the flavor's own load errors.
    pub async fn load_model_with(
        &self,
        root: &ArtifactRoot,
        path: &str,
        enforcement: SchemaEnforcement,
        policy: MismatchPolicy,
    ) -> Result<LoadedModel> {
        let dir = normalize_path(path)?;
        let descriptor = Self::read_descriptor(root, &dir).await?;
        let (flavor, config) = descriptor
            .flavors()
            .iter()
            .find_map(|entry| self.get(&entry.name).map(|f| (f, entry.config.clone())))
            .ok_or_else(|| Error::UnsupportedFlavor {
                declared: descriptor.flavor_names(),
            })?;

        let files = ModelFiles::new(root.download_all(&dir).await?);
        let predictor = flavor.load(&config, &files)?;
        info!(uri = %root.uri_of(&dir), flavor = flavor.name(), "loaded model");
        Ok(LoadedModel::new(
            descriptor,
            flavor.name().to_string(),
            predictor,
            enforcement,
            policy,
        ))
    }
}
