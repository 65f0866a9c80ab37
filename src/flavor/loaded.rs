//! Loaded models with signature enforcement

use tracing::debug;

use super::{ModelDescriptor, Predictor};
use crate::signature::{enforce, MismatchPolicy, ModelData, ModelSignature, SchemaEnforcement};
use crate::Result;

/// A model ready to predict.
///
/// Input (and output, when recorded) is checked against the descriptor's
/// signature on every call.
pub struct LoadedModel {
    descriptor: ModelDescriptor,
    flavor: String,
    predictor: Box<dyn Predictor>,
    enforcement: SchemaEnforcement,
    policy: MismatchPolicy,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_uuid", &self.descriptor.model_uuid())
            .field("flavor", &self.flavor)
            .field("enforcement", &self.enforcement)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    pub(crate) fn new(
        descriptor: ModelDescriptor,
        flavor: String,
        predictor: Box<dyn Predictor>,
        enforcement: SchemaEnforcement,
        policy: MismatchPolicy,
    ) -> Self {
        Self {
            descriptor,
            flavor,
            predictor,
            enforcement,
            policy,
        }
    }

    /// Descriptor the model was loaded from.
    #[must_use]
    pub const fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    /// Recorded signature, if any.
    #[must_use]
    pub const fn signature(&self) -> Option<&ModelSignature> {
        self.descriptor.signature()
    }

    /// Name of the flavor that loaded the model.
    #[must_use]
    pub fn flavor(&self) -> &str {
        &self.flavor
    }

    /// Override the validation settings.
    #[must_use]
    pub fn with_policy(mut self, enforcement: SchemaEnforcement, policy: MismatchPolicy) -> Self {
        self.enforcement = enforcement;
        self.policy = policy;
        self
    }

    /// Validate `input`, run the model and validate its output.
    ///
    /// # Errors
    ///
    /// `SignatureMismatch` under [`MismatchPolicy::Reject`], or the
    /// predictor's own errors.
    pub fn predict(&self, input: &ModelData) -> Result<ModelData> {
        if let Some(signature) = self.signature() {
            enforce(&signature.inputs, input, self.enforcement, self.policy, "input")?;
        }
        let output = self.predictor.predict(input)?;
        if let Some(outputs) = self.signature().and_then(|s| s.outputs.as_ref()) {
            enforce(outputs, &output, self.enforcement, self.policy, "output")?;
        }
        debug!(flavor = %self.flavor, rows = output.num_rows(), "predicted");
        Ok(output)
    }
}
