//! Model Registry
//!
//! Named models with monotonically numbered versions and a stage workflow
//! (`None`, `Staging`, `Production`, `Archived`). Versions link back to the
//! run that produced them and own a copy of the payload under the
//! configured registry root.

mod model_version;
mod registered_model;
mod store;

pub use model_version::{ModelStage, ModelVersion, ModelVersionStatus};
pub use registered_model::RegisteredModel;
pub use store::{
    ModelRegistry, RegistrySearch, MODELS_URI_PREFIX, MODEL_VERSION_ATTRIBUTES,
    REGISTERED_MODEL_ATTRIBUTES,
};
