//! Experiment Tracking
//!
//! Experiments group runs; runs own metric time series, write-once params
//! and mutable tags.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├──< MetricRecord (N) [time-series]
//!                              ├──< ParamRecord (N)  [write-once]
//!                              └──< TagRecord (N)    [last-write-wins]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use trueno_track::config::TrackingConfig;
//! use trueno_track::experiment::{RunStatus, SearchRuns, TrackingStore};
//!
//! let store = TrackingStore::new(TrackingConfig::default());
//! let exp = store.create_experiment("churn", None)?;
//! let run = store.create_run(&exp, Utc::now())?;
//!
//! store.log_param(&run, "max_depth", "6")?;
//! store.log_metric(&run, "auc", 0.91, Utc::now(), 0)?;
//! store.update_run_status(&run, RunStatus::Finished, None)?;
//!
//! let page = store.search_runs(&SearchRuns::new([exp]).filter("metrics.auc > 0.9"))?;
//! assert_eq!(page.items.len(), 1);
//! # Ok::<(), trueno_track::Error>(())
//! ```

mod experiment_record;
pub mod filter;
mod metric_record;
mod param_record;
mod run_record;
pub mod search;
mod store;

pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder, LifecycleStage};
pub use filter::{FilterKey, FilterNamespace, SearchFilter};
pub use metric_record::{MetricRecord, MetricRecordBuilder};
pub use param_record::{
    validate_key, ParamRecord, TagRecord, MAX_KEY_LENGTH, MAX_PARAM_VALUE_LENGTH,
    MAX_TAG_VALUE_LENGTH,
};
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};
pub use search::{OrderBy, Page, ViewType};
pub use store::{
    CreateRun, MetricHistoryView, PurgeReport, Run, RunData, SearchRuns, TrackingStore,
    DEFAULT_EXPERIMENT_ID, DEFAULT_EXPERIMENT_NAME, EXPERIMENT_ATTRIBUTES, RUNS_URI_PREFIX,
    RUN_ATTRIBUTES,
};

pub(crate) use param_record::validate_value;
pub(crate) use store::write_atomically;
