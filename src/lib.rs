//! # Trueno-Track: ML Experiment Tracking & Model Registry
//!
//! **Version**: 0.1.0
//!
//! Trueno-Track records what training runs did (params, metric series,
//! tags), stores what they produced behind pluggable artifact backends, and
//! packages models so any registered flavor can load them back behind one
//! `predict` contract.
//!
//! ## Components
//!
//! - [`experiment`]: experiments, runs, metrics, params and tags with
//!   filtered, keyset-paginated search
//! - [`artifact`]: byte storage selected by URI scheme (`file`, `memory`,
//!   plus anything registered at startup)
//! - [`signature`]: schema inference and validation over Arrow data
//! - [`flavor`]: model packaging formats and the `MLmodel.json` descriptor
//! - [`registry`]: versioned model catalog with a stage workflow
//! - [`service`]: facade wiring everything together
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_track::experiment::{SearchRuns, DEFAULT_EXPERIMENT_ID};
//! use trueno_track::service::TrackingService;
//!
//! let service = TrackingService::builder().build()?;
//! let run = service.start_run(DEFAULT_EXPERIMENT_ID)?;
//! run.log_param("lr", "0.01")?;
//! for step in 0..3 {
//!     run.log_metric("loss", 1.0 / f64::from(step + 1), i64::from(step))?;
//! }
//! run.finish()?;
//!
//! let page = service
//!     .tracking()
//!     .search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID]).filter("metrics.loss < 0.5"))?;
//! assert_eq!(page.items.len(), 1);
//! # Ok::<(), trueno_track::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod experiment;
pub mod flavor;
pub mod registry;
pub mod service;
pub mod signature;
pub mod telemetry;

pub use error::{Error, ErrorKind, Result};
