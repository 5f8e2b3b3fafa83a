//! Shared data model for the quotabench load generator and quota contention simulator.
//!
//! The types in this crate are plain values: [`Workload`]s enumerated from disk, [`Query`]
//! baselines read from measurement tables, and the [`SimulationResult`] rows produced from them.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod kind;
pub mod query;
pub mod result;
pub mod workload;

pub use kind::{BackendKind, Role, RunMode};
pub use query::{Query, QueryError, QueryRecord};
pub use result::{SimulationResult, TrialSpread};
pub use workload::{QueryFile, Workload, WorkloadError, WorkloadSet};
