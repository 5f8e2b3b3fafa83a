//! Monte-Carlo estimation of query latency under a shared time quota.
//!
//! A backend that schedules clients in fixed time slices makes every request of a query wait
//! behind the turns of other clients. The [`QuotaContentionSimulator`] estimates how much slower a
//! query becomes under such a policy, given only its uncontended baseline: the solo execution time
//! and the number of independent requests it issues.
//!
//! Baselines are read from and results written to CSV tables with the columns
//! `query,time,httpCalls`, see the [`table`] module.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod simulator;
pub mod table;

pub use simulator::{
    QueryFailure, QuotaContentionSimulator, SimulationConfig, SimulationError, SimulationReport,
};
pub use table::{InvalidRow, QueryTable, TableError};
