//! Result rows produced by the quota contention simulator.

use std::time::Duration;

use crate::query::QueryRecord;

/// The averaged outcome of all trials for one query, concurrency level and quota.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationResult {
    /// Name of the simulated query.
    pub query_name: String,
    /// Mean completion time across all trials.
    ///
    /// Never lower than the query's solo time when contention is possible.
    pub estimated_time: Duration,
    /// Number of sub-operations of the query, copied from its baseline.
    pub sub_operation_count: u32,
    /// Spread of the individual trial times.
    pub spread: TrialSpread,
}

/// Quantiles of the trial times behind a [`SimulationResult`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrialSpread {
    /// Median trial time.
    pub p50: Duration,
    /// 90th percentile trial time.
    pub p90: Duration,
    /// 99th percentile trial time.
    pub p99: Duration,
}

impl SimulationResult {
    /// Converts this result into a row of the same shape as the input measurement table.
    pub fn to_record(&self) -> QueryRecord {
        QueryRecord {
            query: self.query_name.clone(),
            time: self.estimated_time.as_secs_f64(),
            http_calls: i64::from(self.sub_operation_count),
        }
    }
}
