//! The quota contention model.
//!
//! A query with solo time `T` and `n` sub-operations costs `T / n` per sub-operation on its own.
//! Under contention with `C` clients and a per-turn quota `Q`, each sub-operation additionally
//! waits behind a uniformly random number `k ∈ {0, .., C - 1}` of other clients' turns:
//!
//! ```text
//! trial = Σ_{i=1..n} (T / n + k_i · Q) = T + Q · Σ k_i
//! ```
//!
//! The estimate of a query is the mean over all trials. Since every queue position is a
//! non-negative integer, the estimate is never below `T`, and it is exactly `T` when `C == 1` or
//! `Q == 0`.
//!
//! Trials run in batches on the blocking thread pool, at most [`SimulationConfig::workers`] at a
//! time. Every trial draws from its own generator, seeded from the master seed, the query's
//! position in the batch and the trial number, so results do not depend on scheduling.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::StreamExt;
use quotabench_types::{Query, QueryError, SimulationResult, TrialSpread};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sketches_ddsketch::DDSketch;
use thiserror::Error;
use tokio::task::JoinError;

/// Number of trials run by a single task on the trial pool.
const TRIALS_PER_TASK: usize = 512;

/// Parameters of a simulation, fixed for all queries of a batch.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// The time slice granted to each client turn.
    pub quota: Duration,
    /// Number of concurrent clients sharing the backend.
    pub num_clients: usize,
    /// Number of Monte-Carlo trials per query.
    pub num_trials: usize,
    /// Maximum number of trial batches running at the same time.
    pub workers: usize,
    /// Master seed all trial generators derive from.
    pub seed: u64,
}

/// Errors raised by the simulator.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The simulation was configured without clients.
    #[error("at least one client is required")]
    NoClients,

    /// The simulation was configured without trials.
    #[error("at least one trial is required")]
    NoTrials,

    /// The trial pool was configured without workers.
    #[error("the trial pool needs at least one worker")]
    NoWorkers,

    /// A query's baseline cannot be simulated.
    #[error("cannot simulate query `{query}`")]
    InvalidQuery {
        /// Name of the query.
        query: String,
        /// What is wrong with the baseline.
        #[source]
        cause: QueryError,
    },

    /// The estimated time is too large to be represented.
    #[error("estimated time of query `{query}` is out of range")]
    OutOfRange {
        /// Name of the query.
        query: String,
    },

    /// A batch of trials panicked or was cancelled.
    #[error("trials for query `{query}` did not complete")]
    Trials {
        /// Name of the query.
        query: String,
        /// The error of the failed task.
        #[source]
        cause: JoinError,
    },
}

/// A query whose simulation failed.
#[derive(Debug)]
pub struct QueryFailure {
    /// Position of the query in the input.
    pub index: usize,
    /// The reason the query could not be simulated.
    pub error: SimulationError,
}

/// The results of simulating a batch of queries.
#[derive(Debug, Default)]
pub struct SimulationReport {
    /// Results for all successfully simulated queries, in input order.
    pub results: Vec<SimulationResult>,
    /// Queries that could not be simulated, in input order.
    pub failures: Vec<QueryFailure>,
}

impl SimulationReport {
    /// Returns the result for the query named `name`.
    pub fn get(&self, name: &str) -> Option<&SimulationResult> {
        self.results.iter().find(|result| result.query_name == name)
    }

    /// Returns all results keyed by query name.
    pub fn into_map(self) -> BTreeMap<String, SimulationResult> {
        self.results
            .into_iter()
            .map(|result| (result.query_name.clone(), result))
            .collect()
    }
}

/// Estimates query completion times under a shared time quota.
#[derive(Debug)]
pub struct QuotaContentionSimulator {
    config: SimulationConfig,
}

impl QuotaContentionSimulator {
    /// Creates a simulator, rejecting configurations that cannot produce any trial.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        if config.num_clients == 0 {
            return Err(SimulationError::NoClients);
        }
        if config.num_trials == 0 {
            return Err(SimulationError::NoTrials);
        }
        if config.workers == 0 {
            return Err(SimulationError::NoWorkers);
        }
        Ok(Self { config })
    }

    /// The configuration of this simulator.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulates every query in `queries`.
    ///
    /// Invalid queries are reported in [`SimulationReport::failures`] and do not affect the
    /// others. All trials of a query complete before its mean is computed.
    pub async fn simulate(&self, queries: &[Query]) -> SimulationReport {
        let contended = self.config.num_clients > 1 && !self.config.quota.is_zero();
        let mut outcomes = Vec::with_capacity(queries.len());
        let mut batches = Vec::new();

        for (index, query) in queries.iter().enumerate() {
            if let Err(cause) = query.validate() {
                outcomes.push(Outcome::Failed(SimulationError::InvalidQuery {
                    query: query.name.clone(),
                    cause,
                }));
            } else if contended {
                outcomes.push(Outcome::Sampled(Accumulator::default()));
                batches.extend(self.batches(index, query));
            } else {
                outcomes.push(Outcome::Exact);
            }
        }

        tracing::debug!(
            queries = queries.len(),
            batches = batches.len(),
            workers = self.config.workers,
            "running trials"
        );

        let mut completed = futures::stream::iter(batches)
            .map(|batch| {
                let query = batch.query;
                let task = tokio::task::spawn_blocking(move || batch.run());
                async move { (query, task.await) }
            })
            .buffered(self.config.workers);

        while let Some((index, result)) = completed.next().await {
            // Skips batches of queries where an earlier batch failed.
            let Outcome::Sampled(accumulator) = &mut outcomes[index] else {
                continue;
            };
            match result {
                Ok(batch) => accumulator.add(batch),
                Err(cause) => {
                    outcomes[index] = Outcome::Failed(SimulationError::Trials {
                        query: queries[index].name.clone(),
                        cause,
                    });
                }
            }
        }

        let mut report = SimulationReport::default();
        for (index, (query, outcome)) in queries.iter().zip(outcomes).enumerate() {
            let estimated = match outcome {
                Outcome::Exact => Ok(exact(query)),
                Outcome::Sampled(accumulator) => self.estimate(query, accumulator),
                Outcome::Failed(error) => Err(error),
            };
            match estimated {
                Ok(result) => report.results.push(result),
                Err(error) => {
                    tracing::warn!(
                        query = query.name,
                        error = &error as &dyn std::error::Error,
                        "query not simulated"
                    );
                    report.failures.push(QueryFailure { index, error });
                }
            }
        }

        report
    }

    fn batches(&self, index: usize, query: &Query) -> impl Iterator<Item = TrialBatch> + use<> {
        let num_trials = self.config.num_trials;
        let template = TrialBatch {
            query: index,
            first_trial: 0,
            trials: 0,
            seed: self.config.seed,
            num_clients: self.config.num_clients,
            sub_operations: query.sub_operations,
            solo_secs: query.solo_time.as_secs_f64(),
            quota_secs: self.config.quota.as_secs_f64(),
        };

        (0..num_trials)
            .step_by(TRIALS_PER_TASK)
            .map(move |first_trial| TrialBatch {
                first_trial,
                trials: TRIALS_PER_TASK.min(num_trials - first_trial),
                ..template
            })
    }

    fn estimate(
        &self,
        query: &Query,
        accumulator: Accumulator,
    ) -> Result<SimulationResult, SimulationError> {
        let out_of_range = || SimulationError::OutOfRange {
            query: query.name.clone(),
        };

        let mean_positions = accumulator.positions as f64 / self.config.num_trials as f64;
        let queueing_secs = self.config.quota.as_secs_f64() * mean_positions;
        let queueing = Duration::try_from_secs_f64(queueing_secs).map_err(|_| out_of_range())?;
        let estimated_time = query
            .solo_time
            .checked_add(queueing)
            .ok_or_else(out_of_range)?;

        let quantile = |q| {
            let secs = accumulator.sketch.quantile(q).ok().flatten().unwrap_or(0.0);
            Duration::try_from_secs_f64(secs.max(0.0)).map_err(|_| out_of_range())
        };

        Ok(SimulationResult {
            query_name: query.name.clone(),
            estimated_time,
            sub_operation_count: query.sub_operations,
            spread: TrialSpread {
                p50: quantile(0.5)?,
                p90: quantile(0.9)?,
                p99: quantile(0.99)?,
            },
        })
    }
}

/// The result for a query that cannot experience any queueing.
fn exact(query: &Query) -> SimulationResult {
    SimulationResult {
        query_name: query.name.clone(),
        estimated_time: query.solo_time,
        sub_operation_count: query.sub_operations,
        spread: TrialSpread {
            p50: query.solo_time,
            p90: query.solo_time,
            p99: query.solo_time,
        },
    }
}

enum Outcome {
    Exact,
    Sampled(Accumulator),
    Failed(SimulationError),
}

#[derive(Default)]
struct Accumulator {
    positions: u128,
    sketch: DDSketch,
}

impl Accumulator {
    fn add(&mut self, batch: BatchOutcome) {
        self.positions += batch.positions;
        self.sketch.merge(&batch.sketch).ok();
    }
}

/// A contiguous range of trials of one query.
#[derive(Clone, Copy, Debug)]
struct TrialBatch {
    query: usize,
    first_trial: usize,
    trials: usize,
    seed: u64,
    num_clients: usize,
    sub_operations: u32,
    solo_secs: f64,
    quota_secs: f64,
}

struct BatchOutcome {
    /// Sum of all queue positions drawn in the batch.
    positions: u128,
    /// Completion times of the individual trials, in seconds.
    sketch: DDSketch,
}

impl TrialBatch {
    fn run(self) -> BatchOutcome {
        let per_sub_operation = self.solo_secs / f64::from(self.sub_operations);
        let mut positions = 0;
        let mut sketch = DDSketch::default();

        for trial in self.first_trial..self.first_trial + self.trials {
            let mut rng = SmallRng::seed_from_u64(trial_seed(self.seed, self.query, trial));
            let mut trial_positions = 0u64;
            let mut trial_time = 0.0;
            for _ in 0..self.sub_operations {
                let position = rng.random_range(0..self.num_clients) as u64;
                trial_positions += position;
                trial_time += per_sub_operation + position as f64 * self.quota_secs;
            }

            positions += u128::from(trial_positions);
            sketch.add(trial_time);
        }

        BatchOutcome { positions, sketch }
    }
}

/// Derives the seed of one trial.
///
/// Distinct `(query, trial)` pairs below 2^32 map to distinct seeds.
fn trial_seed(seed: u64, query: usize, trial: usize) -> u64 {
    splitmix64(seed ^ (query as u64).rotate_left(32) ^ trial as u64)
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(quota_ms: u64, num_clients: usize, num_trials: usize, seed: u64) -> SimulationConfig {
        SimulationConfig {
            quota: Duration::from_millis(quota_ms),
            num_clients,
            num_trials,
            workers: 4,
            seed,
        }
    }

    fn queries() -> Vec<Query> {
        vec![
            Query::new("Q1", Duration::from_secs(2), 4),
            Query::new("Q2", Duration::from_secs_f64(0.3), 7),
            Query::new("Q3", Duration::from_millis(15), 1),
            Query::new("Q4", Duration::ZERO, 120),
        ]
    }

    async fn simulate(config: SimulationConfig, queries: &[Query]) -> SimulationReport {
        quotabench_test::tracing::init();
        QuotaContentionSimulator::new(config)
            .unwrap()
            .simulate(queries)
            .await
    }

    #[tokio::test]
    async fn single_client_keeps_solo_time() {
        for num_trials in [1, 10, 1000] {
            let report = simulate(config(100, 1, num_trials, 7), &queries()).await;
            assert!(report.failures.is_empty());
            for (result, query) in report.results.iter().zip(queries()) {
                assert_eq!(result.estimated_time, query.solo_time);
            }
        }
    }

    #[tokio::test]
    async fn zero_quota_keeps_solo_time() {
        for num_clients in [1, 2, 50] {
            let report = simulate(config(0, num_clients, 100, 7), &queries()).await;
            for (result, query) in report.results.iter().zip(queries()) {
                assert_eq!(result.estimated_time, query.solo_time);
            }
        }
    }

    #[tokio::test]
    async fn contention_never_speeds_up() {
        for seed in 0..10 {
            for num_clients in 2..6 {
                let report = simulate(config(50, num_clients, 50, seed), &queries()).await;
                for (result, query) in report.results.iter().zip(queries()) {
                    assert!(result.estimated_time >= query.solo_time);
                }
            }
        }
    }

    #[tokio::test]
    async fn identical_seeds_are_reproducible() {
        let first = simulate(config(100, 8, 2000, 42), &queries()).await;

        let mut single_worker = config(100, 8, 2000, 42);
        single_worker.workers = 1;
        let second = simulate(single_worker, &queries()).await;

        assert_eq!(first.results, second.results);

        let other_seed = simulate(config(100, 8, 2000, 43), &queries()).await;
        assert_ne!(first.results, other_seed.results);
    }

    #[tokio::test]
    async fn estimate_matches_expected_queueing() {
        let query = Query::new("Q1", Duration::from_secs(2), 4);
        let report = simulate(config(100, 5, 5000, 1234), &[query]).await;

        // 4 sub-operations × (0.5s own cost + 2.0 expected turns × 0.1s)
        let estimated = report.get("Q1").unwrap().estimated_time.as_secs_f64();
        assert!((estimated - 2.8).abs() < 0.03, "estimated {estimated}");

        let spread = report.get("Q1").unwrap().spread;
        assert!(spread.p50 <= spread.p90 && spread.p90 <= spread.p99);
    }

    #[tokio::test]
    async fn more_trials_reduce_variance() {
        let query = [Query::new("Q1", Duration::from_secs(2), 4)];

        let mut variances = Vec::new();
        for num_trials in [10, 10_000] {
            let mut estimates = Vec::new();
            for seed in 0..20 {
                let report = simulate(config(100, 5, num_trials, seed), &query).await;
                estimates.push(report.results[0].estimated_time.as_secs_f64());
            }
            let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
            let variance =
                estimates.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / estimates.len() as f64;
            variances.push(variance);
        }

        assert!(variances[1] < variances[0], "variances {variances:?}");
    }

    #[tokio::test]
    async fn invalid_queries_are_isolated() {
        let queries = [
            Query::new("good", Duration::from_secs(1), 2),
            Query::new("bad", Duration::from_secs(1), 0),
            Query::new("also-good", Duration::from_secs(1), 3),
        ];
        let report = simulate(config(100, 3, 100, 1), &queries).await;

        let names: Vec<_> = report.results.iter().map(|r| r.query_name.as_str()).collect();
        assert_eq!(names, ["good", "also-good"]);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(matches!(
            report.failures[0].error,
            SimulationError::InvalidQuery {
                cause: QueryError::NoSubOperations(0),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn overflowing_estimates_are_isolated() {
        let queries = [
            Query::new("huge", Duration::MAX, 1),
            Query::new("small", Duration::from_secs(1), 2),
        ];
        let report = simulate(config(100, 5, 1000, 3), &queries).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].query_name, "small");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert!(matches!(
            &report.failures[0].error,
            SimulationError::OutOfRange { query } if query == "huge"
        ));
    }

    #[tokio::test]
    async fn results_map_by_query_name() {
        let report = simulate(config(100, 1, 10, 5), &queries()).await;
        let results = report.into_map();

        assert_eq!(
            results.keys().map(String::as_str).collect::<Vec<_>>(),
            ["Q1", "Q2", "Q3", "Q4"]
        );
        for query in queries() {
            let result = &results[&query.name];
            assert_eq!(result.estimated_time, query.solo_time);
            assert_eq!(result.sub_operation_count, query.sub_operations);
        }
    }

    #[test]
    fn rejects_empty_configurations() {
        assert!(matches!(
            QuotaContentionSimulator::new(config(100, 0, 10, 1)),
            Err(SimulationError::NoClients)
        ));
        assert!(matches!(
            QuotaContentionSimulator::new(config(100, 2, 0, 1)),
            Err(SimulationError::NoTrials)
        ));
    }

    #[test]
    fn trial_seeds_are_distinct() {
        let seeds: std::collections::HashSet<_> = (0..4)
            .flat_map(|query| (0..1000).map(move |trial| trial_seed(9, query, trial)))
            .collect();
        assert_eq!(seeds.len(), 4000);
    }
}
