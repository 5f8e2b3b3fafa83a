//! Synchronized start and stop of all clients in a run.
//!
//! A run proceeds in two phases. First, every worker is launched and given a settle delay to
//! reach its wait point. Then the start gate is released, letting all workers begin at the same
//! instant. If the run has a distinguished measurement or reference worker, its exit releases the
//! stop gate, which tells all load workers to shut down their background replay.
//!
//! ```text
//!  launch all ──settle──▶ start ──▶ distinguished exits ──▶ stop ──▶ join all
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::future::join_all;
use quotabench_types::{BackendKind, RunMode, WorkloadSet};
use thiserror::Error;

use crate::barrier::{BarrierSet, GateError};
use crate::launcher::{LaunchedWorker, WorkerLauncher};
use crate::worker::{WorkerSpec, WorkerStatus};

/// Configuration of a single run, fixed before any worker starts.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Number of clients to launch.
    pub num_clients: usize,
    /// The backend all clients drive.
    pub backend: BackendKind,
    /// How roles are distributed among clients.
    pub mode: RunMode,
    /// Directory below which every client gets its own output directory.
    pub output_root: PathBuf,
    /// Time given to workers to reach the start gate before it is released.
    pub settle_delay: Duration,
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The run was configured without clients.
    #[error("at least one client is required")]
    NoClients,

    /// There are no workloads to assign.
    #[error("no workloads to assign to clients")]
    NoWorkloads,

    /// A client's output directory could not be created.
    #[error("cannot create output directory `{}`", path.display())]
    OutputDir {
        /// The directory that failed to create.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: io::Error,
    },

    /// A worker could not be started, so the barrier is missing a participant.
    #[error("failed to spawn worker {index}")]
    Spawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// The underlying I/O error.
        #[source]
        cause: io::Error,
    },

    /// Workers gave up waiting for the start gate.
    #[error("workers {indices:?} did not observe the start gate")]
    Deadlock {
        /// Indices of the workers that timed out.
        indices: Vec<usize>,
    },

    /// A gate was released out of order.
    #[error(transparent)]
    Gate(#[from] GateError),
}

/// The overall result of a run that was not aborted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// Every worker completed its lifecycle.
    Success,
    /// Some workers failed. The remaining workers were unaffected.
    PartialFailure {
        /// Indices of the failed workers, in ascending order.
        failed_indices: Vec<usize>,
    },
}

/// How one worker of a run ended.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    /// The worker's assignment.
    pub spec: WorkerSpec,
    /// How the worker ended.
    pub status: WorkerStatus,
}

/// The result of [`RendezvousCoordinator::run`].
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The overall outcome.
    pub outcome: RunOutcome,
    /// One entry per worker, ordered by index.
    pub workers: Vec<WorkerReport>,
    /// When the start gate was released.
    pub start_released_at: Instant,
    /// When the stop gate was released, if the run used it.
    pub stop_released_at: Option<Instant>,
}

/// Returns the output directory of client `index` in a run of `num_clients` clients.
pub fn output_dir(root: &Path, num_clients: usize, workload: &str, index: usize) -> PathBuf {
    root.join(format!("{num_clients}clients"))
        .join(format!("mix_{workload}"))
        .join(format!("client_{index}"))
}

/// Launches the clients of a run and drives both gates.
#[derive(Debug)]
pub struct RendezvousCoordinator<L> {
    config: CoordinatorConfig,
    launcher: L,
}

impl<L: WorkerLauncher> RendezvousCoordinator<L> {
    /// Creates a coordinator that starts workers through `launcher`.
    pub fn new(config: CoordinatorConfig, launcher: L) -> Self {
        Self { config, launcher }
    }

    /// Assigns a workload, role and output directory to every client.
    ///
    /// Client `i` receives workload `i mod len`, in name order.
    pub fn plan(&self, workloads: &WorkloadSet) -> Result<Vec<WorkerSpec>, RunError> {
        let num_clients = self.config.num_clients;
        if num_clients == 0 {
            return Err(RunError::NoClients);
        }

        (0..num_clients)
            .map(|index| {
                let workload = workloads.assign(index).ok_or(RunError::NoWorkloads)?;
                Ok(WorkerSpec {
                    index,
                    role: self.config.mode.role_of(index, num_clients),
                    backend: self.config.backend,
                    workload: workload.name.clone(),
                    workload_path: workload.path.clone(),
                    output: output_dir(
                        &self.config.output_root,
                        num_clients,
                        &workload.name,
                        index,
                    ),
                })
            })
            .collect()
    }

    /// Runs all clients to completion.
    ///
    /// Fails before launching anything on configuration errors, and fails the whole run if any
    /// worker cannot be spawned. Failures of individual workers are collected into
    /// [`RunOutcome::PartialFailure`]. Every launched worker is joined before this returns.
    pub async fn run(&self, workloads: &WorkloadSet) -> Result<RunReport, RunError> {
        let specs = self.plan(workloads)?;
        for spec in &specs {
            tokio::fs::create_dir_all(&spec.output)
                .await
                .map_err(|cause| RunError::OutputDir {
                    path: spec.output.clone(),
                    cause,
                })?;
        }

        let barrier = BarrierSet::new();
        let mut workers = Vec::with_capacity(specs.len());
        for spec in &specs {
            match self.launcher.launch(spec, barrier.waiters()) {
                Ok(worker) => workers.push(worker),
                Err(cause) => {
                    tracing::error!(
                        index = spec.index,
                        error = &cause as &dyn std::error::Error,
                        "failed to spawn worker, aborting run"
                    );
                    // Closing the gates releases everyone already waiting on them.
                    drop(barrier);
                    join_all(workers.iter_mut().map(|worker| worker.wait())).await;
                    return Err(RunError::Spawn {
                        index: spec.index,
                        cause,
                    });
                }
            }
        }

        tracing::info!(
            clients = specs.len(),
            backend = %self.config.backend,
            mode = ?self.config.mode,
            settle_delay = ?self.config.settle_delay,
            "all workers launched"
        );
        tokio::time::sleep(self.config.settle_delay).await;
        let start_released_at = barrier.start.release()?;
        tracing::info!("start gate released");

        let mut stop_released_at = None;
        let statuses = if self.config.mode.has_distinguished_worker() {
            let (load, distinguished) = workers.split_at_mut(specs.len() - 1);
            let distinguished_status = distinguished[0].wait().await;
            tracing::info!(
                index = specs.len() - 1,
                status = %distinguished_status,
                "distinguished worker finished"
            );

            stop_released_at = Some(barrier.stop.release()?);
            tracing::info!("stop gate released");

            let mut statuses = join_all(load.iter_mut().map(|worker| worker.wait())).await;
            statuses.push(distinguished_status);
            statuses
        } else {
            join_all(workers.iter_mut().map(|worker| worker.wait())).await
        };

        let workers: Vec<_> = specs
            .into_iter()
            .zip(statuses)
            .map(|(spec, status)| WorkerReport { spec, status })
            .collect();

        let deadlocked: Vec<_> = workers
            .iter()
            .filter(|worker| worker.status == WorkerStatus::Deadlock)
            .map(|worker| worker.spec.index)
            .collect();
        if !deadlocked.is_empty() {
            return Err(RunError::Deadlock {
                indices: deadlocked,
            });
        }

        let failed_indices: Vec<_> = workers
            .iter()
            .filter(|worker| !worker.status.is_success())
            .inspect(|worker| {
                tracing::warn!(
                    index = worker.spec.index,
                    role = %worker.spec.role,
                    status = %worker.status,
                    "worker did not complete"
                )
            })
            .map(|worker| worker.spec.index)
            .collect();

        let outcome = if failed_indices.is_empty() {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure { failed_indices }
        };

        Ok(RunReport {
            outcome,
            workers,
            start_released_at,
            stop_released_at,
        })
    }
}
