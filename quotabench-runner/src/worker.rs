//! The lifecycle of a single benchmark client.
//!
//! A [`ClientWorker`] waits on the start gate of its [`BarrierSet`](crate::BarrierSet) and then
//! follows its [`Role`]:
//!
//! - `Measurement` and `Reference` workers run their workload once, synchronously, and finish.
//! - `Load` workers start a background replay, wait for the stop gate and terminate the replay.
//!
//! Once past the start gate, a worker never waits on coordination again except for the stop gate
//! of a load worker.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use quotabench_types::{BackendKind, Role};
use thiserror::Error;

use crate::adapter::{AdapterError, BackendAdapter};
use crate::barrier::{BarrierWaiters, GateError};

/// Process exit code of a worker that finished its lifecycle.
pub const EXIT_DONE: i32 = 0;
/// Process exit code of a worker whose adapter failed.
pub const EXIT_FAILED: i32 = 1;
/// Process exit code of a worker that never saw the start gate open.
pub const EXIT_START_TIMEOUT: i32 = 3;
/// Process exit code of a worker whose coordinator went away.
pub const EXIT_HUNG_UP: i32 = 4;

/// Everything a worker needs to know about its assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Index of the client, from `0` to `num_clients - 1`.
    pub index: usize,
    /// The lifecycle this worker follows.
    pub role: Role,
    /// The backend this worker drives.
    pub backend: BackendKind,
    /// Name of the assigned workload.
    pub workload: String,
    /// Directory containing the assigned workload's queries.
    pub workload_path: PathBuf,
    /// Directory this worker writes its results into.
    pub output: PathBuf,
}

/// The state of a [`ClientWorker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    /// Waiting for the start gate.
    Waiting,
    /// Executing the role-specific work.
    Running,
    /// Stopping background load after the stop gate opened.
    Terminating,
    /// Finished. This state is terminal.
    Done,
}

/// Errors ending a worker's lifecycle early.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The start gate did not open within the bounded wait.
    #[error("start gate did not open")]
    StartTimeout(#[source] GateError),

    /// The coordinator went away before releasing a gate.
    #[error("coordinator hung up")]
    HungUp(#[source] GateError),

    /// The backend adapter failed.
    #[error("backend adapter failed")]
    Adapter(#[from] AdapterError),
}

impl WorkerError {
    /// Returns the status reported for this error.
    pub fn status(&self) -> WorkerStatus {
        match self {
            Self::StartTimeout(_) => WorkerStatus::Deadlock,
            Self::HungUp(_) => WorkerStatus::HungUp,
            Self::Adapter(error) => WorkerStatus::Failed(error.to_string()),
        }
    }

    fn from_gate(error: GateError) -> Self {
        match error {
            GateError::Timeout { .. } => Self::StartTimeout(error),
            GateError::Closed(_) | GateError::AlreadyReleased(_) => Self::HungUp(error),
        }
    }
}

/// How a worker ended, as observed by the coordinator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkerStatus {
    /// The worker completed its lifecycle.
    Done,
    /// The worker ran but its backend failed.
    Failed(String),
    /// The worker gave up waiting for the start gate.
    Deadlock,
    /// The worker lost its connection to the coordinator.
    HungUp,
}

impl WorkerStatus {
    /// Returns `true` if the worker completed its lifecycle.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The process exit code a worker process reports for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Done => EXIT_DONE,
            Self::Failed(_) => EXIT_FAILED,
            Self::Deadlock => EXIT_START_TIMEOUT,
            Self::HungUp => EXIT_HUNG_UP,
        }
    }

    /// Interprets the exit status of a worker process.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(EXIT_DONE) => Self::Done,
            Some(EXIT_START_TIMEOUT) => Self::Deadlock,
            Some(EXIT_HUNG_UP) => Self::HungUp,
            _ => Self::Failed(format!("worker process exited with {status}")),
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Deadlock => f.write_str("start gate timeout"),
            Self::HungUp => f.write_str("coordinator hung up"),
        }
    }
}

/// Drives one backend adapter through a role-dependent lifecycle.
#[derive(Debug)]
pub struct ClientWorker<A> {
    spec: WorkerSpec,
    adapter: A,
    gate_timeout: Duration,
    state: WorkerState,
}

impl<A: BackendAdapter> ClientWorker<A> {
    /// Creates a worker in the [`WorkerState::Waiting`] state.
    ///
    /// `gate_timeout` bounds the wait for the start gate.
    pub fn new(spec: WorkerSpec, adapter: A, gate_timeout: Duration) -> Self {
        Self {
            spec,
            adapter,
            gate_timeout,
            state: WorkerState::Waiting,
        }
    }

    /// The current state of this worker.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs the full lifecycle, ending in [`WorkerState::Done`].
    pub async fn execute(&mut self, mut gates: BarrierWaiters) -> Result<(), WorkerError> {
        let result = self.run(&mut gates).await;
        self.transition(WorkerState::Done);
        if let Err(ref error) = result {
            tracing::error!(
                index = self.spec.index,
                error = error as &dyn std::error::Error,
                "worker failed"
            );
        }
        result
    }

    async fn run(&mut self, gates: &mut BarrierWaiters) -> Result<(), WorkerError> {
        gates
            .start
            .wait_timeout(self.gate_timeout)
            .await
            .map_err(WorkerError::from_gate)?;
        self.transition(WorkerState::Running);

        if self.spec.role.is_single_pass() {
            self.adapter
                .run_measurement(self.spec.role, &self.spec.workload_path, &self.spec.output)
                .await?;
            return Ok(());
        }

        let mut handle = self.adapter.start_load(&self.spec.workload_path).await?;
        let stopped = gates.stop.wait().await;

        // Stop the replay even if the coordinator went away, so it does not outlive us.
        self.transition(WorkerState::Terminating);
        self.adapter.terminate(&mut handle).await?;
        stopped.map_err(WorkerError::from_gate)?;

        Ok(())
    }

    fn transition(&mut self, state: WorkerState) {
        tracing::debug!(
            index = self.spec.index,
            role = %self.spec.role,
            workload = self.spec.workload,
            from = ?self.state,
            to = ?state,
            "worker state change"
        );
        self.state = state;
    }
}
