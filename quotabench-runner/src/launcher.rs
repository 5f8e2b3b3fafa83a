//! Starting client workers.
//!
//! The coordinator does not care how a worker runs, only that it can be started with a set of
//! gate waiters and awaited for its [`WorkerStatus`]. Two launchers are provided:
//!
//! - [`ProcessLauncher`] starts every worker as a separate OS process and relays the gates over
//!   the process's stdin. This is what benchmark runs use, since backends must see genuinely
//!   independent clients.
//! - [`TaskLauncher`] runs every worker as a tokio task in the current process, sharing the
//!   coordinator's barrier directly.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::adapter::BackendAdapter;
use crate::barrier::BarrierWaiters;
use crate::relay::forward_gates;
use crate::worker::{ClientWorker, WorkerSpec, WorkerStatus};

/// Starts client workers for the coordinator.
pub trait WorkerLauncher: Send + Sync {
    /// A started worker.
    type Worker: LaunchedWorker;

    /// Starts a worker for `spec` without waiting for it to become ready.
    ///
    /// The worker must not begin its timed work before `gates.start` opens.
    fn launch(&self, spec: &WorkerSpec, gates: BarrierWaiters) -> io::Result<Self::Worker>;
}

/// A running worker.
#[async_trait]
pub trait LaunchedWorker: Send {
    /// Waits for the worker to finish and reports how it ended.
    ///
    /// Must be called at most once.
    async fn wait(&mut self) -> WorkerStatus;
}

/// Launches workers as child processes of the current executable.
///
/// Each worker runs `<program> <args...> worker --index .. --role .. --backend .. --workload ..
/// --output ..`, inheriting the environment, stdout and stderr of the coordinator.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    /// Creates a launcher that runs `program` for each worker.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds an argument placed before the `worker` subcommand.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Worker = WorkerProcess;

    fn launch(&self, spec: &WorkerSpec, gates: BarrierWaiters) -> io::Result<WorkerProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("worker")
            .arg("--index")
            .arg(spec.index.to_string())
            .arg("--role")
            .arg(spec.role.as_str())
            .arg("--backend")
            .arg(spec.backend.as_str())
            .arg("--workload")
            .arg(&spec.workload_path)
            .arg("--output")
            .arg(&spec.output)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin was not captured"))?;
        let relay = tokio::spawn(async move {
            if let Err(error) = forward_gates(gates, stdin).await {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    "worker stopped reading gates"
                );
            }
        });

        tracing::debug!(index = spec.index, pid = child.id(), "spawned worker process");
        Ok(WorkerProcess { child, relay })
    }
}

/// A worker running as a child process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    relay: JoinHandle<()>,
}

#[async_trait]
impl LaunchedWorker for WorkerProcess {
    async fn wait(&mut self) -> WorkerStatus {
        match self.child.wait().await {
            Ok(status) => WorkerStatus::from_exit_status(status),
            Err(error) => WorkerStatus::Failed(format!("cannot wait for worker process: {error}")),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

/// Launches workers as tasks on the current tokio runtime.
#[derive(Clone, Debug)]
pub struct TaskLauncher<A> {
    adapter: A,
    gate_timeout: Duration,
}

impl<A> TaskLauncher<A> {
    /// Creates a launcher whose workers all share clones of `adapter`.
    pub fn new(adapter: A, gate_timeout: Duration) -> Self {
        Self {
            adapter,
            gate_timeout,
        }
    }
}

impl<A> WorkerLauncher for TaskLauncher<A>
where
    A: BackendAdapter + Clone + 'static,
    A::Handle: 'static,
{
    type Worker = WorkerTask;

    fn launch(&self, spec: &WorkerSpec, gates: BarrierWaiters) -> io::Result<WorkerTask> {
        let mut worker = ClientWorker::new(spec.clone(), self.adapter.clone(), self.gate_timeout);
        let task = tokio::spawn(async move {
            match worker.execute(gates).await {
                Ok(()) => WorkerStatus::Done,
                Err(error) => error.status(),
            }
        });

        Ok(WorkerTask { task })
    }
}

/// A worker running as a tokio task.
#[derive(Debug)]
pub struct WorkerTask {
    task: JoinHandle<WorkerStatus>,
}

#[async_trait]
impl LaunchedWorker for WorkerTask {
    async fn wait(&mut self) -> WorkerStatus {
        match (&mut self.task).await {
            Ok(status) => status,
            Err(error) => WorkerStatus::Failed(format!("worker task failed: {error}")),
        }
    }
}
