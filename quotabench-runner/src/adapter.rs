//! Backend adapters that execute workloads against a system under test.
//!
//! The runner only needs three capabilities from a backend: run a workload once and persist its
//! results, start replaying a workload in the background, and stop such a background replay.
//! These are captured by the [`BackendAdapter`] trait.
//!
//! [`ScriptAdapter`] implements the trait for the driver scripts shipped with the benchmark, one
//! script per [`BackendKind`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use quotabench_types::{BackendKind, Role};
use thiserror::Error;
use tokio::process::{Child, Command};

/// Environment variable telling a driver script which role it plays.
pub const ROLE_ENV: &str = "QUOTABENCH_ROLE";

/// Errors raised by a [`BackendAdapter`].
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The driver could not be started.
    #[error("failed to start driver `{}`", program.display())]
    Spawn {
        /// The driver that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: io::Error,
    },

    /// The driver ran but reported a failure.
    #[error("driver exited with {0}")]
    Failed(ExitStatus),

    /// Waiting for or signalling the driver failed.
    #[error("failed to control driver process")]
    Io(#[from] io::Error),

    /// Any other failure reported by an adapter implementation.
    #[error("{0}")]
    Other(String),
}

/// Executes workloads against one backend.
#[async_trait]
pub trait BackendAdapter: fmt::Debug + Send + Sync {
    /// A handle to a running background load.
    type Handle: Send;

    /// Runs the workload in `workload` to completion and writes results into `output`.
    ///
    /// Resolves once the run has finished. A failed run is reported, never retried.
    async fn run_measurement(
        &self,
        role: Role,
        workload: &Path,
        output: &Path,
    ) -> Result<(), AdapterError>;

    /// Starts replaying the workload in `workload` in the background.
    ///
    /// Resolves as soon as the replay is running.
    async fn start_load(&self, workload: &Path) -> Result<Self::Handle, AdapterError>;

    /// Stops a background replay started by [`start_load`](Self::start_load).
    ///
    /// Terminating a replay that has already exited is a no-op.
    async fn terminate(&self, handle: &mut Self::Handle) -> Result<(), AdapterError>;
}

/// Adapter that drives a backend through its shell driver script.
///
/// Measurements run `bash <script> <workload> <output>` and wait for it to exit. Background load
/// runs `bash <script> <workload>` in its own process group, so that termination also reaches
/// everything the script spawned.
#[derive(Clone, Debug)]
pub struct ScriptAdapter {
    kind: BackendKind,
    script: PathBuf,
    terminate_grace: Duration,
}

impl ScriptAdapter {
    /// Creates an adapter for `kind` using the driver scripts in `scripts`.
    pub fn new(kind: BackendKind, scripts: &Path, terminate_grace: Duration) -> Self {
        Self {
            kind,
            script: scripts.join(driver_script(kind)),
            terminate_grace,
        }
    }

    fn command(&self, role: Role) -> Command {
        let mut command = Command::new("bash");
        command
            .arg(&self.script)
            .env(ROLE_ENV, role.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, cause: io::Error) -> AdapterError {
        AdapterError::Spawn {
            program: self.script.clone(),
            cause,
        }
    }
}

/// Returns the file name of the driver script for `kind`.
pub fn driver_script(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Sage => "run_bgp.sh",
        BackendKind::Tpf => "run_tpf.sh",
        BackendKind::Brtpf => "run_brtpf.sh",
        BackendKind::Virtuoso => "run_virtuoso.sh",
    }
}

#[async_trait]
impl BackendAdapter for ScriptAdapter {
    type Handle = LoadProcess;

    async fn run_measurement(
        &self,
        role: Role,
        workload: &Path,
        output: &Path,
    ) -> Result<(), AdapterError> {
        let status = self
            .command(role)
            .arg(workload)
            .arg(output)
            .status()
            .await
            .map_err(|cause| self.spawn_error(cause))?;

        if !status.success() {
            return Err(AdapterError::Failed(status));
        }
        Ok(())
    }

    async fn start_load(&self, workload: &Path) -> Result<LoadProcess, AdapterError> {
        let child = self
            .command(Role::Load)
            .arg(workload)
            .process_group(0)
            .spawn()
            .map_err(|cause| self.spawn_error(cause))?;

        tracing::debug!(pid = child.id(), backend = %self.kind, "started background load");
        Ok(LoadProcess {
            child,
            grace: self.terminate_grace,
        })
    }

    async fn terminate(&self, handle: &mut LoadProcess) -> Result<(), AdapterError> {
        handle.terminate().await
    }
}

/// A background load driver started by [`ScriptAdapter`].
#[derive(Debug)]
pub struct LoadProcess {
    child: Child,
    grace: Duration,
}

impl LoadProcess {
    /// Stops the driver and its process group.
    ///
    /// Sends `SIGTERM` first and escalates to `SIGKILL` after the grace period.
    pub async fn terminate(&mut self) -> Result<(), AdapterError> {
        if let Some(status) = self.child.try_wait()? {
            tracing::debug!(%status, "background load already exited");
            return Ok(());
        }
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        // The driver leads its own process group, see `start_load`.
        let group = Pid::from_raw(pid as i32);
        match signal::killpg(group, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => (),
            Err(errno) => return Err(AdapterError::Io(errno.into())),
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!(%status, "background load terminated");
            }
            Err(_) => {
                tracing::warn!(
                    pid,
                    grace = ?self.grace,
                    "background load ignored SIGTERM, killing"
                );
                match signal::killpg(group, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => (),
                    Err(errno) => return Err(AdapterError::Io(errno.into())),
                }
                self.child.wait().await?;
            }
        }

        Ok(())
    }
}
