//! Synchronized load generation against query-serving backends.
//!
//! A [`RendezvousCoordinator`] launches one [`ClientWorker`] per simulated client and holds the
//! only [`BarrierSet`] of the run. Workers wait on its start gate so that they all begin at the
//! same instant, regardless of process startup jitter. Load workers additionally wait on the stop
//! gate, which opens once the distinguished measurement worker has finished.
//!
//! Workers talk to the system under test through a [`BackendAdapter`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod adapter;
pub mod barrier;
pub mod coordinator;
pub mod launcher;
pub mod relay;
pub mod worker;

pub use adapter::{AdapterError, BackendAdapter, LoadProcess, ScriptAdapter};
pub use barrier::{BarrierSet, BarrierWaiters, Gate, GateError, GateWaiter};
pub use coordinator::{
    CoordinatorConfig, RendezvousCoordinator, RunError, RunOutcome, RunReport, WorkerReport,
};
pub use launcher::{LaunchedWorker, ProcessLauncher, TaskLauncher, WorkerLauncher};
pub use worker::{ClientWorker, WorkerError, WorkerSpec, WorkerState, WorkerStatus};
