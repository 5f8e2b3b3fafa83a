//! Single-shot rendezvous gates.
//!
//! A [`BarrierSet`] holds the two gates of a run: the start gate, which releases every worker
//! into its timed section at once, and the stop gate, which tells background load to shut down.
//! Each [`Gate`] starts armed and can be released exactly once.
//!
//! The set itself is the write side. Workers receive [`BarrierWaiters`], which can only wait.
//! Dropping the set while a gate is still armed closes it, and anyone waiting on it observes
//! [`GateError::Closed`].

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;

/// Errors when releasing or waiting on a [`Gate`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// The gate was released before. Gates are write-once per run.
    #[error("gate `{0}` was already released")]
    AlreadyReleased(&'static str),

    /// The gate was not released within the bounded wait.
    #[error("gate `{name}` was not released within {timeout:?}")]
    Timeout {
        /// Name of the gate.
        name: &'static str,
        /// The wait that elapsed.
        timeout: Duration,
    },

    /// The owner of the gate went away without releasing it.
    #[error("gate `{0}` was closed without being released")]
    Closed(&'static str),
}

/// The write side of a single-shot gate.
#[derive(Debug)]
pub struct Gate {
    name: &'static str,
    tx: watch::Sender<Option<Instant>>,
}

impl Gate {
    /// Creates a new, armed gate.
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { name, tx }
    }

    /// Releases the gate and wakes all waiters, returning the release instant.
    pub fn release(&self) -> Result<Instant, GateError> {
        let now = Instant::now();
        let released = self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(now);
            true
        });

        if !released {
            return Err(GateError::AlreadyReleased(self.name));
        }
        tracing::debug!(gate = self.name, "gate released");
        Ok(now)
    }

    /// Returns when the gate was released, or `None` while it is armed.
    pub fn released_at(&self) -> Option<Instant> {
        *self.tx.borrow()
    }

    /// Creates a handle that can wait for this gate.
    pub fn waiter(&self) -> GateWaiter {
        GateWaiter {
            name: self.name,
            rx: self.tx.subscribe(),
        }
    }
}

/// The read side of a [`Gate`].
#[derive(Clone, Debug)]
pub struct GateWaiter {
    name: &'static str,
    rx: watch::Receiver<Option<Instant>>,
}

impl GateWaiter {
    /// Waits until the gate is released, returning the release instant.
    ///
    /// Returns immediately if the gate was released before.
    pub async fn wait(&mut self) -> Result<Instant, GateError> {
        let state = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| GateError::Closed(self.name))?;
        (*state).ok_or(GateError::Closed(self.name))
    }

    /// Waits until the gate is released, failing with [`GateError::Timeout`] after `timeout`.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Instant, GateError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Timeout {
                name: self.name,
                timeout,
            }),
        }
    }

    /// Returns `true` if the gate has been released.
    pub fn is_released(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// The pair of gates coordinating one run.
#[derive(Debug)]
pub struct BarrierSet {
    /// Released once all workers had the chance to reach their wait point.
    pub start: Gate,
    /// Released once the distinguished worker has finished.
    pub stop: Gate,
}

impl BarrierSet {
    /// Creates a new set with both gates armed.
    pub fn new() -> Self {
        Self {
            start: Gate::new("start"),
            stop: Gate::new("stop"),
        }
    }

    /// Creates wait handles for one worker.
    pub fn waiters(&self) -> BarrierWaiters {
        BarrierWaiters {
            start: self.start.waiter(),
            stop: self.stop.waiter(),
        }
    }
}

impl Default for BarrierSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait handles for both gates of a [`BarrierSet`].
#[derive(Clone, Debug)]
pub struct BarrierWaiters {
    /// Waits for the start gate.
    pub start: GateWaiter,
    /// Waits for the stop gate.
    pub stop: GateWaiter,
}
