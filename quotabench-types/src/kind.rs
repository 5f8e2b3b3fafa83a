//! Enumerations shared between the coordinator, its workers and the command line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The system under test that a worker drives.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A SaGe server evaluating basic graph patterns under a time quota.
    Sage,
    /// A Triple Pattern Fragments server queried by the reference TPF client.
    Tpf,
    /// A Bindings-Restricted TPF server.
    Brtpf,
    /// A Virtuoso SPARQL endpoint.
    Virtuoso,
}

impl BackendKind {
    /// All known backend kinds, in display order.
    pub const ALL: [BackendKind; 4] = [Self::Sage, Self::Tpf, Self::Brtpf, Self::Virtuoso];

    /// The lowercase name of this kind, as accepted on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sage => "sage",
            Self::Tpf => "tpf",
            Self::Brtpf => "brtpf",
            Self::Virtuoso => "virtuoso",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`BackendKind`].
#[derive(Clone, Debug, Error)]
#[error("unknown backend kind `{0}` (expected one of sage, tpf, brtpf, virtuoso)")]
pub struct UnknownBackend(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| s.eq_ignore_ascii_case(kind.as_str()))
            .ok_or_else(|| UnknownBackend(s.to_owned()))
    }
}

/// The lifecycle a client worker follows once the start gate opens.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs the workload once, synchronously, and records its results.
    Measurement,
    /// Like [`Role::Measurement`], but produces the ground-truth run of a reference client.
    Reference,
    /// Replays the workload in the background until the stop gate opens.
    Load,
}

impl Role {
    /// The lowercase name of this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::Reference => "reference",
            Self::Load => "load",
        }
    }

    /// Returns `true` for roles that run the workload to completion exactly once.
    pub fn is_single_pass(self) -> bool {
        matches!(self, Self::Measurement | Self::Reference)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Role`].
#[derive(Clone, Debug, Error)]
#[error("unknown role `{0}` (expected one of measurement, reference, load)")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Measurement, Self::Reference, Self::Load]
            .into_iter()
            .find(|role| s.eq_ignore_ascii_case(role.as_str()))
            .ok_or_else(|| UnknownRole(s.to_owned()))
    }
}

/// How roles are distributed among the clients of one run.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// The last client measures, all others generate background load.
    #[default]
    Measured,
    /// The last client performs the reference run, all others generate background load.
    Reference,
    /// Every client runs its workload once and exits; there is no stop gate.
    Symmetric,
}

impl RunMode {
    /// Returns the role of client `index` in a run of `num_clients` clients.
    pub fn role_of(self, index: usize, num_clients: usize) -> Role {
        let distinguished = index + 1 == num_clients;
        match self {
            Self::Measured if distinguished => Role::Measurement,
            Self::Reference if distinguished => Role::Reference,
            Self::Measured | Self::Reference => Role::Load,
            Self::Symmetric => Role::Measurement,
        }
    }

    /// Returns `true` if this mode has one distinguished client whose exit releases the stop gate.
    pub fn has_distinguished_worker(self) -> bool {
        !matches!(self, Self::Symmetric)
    }
}

/// Error returned when parsing an unknown [`RunMode`].
#[derive(Clone, Debug, Error)]
#[error("unknown run mode `{0}` (expected one of measured, reference, symmetric)")]
pub struct UnknownRunMode(pub String);

impl FromStr for RunMode {
    type Err = UnknownRunMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            s if s.eq_ignore_ascii_case("measured") => Self::Measured,
            s if s.eq_ignore_ascii_case("reference") => Self::Reference,
            s if s.eq_ignore_ascii_case("symmetric") => Self::Symmetric,
            s => return Err(UnknownRunMode(s.to_owned())),
        };
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("SaGe".parse::<BackendKind>().unwrap(), BackendKind::Sage);
        assert_eq!("virtuoso".parse::<BackendKind>().unwrap(), BackendKind::Virtuoso);
        assert!("hdt".parse::<BackendKind>().is_err());
    }

    #[test]
    fn measured_mode_distinguishes_last_client() {
        let roles: Vec<_> = (0..3).map(|i| RunMode::Measured.role_of(i, 3)).collect();
        assert_eq!(roles, [Role::Load, Role::Load, Role::Measurement]);

        assert_eq!(RunMode::Reference.role_of(0, 1), Role::Reference);
        assert_eq!(RunMode::Symmetric.role_of(0, 3), Role::Measurement);
        assert!(!RunMode::Symmetric.has_distinguished_worker());
    }

    #[test]
    fn run_mode_parses() {
        assert_eq!("Symmetric".parse::<RunMode>().unwrap(), RunMode::Symmetric);
        assert!("pure-load".parse::<RunMode>().is_err());
    }
}
