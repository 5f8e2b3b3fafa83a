//! Configuration for the quotabench tool.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `QB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested configuration structures.
//! For example, `QB__SETTLE_DELAY=5s` sets the settle delay and `QB__SIMULATION__SEED=42` fixes the
//! simulator's master seed. The same configuration in YAML format:
//!
//! ```yaml
//! settle_delay: 5s
//!
//! simulation:
//!   seed: 42
//! ```
//!
//! Worker processes inherit the environment and configuration file of the coordinator, so they
//! always observe the same configuration.

use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use quotabench_types::RunMode;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "QB__";

/// Parameters of the quota contention simulator.
///
/// Used in: [`Config::simulation`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Simulation {
    /// Maximum number of trial batches running in parallel.
    ///
    /// The pool size only affects how fast a simulation completes, never its results.
    ///
    /// # Default
    ///
    /// The available parallelism of the host.
    ///
    /// # Environment Variable
    ///
    /// `QB__SIMULATION__WORKERS`
    pub workers: usize,

    /// Master seed for all trial generators.
    ///
    /// Can be overridden with `--seed`. When unset, a random seed is drawn and logged.
    ///
    /// # Environment Variable
    ///
    /// `QB__SIMULATION__SEED`
    pub seed: Option<u64>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            workers: available_parallelism().map_or(1, |n| n.get()),
            seed: None,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Compact output with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Logging configuration.
///
/// Controls the verbosity and format of log output. Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// `RUST_LOG` takes precedence if set.
    ///
    /// # Default
    ///
    /// `info`
    ///
    /// # Environment Variable
    ///
    /// `QB__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Output format, see [`LogFormat`].
    ///
    /// # Default
    ///
    /// `auto`
    ///
    /// # Environment Variable
    ///
    /// `QB__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Main configuration struct for the quotabench tool.
///
/// See the module-level documentation for how configuration is loaded.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Time given to all workers to reach the start gate before it is released.
    ///
    /// Workers do not report readiness, so this must cover the slowest process startup.
    ///
    /// # Default
    ///
    /// `3s`
    ///
    /// # Environment Variable
    ///
    /// `QB__SETTLE_DELAY`
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// How long a worker waits for the start gate before giving up.
    ///
    /// A worker that gives up exits with a distinct status, and the run fails as deadlocked.
    ///
    /// # Default
    ///
    /// `60s`
    ///
    /// # Environment Variable
    ///
    /// `QB__GATE_TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub gate_timeout: Duration,

    /// Time between `SIGTERM` and `SIGKILL` when stopping background load.
    ///
    /// # Default
    ///
    /// `5s`
    ///
    /// # Environment Variable
    ///
    /// `QB__TERMINATE_GRACE`
    #[serde(with = "humantime_serde")]
    pub terminate_grace: Duration,

    /// Directory containing the backend driver scripts.
    ///
    /// # Default
    ///
    /// `scripts` (relative to the working directory)
    ///
    /// # Environment Variable
    ///
    /// `QB__SCRIPTS`
    pub scripts: PathBuf,

    /// How roles are distributed among clients, unless overridden with `--mode`.
    ///
    /// # Default
    ///
    /// `measured`
    ///
    /// # Environment Variable
    ///
    /// `QB__MODE`
    pub mode: RunMode,

    /// Simulator configuration.
    pub simulation: Simulation,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            gate_timeout: Duration::from_secs(60),
            terminate_grace: Duration::from_secs(5),
            scripts: PathBuf::from("scripts"),
            mode: RunMode::default(),
            simulation: Simulation::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `QB__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
