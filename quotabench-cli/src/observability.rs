use std::env;
use std::io::{self, IsTerminal};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use crate::config::{Config, LogFormat};

/// Installs the global tracing subscriber writing to stderr.
pub fn init_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log(config.logging.level);

    let format = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);
    let format: Box<dyn Layer<Registry> + Send + Sync> = match config.logging.format {
        LogFormat::Auto if io::stderr().is_terminal() => format.compact().boxed(),
        LogFormat::Pretty => format.compact().boxed(),
        LogFormat::Auto | LogFormat::Simplified => format.with_ansi(false).boxed(),
        LogFormat::Json => format.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Resolves the effective level and filter directives.
///
/// `configured` is used unless `RUST_LOG` is set.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    // Try to parse RUST_LOG as a simple level filter and apply default levels internally.
    // Otherwise, use it literally if the user knows which overrides they want to run.
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        quotabench=TRACE,\
        quotabench_cli=TRACE,\
        quotabench_runner=TRACE,\
        quotabench_sim=TRACE,\
        quotabench_types=TRACE,\
        ",
    );

    (level, env_filter)
}
