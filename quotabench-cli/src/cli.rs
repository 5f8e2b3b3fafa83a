use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use argh::FromArgs;
use quotabench_runner::adapter::driver_script;
use quotabench_runner::relay::relay_gates;
use quotabench_runner::{
    BarrierSet, ClientWorker, CoordinatorConfig, ProcessLauncher, RendezvousCoordinator,
    RunOutcome, ScriptAdapter, WorkerSpec, WorkerStatus,
};
use quotabench_sim::table::{self, default_file_name};
use quotabench_sim::{QuotaContentionSimulator, SimulationConfig};
use quotabench_types::{BackendKind, Role, RunMode, WorkloadSet};
use tokio::io::BufReader;

use crate::config::Config;
use crate::{observability, summary};

/// Exit code of a load run in which some workers failed.
const EXIT_PARTIAL_FAILURE: u8 = 2;

/// Benchmark query backends under synchronized load, or simulate quota contention.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Simulate(SimulateCommand),
    Worker(WorkerCommand),
}

/// run workloads with all clients starting at the same instant
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// directory containing one subdirectory per workload
    #[argh(option)]
    workloads: PathBuf,

    /// directory receiving the results of all clients
    #[argh(option)]
    output: PathBuf,

    /// number of concurrent clients
    #[argh(option)]
    clients: usize,

    /// backend to benchmark: sage, tpf, brtpf or virtuoso
    #[argh(option)]
    backend: BackendKind,

    /// role distribution: measured, reference or symmetric (default from config)
    #[argh(option)]
    mode: Option<RunMode>,
}

/// estimate query times under a shared per-turn quota
///
/// Reads a CSV table with the columns `query,time,httpCalls` and writes a table of the same shape
/// with the estimated times, once per `--clients` value.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "simulate")]
struct SimulateCommand {
    /// CSV table of solo measurements
    #[argh(option)]
    queries: PathBuf,

    /// quota granted per client turn, in milliseconds
    #[argh(option)]
    quota: f64,

    /// number of concurrent clients, repeat to sweep several levels
    #[argh(option)]
    clients: Vec<usize>,

    /// number of Monte-Carlo trials per query
    #[argh(option, default = "1000")]
    trials: usize,

    /// output file, only allowed with a single --clients value
    #[argh(option)]
    output: Option<PathBuf>,

    /// directory for generated output files
    #[argh(option, default = "PathBuf::from(\".\")")]
    output_dir: PathBuf,

    /// master seed for reproducible estimates
    #[argh(option)]
    seed: Option<u64>,
}

/// run a single client worker, as started by `run`
///
/// Waits for gate commands on stdin. Not meant to be invoked directly.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "worker")]
struct WorkerCommand {
    /// index of this client
    #[argh(option)]
    index: usize,

    /// role of this client: measurement, reference or load
    #[argh(option)]
    role: Role,

    /// backend to drive
    #[argh(option)]
    backend: BackendKind,

    /// directory of the assigned workload
    #[argh(option)]
    workload: PathBuf,

    /// directory receiving this client's results
    #[argh(option)]
    output: PathBuf,
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();
    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("quotabench")
        .enable_all()
        .build()?;
    let runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let config_path = args.config;
    let result = runtime.block_on(async move {
        match args.command {
            Command::Run(command) => run(command, config, config_path).await,
            Command::Simulate(command) => simulate(command, config).await,
            Command::Worker(command) => worker(command, config).await,
        }
    });

    // A worker may still be blocked reading its stdin, which must not delay its exit.
    drop(runtime_guard);
    runtime.shutdown_background();

    result
}

async fn run(
    command: RunCommand,
    config: Config,
    config_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let workloads =
        WorkloadSet::discover(&command.workloads).context("failed to load workloads")?;

    let script = config.scripts.join(driver_script(command.backend));
    if !script.is_file() {
        bail!(
            "driver script `{}` for backend {} not found",
            script.display(),
            command.backend
        );
    }

    let program = std::env::current_exe().context("cannot locate the quotabench executable")?;
    let mut launcher = ProcessLauncher::new(program);
    if let Some(path) = config_path {
        launcher = launcher.arg("-c").arg(path);
    }

    let coordinator = RendezvousCoordinator::new(
        CoordinatorConfig {
            num_clients: command.clients,
            backend: command.backend,
            mode: command.mode.unwrap_or(config.mode),
            output_root: command.output,
            settle_delay: config.settle_delay,
        },
        launcher,
    );

    let report = coordinator.run(&workloads).await?;
    summary::print_run(&report);

    Ok(match report.outcome {
        RunOutcome::Success => ExitCode::SUCCESS,
        RunOutcome::PartialFailure { .. } => ExitCode::from(EXIT_PARTIAL_FAILURE),
    })
}

async fn simulate(command: SimulateCommand, config: Config) -> Result<ExitCode> {
    if command.clients.is_empty() {
        bail!("at least one --clients value is required");
    }
    if command.output.is_some() && command.clients.len() > 1 {
        bail!("--output requires a single --clients value, use --output-dir to sweep");
    }
    if !command.quota.is_finite() || command.quota < 0.0 {
        bail!("quota must be a non-negative number of milliseconds");
    }
    let quota = Duration::try_from_secs_f64(command.quota / 1000.0)
        .with_context(|| format!("quota of {}ms is out of range", command.quota))?;

    let queries = table::read_queries(&command.queries)?;
    for row in &queries.invalid {
        tracing::error!(
            query = row.query,
            line = row.line,
            error = &row.error as &dyn std::error::Error,
            "invalid query row"
        );
    }

    let seed = command
        .seed
        .or(config.simulation.seed)
        .unwrap_or_else(rand::random::<u64>);
    tracing::info!(seed, queries = queries.queries.len(), "simulating quota contention");

    let mut failed = !queries.invalid.is_empty();
    for &num_clients in &command.clients {
        let simulator = QuotaContentionSimulator::new(SimulationConfig {
            quota,
            num_clients,
            num_trials: command.trials,
            workers: config.simulation.workers,
            seed,
        })?;
        let report = simulator.simulate(&queries.queries).await;

        let path = match &command.output {
            Some(path) => path.clone(),
            None => command.output_dir.join(default_file_name(
                num_clients,
                command.quota,
                command.trials,
            )),
        };
        table::write_results(&path, &report.results)?;
        summary::print_simulation(simulator.config(), &report, &path);

        failed |= !report.failures.is_empty();
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn worker(command: WorkerCommand, config: Config) -> Result<ExitCode> {
    let workload = command
        .workload
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let spec = WorkerSpec {
        index: command.index,
        role: command.role,
        backend: command.backend,
        workload,
        workload_path: command.workload,
        output: command.output,
    };
    let adapter = ScriptAdapter::new(command.backend, &config.scripts, config.terminate_grace);

    let barrier = BarrierSet::new();
    let gates = barrier.waiters();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(error) = relay_gates(stdin, barrier).await {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "cannot read gate commands"
            );
        }
    });

    let mut worker = ClientWorker::new(spec, adapter, config.gate_timeout);
    let status = match worker.execute(gates).await {
        Ok(()) => WorkerStatus::Done,
        Err(error) => error.status(),
    };

    // Exit codes are all in 0..=4.
    Ok(ExitCode::from(status.exit_code() as u8))
}
