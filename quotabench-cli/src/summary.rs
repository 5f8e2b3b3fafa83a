//! Human-readable summaries printed to stdout after a command completes.

use std::path::Path;

use quotabench_runner::{RunOutcome, RunReport, WorkerStatus};
use quotabench_sim::{SimulationConfig, SimulationReport};
use yansi::Paint;

/// Prints the status of every worker of a load run.
pub fn print_run(report: &RunReport) {
    println!();
    println!(
        "{} ({} clients)",
        "## Run".bold(),
        report.workers.len().bold()
    );

    for worker in &report.workers {
        let status = match &worker.status {
            WorkerStatus::Done => worker.status.to_string().green().to_string(),
            status => status.to_string().bold().red().to_string(),
        };
        println!(
            "  client {:>3}  {:<11}  mix {:<8}  {status}",
            worker.spec.index,
            worker.spec.role.to_string(),
            worker.spec.workload.blue(),
        );
    }

    if let Some(stop) = report.stop_released_at {
        let elapsed = stop.duration_since(report.start_released_at);
        println!("  load stopped {:.2?} after start", elapsed.bold());
    }

    match &report.outcome {
        RunOutcome::Success => println!("{}", "SUCCESS".bold().green()),
        RunOutcome::PartialFailure { failed_indices } => println!(
            "{}",
            format!("{} FAILED: {failed_indices:?}", failed_indices.len())
                .bold()
                .red()
        ),
    }
}

/// Prints the estimates of one simulated concurrency level.
pub fn print_simulation(config: &SimulationConfig, report: &SimulationReport, path: &Path) {
    println!();
    println!(
        "{} ({} clients, quota {:?}, {} trials, seed {})",
        "## Simulation".bold(),
        config.num_clients.bold(),
        config.quota,
        config.num_trials,
        config.seed,
    );

    for result in &report.results {
        let spread = result.spread;
        println!(
            "  {:<12} {} sub-operations",
            result.query_name.blue(),
            result.sub_operation_count
        );
        println!(
            "    estimate: {:.3?}; p50: {:.3?}; p90: {:.3?}; p99: {:.3?}",
            result.estimated_time.bold(),
            spread.p50,
            spread.p90,
            spread.p99
        );
    }

    if !report.failures.is_empty() {
        println!(
            "{}",
            format!("{} QUERIES NOT SIMULATED", report.failures.len())
                .bold()
                .red()
        );
    }
    println!("  written to {}", path.display());
}
