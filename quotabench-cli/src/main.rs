//! Benchmarks query backends under synchronized concurrent load and simulates quota contention.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::process::ExitCode;

fn main() -> ExitCode {
    match quotabench_cli::cli::execute() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:?}");
            ExitCode::FAILURE
        }
    }
}
