//! The `quotabench` command line tool.
//!
//! This ties the [`quotabench_runner`] load generator and the [`quotabench_sim`] simulator to a
//! layered configuration and structured logging. See [`cli`] for the available commands.

pub mod cli;
pub mod config;
pub mod observability;
pub mod summary;
