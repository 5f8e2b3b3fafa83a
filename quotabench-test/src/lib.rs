//! Test utilities for quotabench.
//!
//! This crate provides utilities to facilitate testing the load generator and the simulator. See
//! the modules for all available utilities.

pub mod tracing;
pub mod workloads;
