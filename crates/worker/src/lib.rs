//! Command-line entry point for patch runs.

pub mod app;
pub mod cli;
pub mod config;
pub mod telemetry;
