//! Command-line interface for the order pipeline.
//!
//! Provides the `serve` composition root and one-shot commands for
//! submitting orders, inspecting them and seeding sample data.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
