// src/cli.rs

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Batch workflow DAG executor.
#[derive(Debug, Parser)]
#[command(name = "dagrun", version, about)]
pub struct CliArgs {
    /// Path to the workflow TOML file.
    #[arg(default_value = "Workflow.toml")]
    pub config: String,

    /// Replay event history before going live (also forced by a leftover
    /// lock file).
    #[arg(long)]
    pub recover: bool,

    /// Complete every node locally without submitting real jobs.
    #[arg(long)]
    pub dry_run: bool,

    /// Log verbosity (overrides DAGRUN_LOG).
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}
