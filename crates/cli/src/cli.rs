//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// cdc-pubsub - change-feed sink publishing to pub/sub topics
#[derive(Parser, Debug)]
#[command(
    name = "cdc-pubsub",
    author,
    version,
    about = "Change-feed pub/sub sink driver",
    long_about = "Publishes row changes to one pub/sub topic per watched table.\n\n\
                  Loads a sink configuration, dials the transport it names, drives a \n\
                  synthetic change feed through the sink and reports what was published."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CDC_PUBSUB_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CDC_PUBSUB_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a synthetic change feed through the sink
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "sink.toml", env = "CDC_PUBSUB_CONFIG")]
    pub config: PathBuf,

    /// Override the number of workers from configuration
    #[arg(long, env = "CDC_PUBSUB_WORKERS")]
    pub workers: Option<usize>,

    /// Number of row changes to emit
    #[arg(long, default_value = "1000", env = "CDC_PUBSUB_ROWS")]
    pub rows: u64,

    /// Number of distinct keys the rows are spread over
    #[arg(long, default_value = "10", env = "CDC_PUBSUB_KEYS")]
    pub keys: u64,

    /// Flush (and emit a resolved timestamp) every N rows (0 = only at the end)
    #[arg(long, default_value = "100", env = "CDC_PUBSUB_FLUSH_EVERY")]
    pub flush_every: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "CDC_PUBSUB_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CDC_PUBSUB_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "sink.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "sink.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show every target and its topic
    #[arg(long)]
    pub targets: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
