//! CLI argument definitions for opstail-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Opstail ingestion daemon.
///
/// Tails a rotating log file, masks sensitive tokens, classifies lines
/// into events or evidence, and forwards them durably to a collector.
#[derive(Parser, Debug)]
#[command(name = "opstail-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to opstail.toml configuration file.
    #[arg(short, long, default_value = "/etc/opstail/opstail.toml")]
    pub config: PathBuf,

    /// Override the source log file path (takes precedence over config).
    #[arg(long)]
    pub source: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}
