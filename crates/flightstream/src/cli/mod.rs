//! Command-line interface for flightstream.
//!
//! This module provides the CLI structure for the `flightstream` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, ListenCommand, LogsCommand, ReplayCommand};

use crate::logging::Verbosity;

/// flightstream - Live flight telemetry with a durable per-flight log
///
/// Streams telemetry from a ground-station WebSocket, keeps a rolling window
/// of recent samples, and optionally records every sample keyed by flight.
#[derive(Debug, Parser)]
#[command(name = "flightstream")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live telemetry until Ctrl-C (type `p` + Enter to pause/resume)
    Listen(ListenCommand),

    /// Inspect and manage stored flight logs
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Replay a stored flight frame by frame
    Replay(ReplayCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
