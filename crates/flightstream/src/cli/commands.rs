//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Listen command arguments.
#[derive(Debug, Args)]
pub struct ListenCommand {
    /// WebSocket endpoint to stream from (overrides `stream.endpoint`)
    #[arg(short, long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Append every received sample to the flight log store
    #[arg(short, long)]
    pub save: bool,

    /// Start with listening paused
    #[arg(short, long)]
    pub paused: bool,
}

/// Flight log commands.
#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// List stored flights
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show one stored flight and its samples
    Show {
        /// Flight key
        key: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete a stored flight
    Delete {
        /// Flight key
        key: String,
    },

    /// Show store statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// Flight key to replay
    pub key: String,

    /// Milliseconds between frames (overrides `replay.frame_interval_ms`)
    #[arg(short, long, value_name = "MS")]
    pub interval_ms: Option<u64>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_command_debug() {
        let cmd = ListenCommand {
            endpoint: Some("ws://host:1".to_string()),
            save: true,
            paused: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("ws://host:1"));
        assert!(debug_str.contains("save"));
    }

    #[test]
    fn test_logs_command_debug() {
        let cmd = LogsCommand::Show {
            key: "X_2024-01-01_N/A".to_string(),
            json: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
        assert!(debug_str.contains("X_2024-01-01_N/A"));
    }

    #[test]
    fn test_replay_command_debug() {
        let cmd = ReplayCommand {
            key: "k".to_string(),
            interval_ms: Some(50),
        };
        assert!(format!("{cmd:?}").contains("interval_ms"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
