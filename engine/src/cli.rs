//! CLI interface
//!
//! Command-line interface using clap's derive API. The binary either
//! serves the REST API or executes one-off commands against the same
//! engine services.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Archon agent execution engine
///
/// Turns an inbound command into one governed execution cycle with a
/// durable task record, policy gating, and load-balanced model routing.
#[derive(Parser, Debug)]
#[command(name = "archon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the REST API server and cron loop
    Serve,

    /// Execute one cycle immediately
    Run {
        /// The command to execute
        command: String,

        /// Skill to invoke instead of inferring one
        #[arg(long)]
        skill: Option<String>,

        /// Task type used for routing and tagging
        #[arg(long, default_value = "general")]
        task_type: String,

        /// Budget hint: low, medium, high
        #[arg(long, default_value = "medium")]
        budget: String,
    },

    /// Show recent task records
    Tasks {
        /// Number of tasks to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Show provider availability and governor mode
    Status,
}
