//! Command line argument parsing for the fan control daemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HPE iLO4 fan control
///
/// Reads CPU temperatures from the iLO REST API and sets fan speeds through
/// the iLO SSH shell.
#[derive(Parser, Debug)]
#[command(name = "ilo-fan-control")]
#[command(about = "Temperature-based fan control for HPE iLO4")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop until interrupted
    Daemon {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Read temperatures once and show the commands that would be sent
    Status {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: ConnectionOverrides,
    },
    /// Set one fan through a single session
    Apply {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Fan id
        #[arg(long)]
        fan: u8,
        /// Duty value (0-255)
        #[arg(long)]
        duty: u8,
    },
    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Connection settings that take precedence over the configuration file
#[derive(clap::Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionOverrides {
    /// iLO hostname or IP address
    #[arg(long)]
    pub host: Option<String>,
    /// iLO user name
    #[arg(long)]
    pub user: Option<String>,
    /// iLO password
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a sample configuration file
    Sample {
        /// Target path
        #[arg(short, long)]
        path: PathBuf,
        /// Enable the second CPU fan group
        #[arg(short, long)]
        dual: bool,
    },
    /// Load and validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(short, long)]
        path: PathBuf,
    },
}
