//! Command-line interface definition and argument parsing

use clap::Parser;
use std::path::PathBuf;

/// Command-line interface definition for beacond
#[derive(Parser)]
#[command(name = "beacond")]
#[command(about = "BLE beacon presence agent with HTTP notifications")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Raise the default log level to debug
    #[arg(short, long)]
    pub verbose: bool,
}
