//! Command-line entry point arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "coopctl", about = "Poultry-house hardware control core")]
pub struct Cli {
    /// Path to the JSON configuration snapshot.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Run against the in-memory simulation adapter instead of live transports.
    #[arg(long)]
    pub simulate: bool,

    /// Log level passed to `env_logger` (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
