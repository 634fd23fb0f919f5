use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "emarket")]
#[command(about = "Peer-to-peer energy double auction")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Log output format (defaults to the configured one)
    #[arg(long, value_enum, global = true, env = "EMARKET_LOG_FORMAT")]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a script of market transactions against an in-memory registry
    Simulate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "emarket.yaml")]
        config: PathBuf,

        /// Path to the YAML transaction script
        #[arg(short, long)]
        script: PathBuf,

        /// Print every emitted event as JSON
        #[arg(long)]
        events: bool,
    },

    /// Validate configuration without running anything
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "emarket.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "emarket.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable multi-line output
    Pretty,
    /// One JSON object per line
    Json,
    /// Single-line output
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
