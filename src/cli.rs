use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config.
    #[arg(
        long,
        global = true,
        env = "GRABBER_CONFIG",
        default_value_os_t = crate::config::default_config_path()
    )]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start every timeline and keep running until Ctrl-C.
    Run,
    /// Run mappings once, in config order, ignoring schedules.
    Once(OnceArgs),
    /// Validate the config and show what each timeline would do.
    Check,
    /// Print stored episode records as JSON lines.
    History(HistoryArgs),
}

#[derive(Debug, Args)]
pub struct OnceArgs {
    /// Only run this mapping key.
    #[arg(long)]
    pub series: Option<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Only show records for this mapping key.
    #[arg(long)]
    pub series: Option<String>,

    /// Show at most the newest N records.
    #[arg(long)]
    pub limit: Option<usize>,
}
