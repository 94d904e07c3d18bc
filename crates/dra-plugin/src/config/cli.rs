use clap::{Parser, Subcommand};
use utils::version;

use crate::config::daemon::{DaemonArgs, PrintStateArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = utils::logging::LOG_PATH_ENV_VAR,
        value_hint = clap::ValueHint::DirPath,
        global = true,
        help = "Directory for daily-rotated log files, in addition to stderr"
    )]
    pub log_path: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the node allocation daemon
    Daemon(Box<DaemonArgs>),
    /// Print the capacity this node would publish, as JSON
    #[command(name = "print-state")]
    PrintState(PrintStateArgs),
}
