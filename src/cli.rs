use clap::{Parser, Subcommand};
use std::path::PathBuf;

// CLI definition
#[derive(Parser, Debug)]
#[command(
    name = "servhost",
    author,
    version,
    about = "Run a service under the service control manager or the console"
)]
pub struct Cli {
    /// Configuration file (defaults to $SERVHOST_CONFIG, then servhost.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the heartbeat demo service
    Run {
        #[arg(long, default_value = "ServHostDemo")]
        name: String,

        /// Skip the service control manager and run in the foreground
        #[arg(long)]
        console: bool,

        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,
    },

    /// Check whether NAME is an acceptable service name
    CheckName {
        name: String,
    },
}
