use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Switchyard - streaming LLM relay", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new config file
    Init {
        /// Path for new config file
        #[arg(default_value = "switchyard.toml")]
        path: PathBuf,
    },
    /// Start the WebSocket relay server
    Serve {
        /// Host to bind to (overrides [server].host)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides [server].port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the models each provider serves
    Models,
    /// List stored conversations
    Conversations {
        /// Database file (overrides [storage].db_path)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
}
