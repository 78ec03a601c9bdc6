//! Command-line surface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lumadb")]
#[command(author, version, about = "LumaDB broker", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the broker.
    Server {
        /// Configuration file path (TOML or YAML).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Print version information.
    Version,
}
