//! LumaDB broker entry point.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod cli;
mod server;
mod transport;

use cli::{Cli, Commands};
use lumadb_common::config::Config;
use server::LumaServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("lumadb=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            info!("starting LumaDB broker");
            let config = Config::load(config.as_deref().map(std::path::Path::new))?;
            let mut server = LumaServer::new(config).await?;

            let shutdown = async {
                tokio::signal::ctrl_c().await.ok();
                info!("shutdown signal received");
            };

            tokio::select! {
                result = server.run() => result?,
                () = shutdown => server.shutdown().await?,
            }
        }
        Commands::Version => {
            println!("LumaDB version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
