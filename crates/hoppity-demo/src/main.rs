use anyhow::Result;
use clap::Parser;
use hoppity::{InMemoryBroker, Topology};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let topology = match &cli.topology {
        Some(path) => {
            info!(path = %path.display(), "Loading topology");
            Some(Topology::load(path).await?)
        }
        None => None,
    };

    let broker = InMemoryBroker::new();
    match cli.command {
        Commands::Pubsub {
            count,
            interval_ms,
            publication,
            subscription,
        } => {
            commands::pubsub::execute(
                broker,
                topology,
                commands::pubsub::PubsubArgs {
                    count,
                    interval_ms,
                    publication,
                    subscription,
                },
            )
            .await
        }
        Commands::Rpc { count, timeout_ms } => {
            commands::rpc::execute(broker, topology, count, timeout_ms).await
        }
        Commands::Delayed { count, delay_ms } => {
            commands::delayed::execute(broker, topology, count, delay_ms).await
        }
    }
}
