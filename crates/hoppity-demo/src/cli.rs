use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hoppity-demo")]
#[command(about = "Example hoppity services running over an in-memory broker")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Topology file (.json, .yaml, .yml or .toml) used instead of the built-in one
    #[arg(short, long, global = true)]
    pub topology: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publisher and subscriber exchanging events through a topic exchange
    Pubsub {
        /// Number of events to publish
        #[arg(short = 'n', long, default_value = "3")]
        count: u32,

        /// Pause between events in milliseconds
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Publication used to send events
        #[arg(long, default_value = "send_event")]
        publication: String,

        /// Subscription the subscriber consumes
        #[arg(long, default_value = "event_log_subscription")]
        subscription: String,
    },

    /// An initiator service calling a handler service over RPC
    Rpc {
        /// Number of requests to send
        #[arg(short = 'n', long, default_value = "3")]
        count: u32,

        /// Request timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// A scheduler service publishing delayed messages to a processor service
    Delayed {
        /// Number of messages to schedule
        #[arg(short = 'n', long, default_value = "2")]
        count: u32,

        /// Delay applied to each message in milliseconds
        #[arg(long, default_value = "1000")]
        delay_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommand_with_global_flags() {
        let cli = Cli::try_parse_from([
            "hoppity-demo",
            "delayed",
            "--delay-ms",
            "250",
            "--topology",
            "topology.yaml",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.topology, Some(PathBuf::from("topology.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Delayed {
                count: 2,
                delay_ms: 250
            }
        ));
    }
}
