//! Mini-Network node
//!
//! A command-line front end that runs the peer-to-peer engine.

use clap::{Args, Parser, Subcommand};
use mini_network::cli::{self, Overrides};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "node")]
#[command(author = "Darshan")]
#[command(version)]
#[command(about = "Peer-to-peer node for a Bitcoin-style network", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields take defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use testnet defaults when no configuration file is given
    #[arg(long, global = true)]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and run until Ctrl+C
    Start(StartArgs),

    /// Print the effective configuration as JSON
    Settings(StartArgs),
}

#[derive(Args, Clone, Default)]
struct StartArgs {
    /// Port to accept peers on (0 disables inbound)
    #[arg(short, long)]
    port: Option<u16>,

    /// Worker threads
    #[arg(short, long)]
    threads: Option<usize>,

    /// Seed endpoints (comma-separated host:port)
    #[arg(long)]
    seeds: Option<String>,

    /// Peers to keep connected (comma-separated host:port)
    #[arg(long)]
    peers: Option<String>,

    /// Host pool file
    #[arg(long)]
    hosts_file: Option<PathBuf>,

    /// Outbound connection target
    #[arg(long)]
    outbound: Option<usize>,

    /// Inbound connection limit
    #[arg(long)]
    inbound: Option<usize>,
}

impl From<StartArgs> for Overrides {
    fn from(args: StartArgs) -> Self {
        Self {
            port: args.port,
            threads: args.threads,
            seeds: args.seeds.into_iter().collect(),
            peers: args.peers.into_iter().collect(),
            hosts_file: args.hosts_file,
            outbound: args.outbound,
            inbound: args.inbound,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            let settings = cli::load_settings(cli.config.as_ref(), cli.testnet, &args.into())?;
            cli::cmd_start(settings)?;
        }
        Commands::Settings(args) => {
            let settings = cli::load_settings(cli.config.as_ref(), cli.testnet, &args.into())?;
            cli::cmd_settings(&settings)?;
        }
    }

    Ok(())
}
