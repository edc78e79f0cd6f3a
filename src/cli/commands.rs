//! CLI commands for the node
//!
//! Implements the command handlers behind the `node` binary.

use crate::concurrency::Threadpool;
use crate::network::{Endpoint, P2p};
use crate::settings::Settings;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Command line overrides applied on top of the loaded settings
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub port: Option<u16>,
    pub threads: Option<usize>,
    pub seeds: Vec<String>,
    pub peers: Vec<String>,
    pub hosts_file: Option<PathBuf>,
    pub outbound: Option<usize>,
    pub inbound: Option<usize>,
}

/// Load settings from `config` (or defaults) and apply `overrides`.
pub fn load_settings(
    config: Option<&PathBuf>,
    testnet: bool,
    overrides: &Overrides,
) -> CliResult<Settings> {
    let mut settings = match config {
        Some(path) => Settings::load(path)?,
        None if testnet => Settings::testnet(),
        None => Settings::mainnet(),
    };

    if let Some(port) = overrides.port {
        settings.inbound_port = port;
    }
    if let Some(threads) = overrides.threads {
        settings.threads = threads;
    }
    if !overrides.seeds.is_empty() {
        settings.seeds = parse_endpoints(&overrides.seeds)?;
    }
    if !overrides.peers.is_empty() {
        settings.peers = parse_endpoints(&overrides.peers)?;
    }
    if let Some(hosts_file) = &overrides.hosts_file {
        settings.hosts_file = hosts_file.clone();
    }
    if let Some(outbound) = overrides.outbound {
        settings.outbound_connections = outbound;
    }
    if let Some(inbound) = overrides.inbound {
        settings.inbound_connections = inbound;
    }

    Ok(settings)
}

fn parse_endpoints(values: &[String]) -> CliResult<Vec<Endpoint>> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<Endpoint>()
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        })
        .collect()
}

/// Print the effective configuration as JSON
pub fn cmd_settings(settings: &Settings) -> CliResult<()> {
    println!("{}", settings.to_json()?);
    Ok(())
}

/// Run the node until Ctrl+C
pub fn cmd_start(settings: Settings) -> CliResult<()> {
    let pool = Threadpool::new(settings.threads)?;
    println!(
        "🌐 Starting P2P node on port {} with {} threads...",
        settings.inbound_port,
        pool.size()
    );

    let result = pool.block_on(async {
        let p2p = P2p::new(settings, pool.context());

        if let Err(e) = p2p.start().await {
            log::error!("Network start failed: {}", e);
            let _ = p2p.stop();
            return Err(e);
        }
        if let Err(e) = p2p.run().await {
            log::error!("Network run failed: {}", e);
            let _ = p2p.stop();
            return Err(e);
        }

        println!(
            "✅ Node running: {} known addresses, press Ctrl+C to stop",
            p2p.address_count()
        );
        let _ = tokio::signal::ctrl_c().await;

        println!("\n📴 Shutting down node...");
        log::info!("{} channels connected at shutdown", p2p.connected_count());
        p2p.stop()
    });

    pool.shutdown(Duration::from_secs(5));
    result?;
    println!("👋 Node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let overrides = Overrides {
            port: Some(18444),
            threads: Some(2),
            seeds: vec!["a.example:8333, b.example:8333".into()],
            outbound: Some(3),
            ..Overrides::default()
        };
        let settings = load_settings(None, false, &overrides).unwrap();
        assert_eq!(settings.inbound_port, 18444);
        assert_eq!(settings.threads, 2);
        assert_eq!(settings.seeds.len(), 2);
        assert_eq!(settings.seeds[1].host(), "b.example");
        assert_eq!(settings.outbound_connections, 3);
        assert_eq!(settings.inbound_connections, 32);
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let overrides = Overrides {
            peers: vec!["no-port".into()],
            ..Overrides::default()
        };
        assert!(load_settings(None, false, &overrides).is_err());
    }

    #[test]
    fn test_testnet_preset() {
        let settings = load_settings(None, true, &Overrides::default()).unwrap();
        assert_eq!(settings.inbound_port, 18333);
    }
}
