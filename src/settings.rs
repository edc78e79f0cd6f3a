//! Node configuration
//!
//! Every tunable of the networking engine lives here. Timeouts are stored as
//! whole seconds or minutes so the JSON file stays readable; the accessor
//! methods convert to [`Duration`].

use crate::error::{Error, Result};
use crate::message::{level, ServiceFlags};
use crate::network::{Authority, Endpoint};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mainnet message start bytes (f9 be b4 d9 on the wire)
pub const MAINNET_IDENTIFIER: u32 = 0xd9b4_bef9;

/// Testnet message start bytes (0b 11 09 07 on the wire)
pub const TESTNET_IDENTIFIER: u32 = 0x0709_110b;

/// Largest payload accepted from a peer (32 MiB)
pub const DEFAULT_MAXIMUM_PAYLOAD: usize = 32 * 1024 * 1024;

/// Networking engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker threads in the execution context
    pub threads: usize,
    /// Highest protocol version this node speaks
    pub protocol_maximum: u32,
    /// Lowest peer protocol version accepted
    pub protocol_minimum: u32,
    /// Services advertised in our version message
    pub services: ServiceFlags,
    /// Peers advertising any of these services are dropped
    pub invalid_services: ServiceFlags,
    /// Ask peers to relay transactions
    pub relay_transactions: bool,
    /// Network magic
    pub identifier: u32,
    /// Listening port, zero disables inbound connections
    pub inbound_port: u16,
    pub inbound_connections: usize,
    pub outbound_connections: usize,
    /// Reconnect attempts for manual peers, zero retries forever
    pub manual_attempt_limit: usize,
    /// Parallel connect attempts raced per outbound slot
    pub connect_batch_size: usize,
    pub connect_timeout_seconds: u64,
    pub channel_handshake_seconds: u64,
    pub channel_heartbeat_minutes: u64,
    pub channel_inactivity_minutes: u64,
    pub channel_expiration_minutes: u64,
    pub channel_germination_seconds: u64,
    /// Host pool size, zero disables the pool and seeding
    pub host_pool_capacity: usize,
    pub hosts_file: PathBuf,
    /// Publicly reachable address announced to peers
    pub self_address: Option<Authority>,
    /// Blocked addresses, a zero port blocks every port on the host
    pub blacklists: Vec<Authority>,
    /// Peers maintained by the manual session
    pub peers: Vec<Endpoint>,
    /// Seed nodes used to populate an empty host pool
    pub seeds: Vec<Endpoint>,
    pub user_agent: String,
    pub maximum_payload: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Settings {
    /// Bitcoin mainnet defaults
    pub fn mainnet() -> Self {
        Self {
            threads: 4,
            protocol_maximum: level::MAXIMUM,
            protocol_minimum: level::MINIMUM,
            services: ServiceFlags::empty(),
            invalid_services: ServiceFlags::from_bits_retain(176),
            relay_transactions: true,
            identifier: MAINNET_IDENTIFIER,
            inbound_port: 8333,
            inbound_connections: 32,
            outbound_connections: 8,
            manual_attempt_limit: 0,
            connect_batch_size: 5,
            connect_timeout_seconds: 5,
            channel_handshake_seconds: 30,
            channel_heartbeat_minutes: 5,
            channel_inactivity_minutes: 10,
            channel_expiration_minutes: 60,
            channel_germination_seconds: 30,
            host_pool_capacity: 1000,
            hosts_file: PathBuf::from("hosts.cache"),
            self_address: None,
            blacklists: Vec::new(),
            peers: Vec::new(),
            seeds: seeds(&[
                "seed.bitcoin.sipa.be:8333",
                "dnsseed.bluematt.me:8333",
                "dnsseed.bitcoin.dashjr.org:8333",
                "seed.bitcoinstats.com:8333",
                "seed.bitcoin.jonasschnelli.ch:8333",
                "seed.voskuil.org:8333",
            ]),
            user_agent: format!("/mini-network:{}/", env!("CARGO_PKG_VERSION")),
            maximum_payload: DEFAULT_MAXIMUM_PAYLOAD,
        }
    }

    /// Bitcoin testnet defaults
    pub fn testnet() -> Self {
        Self {
            identifier: TESTNET_IDENTIFIER,
            inbound_port: 18333,
            seeds: seeds(&[
                "testnet-seed.bitcoin.jonasschnelli.ch:18333",
                "seed.tbtc.petertodd.org:18333",
                "testnet-seed.bluematt.me:18333",
                "testnet-seed.bitcoin.schildbach.de:18333",
            ]),
            ..Self::mainnet()
        }
    }

    /// Load settings from a JSON file; missing fields take mainnet defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::FileSystem(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::FileSystem(format!("{}: {}", path.display(), e)))
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::FileSystem(e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn channel_handshake(&self) -> Duration {
        Duration::from_secs(self.channel_handshake_seconds)
    }

    pub fn channel_heartbeat(&self) -> Duration {
        Duration::from_secs(self.channel_heartbeat_minutes * 60)
    }

    pub fn channel_inactivity(&self) -> Duration {
        Duration::from_secs(self.channel_inactivity_minutes * 60)
    }

    pub fn channel_expiration(&self) -> Duration {
        Duration::from_secs(self.channel_expiration_minutes * 60)
    }

    pub fn channel_germination(&self) -> Duration {
        Duration::from_secs(self.channel_germination_seconds)
    }

    /// True if the authority matches a blacklist entry. An entry with a zero
    /// port matches the host on any port.
    pub fn blacklisted(&self, authority: &Authority) -> bool {
        self.blacklists.iter().any(|entry| {
            entry.ip() == authority.ip() && (entry.port() == 0 || entry.port() == authority.port())
        })
    }
}

fn seeds(hosts: &[&str]) -> Vec<Endpoint> {
    hosts.iter().filter_map(|host| host.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mainnet_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.identifier, MAINNET_IDENTIFIER);
        assert_eq!(settings.seeds.len(), 6);
        assert_eq!(settings.channel_heartbeat(), Duration::from_secs(300));
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_testnet_overrides() {
        let settings = Settings::testnet();
        assert_eq!(settings.identifier, TESTNET_IDENTIFIER);
        assert_eq!(settings.inbound_port, 18333);
        assert!(settings.seeds.iter().all(|seed| seed.port() == 18333));
    }

    #[test]
    fn test_blacklist_wildcard_port() {
        let mut settings = Settings::default();
        settings.blacklists = vec![
            "10.0.0.1:0".parse().unwrap(),
            "10.0.0.2:8333".parse().unwrap(),
        ];

        assert!(settings.blacklisted(&"10.0.0.1:1234".parse().unwrap()));
        assert!(settings.blacklisted(&"10.0.0.2:8333".parse().unwrap()));
        assert!(!settings.blacklisted(&"10.0.0.2:8334".parse().unwrap()));
        assert!(!settings.blacklisted(&"10.0.0.3:8333".parse().unwrap()));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "inbound_port": 0,
                "seeds": ["127.0.0.1:18444"],
                "self_address": "1.2.3.4:8333"
            }}"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.inbound_port, 0);
        assert_eq!(settings.seeds.len(), 1);
        assert_eq!(settings.seeds[0].port(), 18444);
        assert_eq!(settings.self_address, Some("1.2.3.4:8333".parse().unwrap()));
        assert_eq!(settings.outbound_connections, 8);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Settings::load(Path::new("/nonexistent/settings.json"));
        assert!(matches!(result, Err(Error::FileSystem(_))));
    }
}
