//! Peer addressing
//!
//! [`Authority`] is a resolved IP and port, normalized so that an IPv4
//! address and its IPv4-mapped IPv6 form compare equal. [`Endpoint`] is an
//! unresolved `host:port` as found in configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Authority {
    ip: Ipv6Addr,
    port: u16,
}

impl Authority {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self { ip, port }
    }

    pub fn from_ipv6(ip: Ipv6Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The address in its natural family.
    pub fn ip(&self) -> IpAddr {
        match self.ip.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(self.ip),
        }
    }

    /// The address in wire form.
    pub fn ipv6(&self) -> Ipv6Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip(), self.port)
    }

    pub fn is_loopback(&self) -> bool {
        self.ip().is_loopback()
    }

    /// A nonzero port on a specified address.
    pub fn is_valid(&self) -> bool {
        self.port != 0 && !self.ip().is_unspecified()
    }
}

impl From<SocketAddr> for Authority {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

impl FromStr for Authority {
    type Err = Error;

    /// Accepts `ip:port`, `[ipv6]:port`, or a bare IP with port zero.
    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        let bare = text.trim_start_matches('[').trim_end_matches(']');
        bare.parse::<IpAddr>()
            .map(|ip| Self::new(ip, 0))
            .map_err(|_| Error::InvalidAddress(text.to_string()))
    }
}

impl Serialize for Authority {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Authority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Endpoint
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to one or more authorities.
    pub async fn resolve(&self) -> Result<Vec<Authority>> {
        let resolved = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::ResolveFailed(format!("{}: {}", self, e)))?;

        let authorities: Vec<Authority> = resolved.map(Authority::from).collect();
        if authorities.is_empty() {
            return Err(Error::ResolveFailed(self.to_string()));
        }
        Ok(authorities)
    }
}

impl From<Authority> for Endpoint {
    fn from(authority: Authority) -> Self {
        Self::new(authority.ip().to_string(), authority.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(text.to_string());
        let (host, port) = text.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_and_native_ipv4_equal() {
        let native: Authority = "192.168.1.5:8333".parse().unwrap();
        let mapped: Authority = "[::ffff:192.168.1.5]:8333".parse().unwrap();
        assert_eq!(native, mapped);
        assert_eq!(native.to_string(), "192.168.1.5:8333");
    }

    #[test]
    fn test_ipv6_display() {
        let authority: Authority = "[2001:db8::1]:18333".parse().unwrap();
        assert_eq!(authority.to_string(), "[2001:db8::1]:18333");
        assert_eq!(authority.to_string().parse::<Authority>().unwrap(), authority);
    }

    #[test]
    fn test_bare_ip_has_zero_port() {
        let authority: Authority = "10.1.2.3".parse().unwrap();
        assert_eq!(authority.port(), 0);
        assert!(!authority.is_valid());
        assert!("not an address".parse::<Authority>().is_err());
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint: Endpoint = "seed.example.org:8333".parse().unwrap();
        assert_eq!(endpoint.host(), "seed.example.org");
        assert_eq!(endpoint.port(), 8333);

        let endpoint: Endpoint = "[::1]:18444".parse().unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.to_string(), "[::1]:18444");

        assert!("no-port".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let endpoint = Endpoint::new("127.0.0.1", 8333);
        let resolved = endpoint.resolve().await.unwrap();
        assert_eq!(resolved, vec!["127.0.0.1:8333".parse::<Authority>().unwrap()]);
    }
}
