//! Peer address records

use super::serial::Reader;
use super::ServiceFlags;
use crate::error::Result;
use crate::network::Authority;
use bytes::BufMut;
use std::net::Ipv6Addr;

/// An address as carried on the wire. IPv4 addresses are stored IPv4-mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetworkAddress {
    /// Last-seen time, only encoded in address-list records
    pub timestamp: u32,
    pub services: ServiceFlags,
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetworkAddress {
    /// Encoded size inside a version message
    pub const SIZE: usize = 26;
    /// Encoded size inside an address list
    pub const TIMESTAMPED_SIZE: usize = 30;

    pub fn new(authority: &Authority, services: ServiceFlags, timestamp: u32) -> Self {
        Self {
            timestamp,
            services,
            ip: authority.ipv6().octets(),
            port: authority.port(),
        }
    }

    pub fn authority(&self) -> Authority {
        Authority::from_ipv6(Ipv6Addr::from(self.ip), self.port)
    }

    /// Usable as a connection target.
    pub fn is_valid(&self) -> bool {
        self.authority().is_valid()
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B, with_timestamp: bool) {
        if with_timestamp {
            dst.put_u32_le(self.timestamp);
        }
        dst.put_u64_le(self.services.bits());
        dst.put_slice(&self.ip);
        dst.put_u16(self.port);
    }

    pub fn decode(reader: &mut Reader<'_>, with_timestamp: bool) -> Result<Self> {
        let timestamp = if with_timestamp { reader.u32()? } else { 0 };
        Ok(Self {
            timestamp,
            services: ServiceFlags::from_bits_retain(reader.u64()?),
            ip: reader.array::<16>()?,
            port: reader.u16_be()?,
        })
    }
}
