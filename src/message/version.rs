//! Handshake messages
//!
//! The fields present in a version message depend on the version value it
//! carries, not on any negotiated version.

use super::serial::{put_var_string, var_int_size, Reader, MAX_STRING_SIZE};
use super::{Message, NetworkAddress, ServiceFlags};
use crate::error::Result;
use bytes::{BufMut, BytesMut};

/// Protocol version levels that change message layout or behavior
pub mod level {
    /// Addresses, nonce and user agent
    pub const CANONICAL: u32 = 106;
    /// Start height
    pub const START_HEIGHT: u32 = 209;
    /// Lowest version this node accepts by default
    pub const MINIMUM: u32 = 31402;
    /// Ping carries a nonce and expects a pong
    pub const BIP31: u32 = 60001;
    /// Relay flag
    pub const BIP37: u32 = 70001;
    /// Highest version this node speaks
    pub const MAXIMUM: u32 = 70013;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub value: u32,
    pub services: ServiceFlags,
    pub timestamp: i64,
    pub address_receiver: NetworkAddress,
    pub address_sender: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
    pub relay: bool,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            value: 0,
            services: ServiceFlags::empty(),
            timestamp: 0,
            address_receiver: NetworkAddress::default(),
            address_sender: NetworkAddress::default(),
            nonce: 0,
            user_agent: String::new(),
            start_height: 0,
            relay: true,
        }
    }
}

impl Version {
    /// Encoded payload size for this message's own version value.
    pub fn serialized_size(&self) -> usize {
        let mut size = 4 + 8 + 8;
        if self.value >= level::CANONICAL {
            size += 2 * NetworkAddress::SIZE + 8;
            size += var_int_size(self.user_agent.len() as u64) + self.user_agent.len();
        }
        if self.value >= level::START_HEIGHT {
            size += 4;
        }
        if self.value >= level::BIP37 {
            size += 1;
        }
        size
    }
}

impl Message for Version {
    const COMMAND: &'static str = "version";

    fn encode(&self, _version: u32, dst: &mut BytesMut) {
        dst.reserve(self.serialized_size());
        dst.put_u32_le(self.value);
        dst.put_u64_le(self.services.bits());
        dst.put_i64_le(self.timestamp);

        if self.value >= level::CANONICAL {
            self.address_receiver.encode(dst, false);
            self.address_sender.encode(dst, false);
            dst.put_u64_le(self.nonce);
            put_var_string(dst, &self.user_agent);
        }
        if self.value >= level::START_HEIGHT {
            dst.put_u32_le(self.start_height);
        }
        if self.value >= level::BIP37 {
            dst.put_u8(u8::from(self.relay));
        }
    }

    fn decode(payload: &[u8], _version: u32) -> Result<Self> {
        let mut reader = Reader::new(payload, Self::COMMAND);
        let mut message = Version {
            value: reader.u32()?,
            services: ServiceFlags::from_bits_retain(reader.u64()?),
            timestamp: reader.i64()?,
            ..Version::default()
        };

        if message.value >= level::CANONICAL {
            message.address_receiver = NetworkAddress::decode(&mut reader, false)?;
            message.address_sender = NetworkAddress::decode(&mut reader, false)?;
            message.nonce = reader.u64()?;
            message.user_agent = reader.var_string(MAX_STRING_SIZE)?;
        }
        if message.value >= level::START_HEIGHT {
            message.start_height = reader.u32()?;
        }

        // Peers commonly omit the relay byte, which then defaults to true.
        if message.value >= level::BIP37 && !reader.is_exhausted() {
            message.relay = reader.bool()?;
        }

        Ok(message)
    }
}

/// Version acknowledgement, empty payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerAck;

impl Message for VerAck {
    const COMMAND: &'static str = "verack";

    fn encode(&self, _version: u32, _dst: &mut BytesMut) {}

    fn decode(_payload: &[u8], _version: u32) -> Result<Self> {
        Ok(VerAck)
    }
}
