//! Address discovery messages

use super::serial::{put_var_int, Reader};
use super::{Message, NetworkAddress};
use crate::error::Result;
use bytes::BytesMut;

/// Most records accepted in, or sent as, one address message
pub const MAX_ADDRESSES: usize = 1000;

/// Request for known addresses, empty payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetAddress;

impl Message for GetAddress {
    const COMMAND: &'static str = "getaddr";

    fn encode(&self, _version: u32, _dst: &mut BytesMut) {}

    fn decode(_payload: &[u8], _version: u32) -> Result<Self> {
        Ok(GetAddress)
    }
}

/// List of timestamped peer addresses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    pub addresses: Vec<NetworkAddress>,
}

impl Message for Address {
    const COMMAND: &'static str = "addr";

    fn encode(&self, _version: u32, dst: &mut BytesMut) {
        let count = self.addresses.len().min(MAX_ADDRESSES);
        dst.reserve(9 + count * NetworkAddress::TIMESTAMPED_SIZE);
        put_var_int(dst, count as u64);
        for address in self.addresses.iter().take(count) {
            address.encode(dst, true);
        }
    }

    fn decode(payload: &[u8], _version: u32) -> Result<Self> {
        let mut reader = Reader::new(payload, Self::COMMAND);
        let count = reader.var_int()?;
        if count > MAX_ADDRESSES as u64 {
            return Err(reader.invalid());
        }

        let addresses = (0..count)
            .map(|_| NetworkAddress::decode(&mut reader, true))
            .collect::<Result<Vec<_>>>()?;
        reader.finish()?;

        Ok(Address { addresses })
    }
}
