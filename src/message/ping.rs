//! Keep-alive messages, each carrying a single 8-byte nonce

use super::serial::Reader;
use super::Message;
use crate::error::Result;
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u64,
}

fn decode_nonce(payload: &[u8], command: &'static str) -> Result<u64> {
    let mut reader = Reader::new(payload, command);
    let nonce = reader.u64()?;
    reader.finish()?;
    Ok(nonce)
}

impl Message for Ping {
    const COMMAND: &'static str = "ping";

    fn encode(&self, _version: u32, dst: &mut BytesMut) {
        dst.put_u64_le(self.nonce);
    }

    fn decode(payload: &[u8], _version: u32) -> Result<Self> {
        decode_nonce(payload, Self::COMMAND).map(|nonce| Ping { nonce })
    }
}

impl Message for Pong {
    const COMMAND: &'static str = "pong";

    fn encode(&self, _version: u32, dst: &mut BytesMut) {
        dst.put_u64_le(self.nonce);
    }

    fn decode(payload: &[u8], _version: u32) -> Result<Self> {
        decode_nonce(payload, Self::COMMAND).map(|nonce| Pong { nonce })
    }
}
