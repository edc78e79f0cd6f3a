//! Bitcoin wire protocol messages
//!
//! Only the messages the networking engine itself speaks are defined here:
//! the version handshake, ping/pong keep-alives and address discovery.

pub mod address;
pub mod codec;
pub mod heading;
pub mod network_address;
pub mod ping;
pub mod serial;
pub mod version;

pub use address::{Address, GetAddress, MAX_ADDRESSES};
pub use codec::{Frame, FrameCodec};
pub use heading::{Heading, COMMAND_SIZE, HEADING_SIZE};
pub use network_address::NetworkAddress;
pub use ping::{Ping, Pong};
pub use version::{level, VerAck, Version};

use crate::error::Result;
use bitflags::bitflags;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Services a node advertises in its version message
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ServiceFlags: u64 {
        /// Full block chain
        const NETWORK = 1;
        const GETUTXO = 1 << 1;
        const BLOOM = 1 << 2;
        const WITNESS = 1 << 3;
        /// Recent blocks only
        const NETWORK_LIMITED = 1 << 10;
    }
}

/// A payload type that can be carried in a frame.
pub trait Message: Sized + Send + Sync + 'static {
    /// Command name in the heading
    const COMMAND: &'static str;

    fn encode(&self, version: u32, dst: &mut BytesMut);

    fn decode(payload: &[u8], version: u32) -> Result<Self>;
}
