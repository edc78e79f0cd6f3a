//! Message framing codec
//!
//! Splits the byte stream into heading-delimited frames. Magic, size and
//! checksum are validated here; any failure is fatal to the stream. Payload
//! decoding happens later, per command.

use super::heading::{Heading, HEADING_SIZE};
use super::Message;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// A framed message: validated heading plus checksum-verified payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub heading: Heading,
    pub payload: Bytes,
}

impl Frame {
    /// Serialize `message` for the network identified by `magic`.
    pub fn from_message<M: Message>(magic: u32, message: &M, version: u32) -> Self {
        let mut payload = BytesMut::new();
        message.encode(version, &mut payload);
        let heading = Heading::new(magic, M::COMMAND, &payload);
        Self {
            heading,
            payload: payload.freeze(),
        }
    }

    pub fn command(&self) -> &str {
        &self.heading.command
    }
}

/// Codec bound to one network magic and a payload ceiling.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    magic: u32,
    maximum_payload: usize,
}

impl FrameCodec {
    pub fn new(magic: u32, maximum_payload: usize) -> Self {
        Self {
            magic,
            maximum_payload,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least a heading
        if src.len() < HEADING_SIZE {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if magic != self.magic {
            return Err(Error::InvalidMagic(hex::encode(&src[..4])));
        }

        let heading = Heading::decode(&src[..HEADING_SIZE])?;
        let size = heading.payload_size as usize;
        if size > self.maximum_payload {
            return Err(Error::OversizedPayload {
                size,
                maximum: self.maximum_payload,
            });
        }

        // Wait for the full payload
        if src.len() < HEADING_SIZE + size {
            src.reserve(HEADING_SIZE + size - src.len());
            return Ok(None);
        }

        src.advance(HEADING_SIZE);
        let payload = src.split_to(size).freeze();
        if !heading.verify(&payload) {
            return Err(Error::InvalidChecksum);
        }

        Ok(Some(Frame { heading, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(HEADING_SIZE + item.payload.len());
        item.heading.encode(dst);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
