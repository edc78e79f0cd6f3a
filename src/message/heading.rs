//! Fixed 24-byte message heading
//!
//! ```text
//! magic(4 LE) | command(12, NUL padded) | payload size(4 LE) | checksum(4)
//! ```

use super::serial::Reader;
use crate::crypto::checksum;
use crate::error::{Error, Result};
use bytes::BufMut;

pub const HEADING_SIZE: usize = 24;
pub const COMMAND_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub magic: u32,
    pub command: String,
    pub payload_size: u32,
    pub checksum: u32,
}

impl Heading {
    /// Heading for `payload` under `command`.
    pub fn new(magic: u32, command: &str, payload: &[u8]) -> Self {
        Self {
            magic,
            command: command.to_string(),
            payload_size: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let mut command = [0u8; COMMAND_SIZE];
        let bytes = self.command.as_bytes();
        let size = bytes.len().min(COMMAND_SIZE);
        command[..size].copy_from_slice(&bytes[..size]);

        dst.put_u32_le(self.magic);
        dst.put_slice(&command);
        dst.put_u32_le(self.payload_size);
        dst.put_u32_le(self.checksum);
    }

    /// Parse the leading [`HEADING_SIZE`] bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(src, "heading");
        let magic = reader.u32()?;
        let command = parse_command(&reader.array::<COMMAND_SIZE>()?)?;
        let payload_size = reader.u32()?;
        let checksum = reader.u32()?;

        Ok(Self {
            magic,
            command,
            payload_size,
            checksum,
        })
    }

    /// True if `payload` matches the heading's checksum.
    pub fn verify(&self, payload: &[u8]) -> bool {
        checksum(payload) == self.checksum
    }
}

// Printable ASCII followed only by NUL padding.
fn parse_command(raw: &[u8; COMMAND_SIZE]) -> Result<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
    let valid = raw[..end].iter().all(|b| b.is_ascii_graphic())
        && raw[end..].iter().all(|&b| b == 0);
    if !valid {
        return Err(Error::BadStream(format!(
            "invalid command bytes {}",
            hex::encode(raw)
        )));
    }
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}
