//! Primitive wire encodings
//!
//! Integers are little-endian except ports, which are big-endian. Lengths use
//! Bitcoin's compact size encoding.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Longest user agent accepted from a peer
pub const MAX_STRING_SIZE: u64 = 256;

/// Write a compact size integer.
pub fn put_var_int<B: BufMut>(dst: &mut B, value: u64) {
    match value {
        0..=0xfc => dst.put_u8(value as u8),
        0xfd..=0xffff => {
            dst.put_u8(0xfd);
            dst.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            dst.put_u8(0xfe);
            dst.put_u32_le(value as u32);
        }
        _ => {
            dst.put_u8(0xff);
            dst.put_u64_le(value);
        }
    }
}

/// Encoded length of a compact size integer.
pub fn var_int_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Write a length-prefixed string.
pub fn put_var_string<B: BufMut>(dst: &mut B, value: &str) {
    put_var_int(dst, value.len() as u64);
    dst.put_slice(value.as_bytes());
}

/// Bounds-checked payload reader. Every read failure reports the command
/// being decoded.
pub struct Reader<'a> {
    buf: &'a [u8],
    command: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], command: &'static str) -> Self {
        Self { buf, command }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }

    /// Error unless all bytes were consumed.
    pub fn finish(&self) -> Result<()> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    pub fn invalid(&self) -> Error {
        Error::BadMessage(self.command.to_string())
    }

    fn need(&self, size: usize) -> Result<()> {
        if self.buf.remaining() < size {
            Err(self.invalid())
        } else {
            Ok(())
        }
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn var_int(&mut self) -> Result<u64> {
        match self.u8()? {
            0xfd => {
                self.need(2)?;
                Ok(self.buf.get_u16_le() as u64)
            }
            0xfe => self.u32().map(u64::from),
            0xff => self.u64(),
            small => Ok(small as u64),
        }
    }

    pub fn var_string(&mut self, limit: u64) -> Result<String> {
        let size = self.var_int()?;
        if size > limit {
            return Err(self.invalid());
        }
        let size = size as usize;
        self.need(size)?;
        let text = String::from_utf8_lossy(&self.buf[..size]).into_owned();
        self.buf.advance(size);
        Ok(text)
    }
}
