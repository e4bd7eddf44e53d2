//! Utilities for decoding from and encoding into bytes.
//!
//! [`ByteWriter`] and [`ByteReader`] wrap a `&mut [u8]` or `&[u8]` and keep
//! track of the current position; everything that crosses a wire boundary
//! (mesh air packets, serial packets, RPC packets) goes through them. All
//! multi-byte fields are little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

/// Wrapper around a mutable byte slice that tracks the write position.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    /// Creates a writer that will fill `buf` from the start.
    pub fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter { buf, pos: 0 }
    }

    /// Number of bytes that can still be written.
    pub fn space_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        if self.space_left() < len {
            return Err(Error::InvalidArg);
        }
        let chunk = &mut self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(chunk)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        LittleEndian::write_u16(self.reserve(2)?, value);
        Ok(())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        LittleEndian::write_u32(self.reserve(4)?, value);
        Ok(())
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<()> {
        LittleEndian::write_u64(self.reserve(8)?, value);
        Ok(())
    }

    pub fn write_slice(&mut self, data: &[u8]) -> Result<()> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }
}

/// Wrapper around a byte slice that tracks the read position.
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf }
    }

    /// Number of bytes that have not been read yet.
    pub fn bytes_left(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(Error::InvalidArg);
        }
        let (chunk, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(chunk)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Reads `len` bytes as a sub-slice of the input.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Reads all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_and_reader_round_trip() {
        let mut buf = [0u8; 32];
        let mut w = ByteWriter::new(&mut buf);
        w.write_u8(0xAB).unwrap();
        w.write_u16_le(0x1234).unwrap();
        w.write_u32_le(0xDEAD_BEEF).unwrap();
        w.write_u64_le(0x0102_0304_0506_0708).unwrap();
        w.write_slice(&[1, 2, 3]).unwrap();
        let written = w.written();

        let mut r = ByteReader::new(&buf[..written]);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16_le().unwrap(), 0x1234);
        assert_eq!(r.read_u32_le().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_u64_le().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.read_slice(3).unwrap(), &[1, 2, 3]);
        assert!(r.is_empty());
    }

    #[test]
    fn writer_rejects_overflow() {
        let mut buf = [0u8; 2];
        let mut w = ByteWriter::new(&mut buf);
        assert_eq!(w.write_u32_le(1), Err(Error::InvalidArg));
    }

    #[test]
    fn reader_rejects_underrun() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(r.read_u32_le(), Err(Error::InvalidArg));
    }
}
