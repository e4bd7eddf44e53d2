//! HDLC-style framing for the serial link.
//!
//! Frames are delimited by [`FLAG`] bytes; flag and escape bytes inside
//! the payload are escaped with [`ESC`] and XOR-[`ESC_MASK`]. A CRC-32 of
//! the pre-escape payload travels after the closing flag.

use crc::{Crc, CRC_32_ISO_HDLC};

pub const FLAG: u8 = 0x7E;
pub const ESC: u8 = 0x7D;
pub const ESC_MASK: u8 = 0x20;

/// Streaming deframer cap; anything longer is a desynced stream.
pub const MAX_HDLC_SIZE: usize = 10 * 1024;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 of a pre-escape payload.
pub fn crc32(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

/// Escapes `payload` and wraps it in opening and closing flags.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(payload.len() + 2);
    output.push(FLAG);

    for &byte in payload {
        match byte {
            ESC | FLAG => {
                output.push(ESC);
                output.push(byte ^ ESC_MASK);
            }
            _ => output.push(byte),
        }
    }

    output.push(FLAG);
    output
}

/// Recovers the payload of the first complete frame in `data`.
///
/// Bytes outside the flag pair are ignored; an unterminated frame yields
/// whatever payload was seen, which decodes as garbage downstream.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len());
    let mut in_frame = false;
    let mut escaped = false;

    for &byte in data {
        if !in_frame {
            if byte == FLAG {
                in_frame = true;
            }
            continue;
        }

        if byte == FLAG {
            // An empty flag pair is a shared frame boundary, not a frame.
            if output.is_empty() && !escaped {
                continue;
            }
            break;
        }

        if byte == ESC {
            escaped = true;
            continue;
        }

        output.push(if escaped { byte ^ ESC_MASK } else { byte });
        escaped = false;
    }

    output
}

/// Escapes `payload` and appends the CRC-32 of the pre-escape bytes in
/// little-endian after the closing flag; the complete serial TX unit.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut output = escape(payload);
    output.extend_from_slice(&crc32(payload).to_le_bytes());
    output
}

/// Incremental deframer fed one byte at a time.
///
/// Returns the raw escaped frame, flags included, once one is complete;
/// the caller runs [`unescape`] and verifies the CRC that follows on the
/// stream. Frames growing past `max_size` reset the state.
pub struct HdlcProcessor {
    buf: Vec<u8>,
    in_frame: bool,
    max_size: usize,
}

impl HdlcProcessor {
    pub fn new(max_size: usize) -> Self {
        HdlcProcessor {
            buf: Vec::new(),
            in_frame: false,
            max_size,
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if !self.in_frame {
            if byte == FLAG {
                self.in_frame = true;
                self.buf.clear();
                self.buf.push(FLAG);
            }
            return None;
        }

        if self.buf.len() >= self.max_size {
            self.in_frame = false;
            self.buf.clear();
            return None;
        }

        self.buf.push(byte);
        if byte == FLAG {
            // Back-to-back flags share a boundary; stay open on an empty
            // frame.
            if self.buf.len() == 2 {
                self.buf.truncate(1);
                return None;
            }
            self.in_frame = false;
            return Some(std::mem::take(&mut self.buf));
        }

        None
    }
}
