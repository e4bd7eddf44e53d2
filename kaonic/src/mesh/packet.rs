//! Mesh air packet codec.
//!
//! Every packet starts with the configured magic pattern, a kind octet and
//! the sender id; data packets add fragmentation bookkeeping:
//!
//! ```notrust
//! +---------+------+---------+
//! | pattern | kind |   src   |                       beacon
//! | (u16)   | (u8) |  (u64)  |
//! +---------+------+---------+
//!
//! +---------+------+---------+-------+------------+------------+-------+=========+
//! | pattern | kind |   src   |  seq  | frag_index | frag_count |  len  | payload |
//! | (u16)   | (u8) |  (u64)  | (u16) |   (u16)    |   (u16)    | (u16) |         |
//! +---------+------+---------+-------+------------+------------+-------+=========+
//! ```
//!
//! All fields little-endian. A packet whose pattern does not match the
//! local configuration is noise and is dropped without further parsing.

use crate::bytes::{ByteReader, ByteWriter};
use crate::{Error, Result};

use super::NodeId;

/// Upper bound on a reassembled mesh frame.
pub const MAX_FRAME_LEN: usize = 10 * 1024;

/// Largest payload carried by a single data packet. Sized so a fragment
/// comfortably fits one send slot at the slowest configured PHY.
pub const MAX_FRAGMENT_PAYLOAD: usize = 1024;

/// Encoded size of the data packet header.
pub const DATA_HEADER_LEN: usize = 19;

/// Encoded size of a beacon.
pub const BEACON_LEN: usize = 11;

const KIND_BEACON: u8 = 1;
const KIND_DATA: u8 = 2;

/// One decoded air packet. Payloads borrow from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Packet<'a> {
    Beacon {
        src: NodeId,
    },
    Data {
        src: NodeId,
        /// Sequence number of the mesh frame this fragment belongs to.
        seq: u16,
        frag_index: u16,
        frag_count: u16,
        payload: &'a [u8],
    },
}

impl<'a> Packet<'a> {
    /// Encodes the packet into `buf`, returning the encoded length.
    pub fn encode(&self, pattern: u16, buf: &mut [u8]) -> Result<usize> {
        let mut w = ByteWriter::new(buf);
        w.write_u16_le(pattern)?;
        match self {
            Packet::Beacon { src } => {
                w.write_u8(KIND_BEACON)?;
                w.write_u64_le(src.raw())?;
            }
            Packet::Data {
                src,
                seq,
                frag_index,
                frag_count,
                payload,
            } => {
                if payload.len() > MAX_FRAGMENT_PAYLOAD {
                    return Err(Error::InvalidArg);
                }
                w.write_u8(KIND_DATA)?;
                w.write_u64_le(src.raw())?;
                w.write_u16_le(*seq)?;
                w.write_u16_le(*frag_index)?;
                w.write_u16_le(*frag_count)?;
                w.write_u16_le(payload.len() as u16)?;
                w.write_slice(payload)?;
            }
        }
        Ok(w.written())
    }

    /// Decodes one packet, checking the pattern first.
    pub fn decode(pattern: u16, data: &'a [u8]) -> Result<Packet<'a>> {
        let mut r = ByteReader::new(data);
        if r.read_u16_le()? != pattern {
            return Err(Error::InvalidArg);
        }
        match r.read_u8()? {
            KIND_BEACON => Ok(Packet::Beacon {
                src: NodeId::new(r.read_u64_le()?),
            }),
            KIND_DATA => {
                let src = NodeId::new(r.read_u64_le()?);
                let seq = r.read_u16_le()?;
                let frag_index = r.read_u16_le()?;
                let frag_count = r.read_u16_le()?;
                let len = usize::from(r.read_u16_le()?);
                if len > MAX_FRAGMENT_PAYLOAD {
                    return Err(Error::InvalidArg);
                }
                let payload = r.read_slice(len)?;
                Ok(Packet::Data {
                    src,
                    seq,
                    frag_index,
                    frag_count,
                    payload,
                })
            }
            _ => Err(Error::InvalidArg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATTERN: u16 = 0x77;

    #[test]
    fn beacon_round_trip() {
        let mut buf = [0u8; 64];
        let packet = Packet::Beacon {
            src: NodeId::new(0xAABB_CCDD_EEFF_0011),
        };
        let len = packet.encode(PATTERN, &mut buf).unwrap();
        assert_eq!(len, BEACON_LEN);
        assert_eq!(Packet::decode(PATTERN, &buf[..len]).unwrap(), packet);
    }

    #[test]
    fn data_round_trip() {
        let mut buf = [0u8; 256];
        let payload = [7u8; 100];
        let packet = Packet::Data {
            src: NodeId::new(42),
            seq: 3,
            frag_index: 1,
            frag_count: 4,
            payload: &payload,
        };
        let len = packet.encode(PATTERN, &mut buf).unwrap();
        assert_eq!(len, DATA_HEADER_LEN + payload.len());
        assert_eq!(Packet::decode(PATTERN, &buf[..len]).unwrap(), packet);
    }

    #[test]
    fn wrong_pattern_is_rejected() {
        let mut buf = [0u8; 64];
        let packet = Packet::Beacon { src: NodeId::new(1) };
        let len = packet.encode(PATTERN, &mut buf).unwrap();
        assert_eq!(
            Packet::decode(0x1234, &buf[..len]),
            Err(Error::InvalidArg)
        );
    }

    #[test]
    fn truncated_data_is_rejected() {
        let mut buf = [0u8; 256];
        let payload = [7u8; 100];
        let packet = Packet::Data {
            src: NodeId::new(42),
            seq: 0,
            frag_index: 0,
            frag_count: 1,
            payload: &payload,
        };
        let len = packet.encode(PATTERN, &mut buf).unwrap();
        assert!(Packet::decode(PATTERN, &buf[..len - 10]).is_err());
    }
}
