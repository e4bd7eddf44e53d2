//! Packet codec shared by the serial link and the TCP RPC channel.
//!
//! Client-facing frames carry their payload as an array of `u32` words
//! plus an explicit byte length; [`WireFrame`] converts between that
//! representation and the core's byte frames by little-endian
//! re-interpretation, zero-padding the final partial word.
//!
//! A [`Packet`] is a single-byte type tag followed by the encoded message:
//! `0` unknown, `1` configuration, `2` transmit, `3` receive.

use log::warn;

use crate::bytes::{ByteReader, ByteWriter};
use crate::radio::{
    FskConfig, FskFec, FskModulation, FskSymbolRate, OfdmConfig, PhyConfig, RadioConfig,
};
use crate::{Error, Result};

const TAG_UNKNOWN: u8 = 0;
const TAG_CONFIG: u8 = 1;
const TAG_TRANSMIT: u8 = 2;
const TAG_RECEIVE: u8 = 3;

const PHY_TAG_OFDM: u8 = 0;
const PHY_TAG_FSK: u8 = 1;

/// A frame in client representation: `u32` words plus a byte length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireFrame {
    pub length: u32,
    pub data: Vec<u32>,
}

impl WireFrame {
    /// Packs raw bytes into words, zero-padding the final partial word.
    pub fn pack(bytes: &[u8]) -> Self {
        let mut data = Vec::with_capacity(bytes.len().div_ceil(4));
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            data.push(u32::from_le_bytes(word));
        }
        WireFrame {
            length: bytes.len() as u32,
            data,
        }
    }

    /// Recovers the raw bytes, truncated to the declared length.
    pub fn unpack(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 4);
        for word in &self.data {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(self.length as usize);
        bytes
    }

    fn encoded_len(&self) -> usize {
        8 + self.data.len() * 4
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> Result<()> {
        w.write_u32_le(self.length)?;
        w.write_u32_le(self.data.len() as u32)?;
        for word in &self.data {
            w.write_u32_le(*word)?;
        }
        Ok(())
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let length = r.read_u32_le()?;
        let words = r.read_u32_le()? as usize;
        if words * 4 > r.bytes_left() {
            return Err(Error::InvalidArg);
        }
        let mut data = Vec::with_capacity(words);
        for _ in 0..words {
            data.push(r.read_u32_le()?);
        }
        Ok(WireFrame { length, data })
    }
}

/// Radio configuration request from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationRequest {
    pub module: u8,
    pub freq_khz: u32,
    pub channel: u16,
    pub channel_spacing_khz: u32,
    pub tx_power: u8,
    pub phy: PhyConfig,
}

impl ConfigurationRequest {
    /// The core-side configuration this request describes.
    pub fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            freq_khz: self.freq_khz,
            channel: self.channel,
            channel_spacing_khz: self.channel_spacing_khz,
            tx_power: self.tx_power,
            phy: self.phy,
        }
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> Result<()> {
        w.write_u8(self.module)?;
        w.write_u32_le(self.freq_khz)?;
        w.write_u16_le(self.channel)?;
        w.write_u32_le(self.channel_spacing_khz)?;
        w.write_u8(self.tx_power)?;
        match &self.phy {
            PhyConfig::Ofdm(ofdm) => {
                w.write_u8(PHY_TAG_OFDM)?;
                w.write_u8(ofdm.mcs)?;
                w.write_u8(ofdm.opt)?;
            }
            PhyConfig::Fsk(fsk) => {
                w.write_u8(PHY_TAG_FSK)?;
                w.write_u8(fsk.srate.index())?;
                w.write_u8(fsk.midx)?;
                w.write_u8(fsk.midxs)?;
                w.write_u8(match fsk.mord {
                    FskModulation::Fsk2 => 0,
                    FskModulation::Fsk4 => 1,
                })?;
                w.write_u8(fsk.bt)?;
                w.write_u16_le(fsk.preamble_length)?;
                w.write_u8(fsk.preamble_inverted as u8)?;
                w.write_u16_le(fsk.sfd0)?;
                w.write_u16_le(fsk.sfd1)?;
                w.write_u8(fsk.sfd)?;
                w.write_u8(fsk.fec_enabled as u8)?;
                w.write_u8(match fsk.fec_scheme {
                    FskFec::Nrnsc => 0,
                    FskFec::Rsc => 1,
                })?;
                w.write_u8(fsk.dw as u8)?;
                w.write_u8(fsk.preemphasis as u8)?;
                w.write_u8(fsk.pe0)?;
                w.write_u8(fsk.pe1)?;
                w.write_u8(fsk.pe2)?;
            }
        }
        Ok(())
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let module = r.read_u8()?;
        let freq_khz = r.read_u32_le()?;
        let channel = r.read_u16_le()?;
        let channel_spacing_khz = r.read_u32_le()?;
        let tx_power = r.read_u8()?;
        let phy = match r.read_u8()? {
            PHY_TAG_OFDM => PhyConfig::Ofdm(OfdmConfig {
                mcs: r.read_u8()?,
                opt: r.read_u8()?,
            }),
            PHY_TAG_FSK => PhyConfig::Fsk(FskConfig {
                srate: FskSymbolRate::from_index(r.read_u8()?)?,
                midx: r.read_u8()?,
                midxs: r.read_u8()?,
                mord: match r.read_u8()? {
                    0 => FskModulation::Fsk2,
                    1 => FskModulation::Fsk4,
                    _ => return Err(Error::InvalidArg),
                },
                bt: r.read_u8()?,
                preamble_length: r.read_u16_le()?,
                preamble_inverted: r.read_u8()? != 0,
                sfd0: r.read_u16_le()?,
                sfd1: r.read_u16_le()?,
                sfd: r.read_u8()?,
                fec_enabled: r.read_u8()? != 0,
                fec_scheme: match r.read_u8()? {
                    0 => FskFec::Nrnsc,
                    1 => FskFec::Rsc,
                    _ => return Err(Error::InvalidArg),
                },
                dw: r.read_u8()? != 0,
                preemphasis: r.read_u8()? != 0,
                pe0: r.read_u8()?,
                pe1: r.read_u8()?,
                pe2: r.read_u8()?,
            }),
            _ => return Err(Error::InvalidArg),
        };
        Ok(ConfigurationRequest {
            module,
            freq_khz,
            channel,
            channel_spacing_khz,
            tx_power,
            phy,
        })
    }
}

/// Transmit request from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRequest {
    pub module: u8,
    pub frame: WireFrame,
}

/// A received mesh frame streamed back to a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveResponse {
    pub frame: WireFrame,
}

/// A tagged client packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Unparseable or unrecognized input.
    Unknown,
    Config(ConfigurationRequest),
    Transmit(TransmitRequest),
    Receive(ReceiveResponse),
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let body_len = match self {
            Packet::Unknown => 0,
            Packet::Config(_) => 64,
            Packet::Transmit(req) => 1 + req.frame.encoded_len(),
            Packet::Receive(resp) => resp.frame.encoded_len(),
        };

        let mut buf = vec![0u8; 1 + body_len];
        let mut w = ByteWriter::new(&mut buf);

        // The scratch buffer is sized for the message, so these writes
        // cannot fail.
        let result = match self {
            Packet::Unknown => w.write_u8(TAG_UNKNOWN),
            Packet::Config(req) => w.write_u8(TAG_CONFIG).and_then(|_| req.write(&mut w)),
            Packet::Transmit(req) => w.write_u8(TAG_TRANSMIT).and_then(|_| {
                w.write_u8(req.module)?;
                req.frame.write(&mut w)
            }),
            Packet::Receive(resp) => w.write_u8(TAG_RECEIVE).and_then(|_| resp.frame.write(&mut w)),
        };
        debug_assert!(result.is_ok());

        let written = w.written();
        buf.truncate(written);
        buf
    }

    /// Decodes one packet. Malformed input decodes to [`Packet::Unknown`],
    /// mirroring how the serial side treats undecodable frames.
    pub fn decode(data: &[u8]) -> Packet {
        match Self::try_decode(data) {
            Ok(packet) => packet,
            Err(_) => {
                warn!("wire: unable to parse packet of {} bytes", data.len());
                Packet::Unknown
            }
        }
    }

    fn try_decode(data: &[u8]) -> Result<Packet> {
        let mut r = ByteReader::new(data);
        match r.read_u8()? {
            TAG_CONFIG => Ok(Packet::Config(ConfigurationRequest::read(&mut r)?)),
            TAG_TRANSMIT => Ok(Packet::Transmit(TransmitRequest {
                module: r.read_u8()?,
                frame: WireFrame::read(&mut r)?,
            })),
            TAG_RECEIVE => Ok(Packet::Receive(ReceiveResponse {
                frame: WireFrame::read(&mut r)?,
            })),
            _ => Ok(Packet::Unknown),
        }
    }
}
