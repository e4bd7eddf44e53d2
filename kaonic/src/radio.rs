//! Radio abstraction: on-air frames, PHY configuration, and the driver
//! trait.
//!
//! A *radio frame* is the fixed-capacity unit exchanged with the
//! transceiver's baseband; the mesh MAC above adapts its variable-length
//! packets into these. The configuration model maps one-to-one onto the
//! AT86RF215 baseband: a radio is tuned with a frequency/channel pair and
//! one of two PHY variants (MR-OFDM or MR-FSK).

use std::time::Duration;

use crate::{Error, Result};

/// Capacity of an on-air frame in bytes.
pub const RADIO_FRAME_CAPACITY: usize = 2048;

/// A fixed-capacity on-air frame with an explicit length.
#[derive(Clone)]
pub struct RadioFrame {
    data: [u8; RADIO_FRAME_CAPACITY],
    len: usize,
}

impl RadioFrame {
    pub fn new() -> Self {
        RadioFrame {
            data: [0; RADIO_FRAME_CAPACITY],
            len: 0,
        }
    }

    /// Copies `data` into the frame. Fails with [`Error::InvalidArg`] if it
    /// exceeds [`RADIO_FRAME_CAPACITY`].
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > RADIO_FRAME_CAPACITY {
            return Err(Error::InvalidArg);
        }
        self.data[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(())
    }

    /// Marks `len` bytes of the backing buffer as valid.
    ///
    /// Used by drivers that fill [`RadioFrame::buffer_mut`] directly.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > RADIO_FRAME_CAPACITY {
            return Err(Error::InvalidArg);
        }
        self.len = len;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid part of the frame.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole backing buffer, for drivers filling the frame in place.
    pub fn buffer_mut(&mut self) -> &mut [u8; RADIO_FRAME_CAPACITY] {
        &mut self.data
    }
}

impl Default for RadioFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the two halves of the AT86RF215.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrxType {
    /// Sub-GHz transceiver.
    Rf09,
    /// 2.4 GHz transceiver.
    Rf24,
}

/// MR-OFDM configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OfdmConfig {
    /// Modulation-and-coding scheme, 0..=6.
    pub mcs: u8,
    /// OFDM option (bandwidth class), 0..=3.
    pub opt: u8,
}

/// MR-FSK symbol rate class.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FskSymbolRate {
    S50,
    S100,
    S150,
    S200,
    S300,
    S400,
}

impl FskSymbolRate {
    /// Symbol rate in kHz.
    pub fn khz(&self) -> u32 {
        match self {
            FskSymbolRate::S50 => 50,
            FskSymbolRate::S100 => 100,
            FskSymbolRate::S150 => 150,
            FskSymbolRate::S200 => 200,
            FskSymbolRate::S300 => 300,
            FskSymbolRate::S400 => 400,
        }
    }

    /// Register encoding of the rate class, 0..=5.
    pub fn index(&self) -> u8 {
        match self {
            FskSymbolRate::S50 => 0,
            FskSymbolRate::S100 => 1,
            FskSymbolRate::S150 => 2,
            FskSymbolRate::S200 => 3,
            FskSymbolRate::S300 => 4,
            FskSymbolRate::S400 => 5,
        }
    }

    /// Inverse of [`FskSymbolRate::index`].
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(FskSymbolRate::S50),
            1 => Ok(FskSymbolRate::S100),
            2 => Ok(FskSymbolRate::S150),
            3 => Ok(FskSymbolRate::S200),
            4 => Ok(FskSymbolRate::S300),
            5 => Ok(FskSymbolRate::S400),
            _ => Err(Error::InvalidArg),
        }
    }
}

/// FSK modulation order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FskModulation {
    Fsk2,
    Fsk4,
}

/// FSK forward error correction scheme.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FskFec {
    Nrnsc,
    Rsc,
}

/// MR-FSK configuration. Fields map directly onto the AT86RF215 baseband
/// FSK register file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FskConfig {
    pub srate: FskSymbolRate,
    /// Modulation index, register encoding 0..=7 (0.375..=2.0).
    pub midx: u8,
    /// Modulation index scale, 0..=3.
    pub midxs: u8,
    pub mord: FskModulation,
    /// Bandwidth-time product, 0..=3 (0.5..=2.0).
    pub bt: u8,
    /// Preamble length in octets.
    pub preamble_length: u16,
    /// Invert the preamble bit pattern.
    pub preamble_inverted: bool,
    /// Start-of-frame delimiter patterns.
    pub sfd0: u16,
    pub sfd1: u16,
    /// Selected SFD, 0 or 1.
    pub sfd: u8,
    pub fec_enabled: bool,
    pub fec_scheme: FskFec,
    /// Data whitening.
    pub dw: bool,
    /// Preemphasis filter enable and coefficients.
    pub preemphasis: bool,
    pub pe0: u8,
    pub pe1: u8,
    pub pe2: u8,
}

impl Default for FskConfig {
    fn default() -> Self {
        // Baseband reset defaults: 50 kHz 2-FSK, modulation index 1.0,
        // 8-octet preamble, IEEE 802.15.4 SFDs, no FEC.
        FskConfig {
            srate: FskSymbolRate::S50,
            midx: 3,
            midxs: 1,
            mord: FskModulation::Fsk2,
            bt: 1,
            preamble_length: 8,
            preamble_inverted: false,
            sfd0: 0x7209,
            sfd1: 0x72F6,
            sfd: 0,
            fec_enabled: false,
            fec_scheme: FskFec::Nrnsc,
            dw: true,
            preemphasis: false,
            pe0: 0,
            pe1: 0,
            pe2: 0,
        }
    }
}

/// PHY variant selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PhyConfig {
    Ofdm(OfdmConfig),
    Fsk(FskConfig),
}

/// Full radio configuration for one frontend.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Center frequency in kHz. Frequencies at or below 1 500 000 kHz
    /// select the sub-GHz transceiver, anything above the 2.4 GHz one.
    pub freq_khz: u32,
    /// Channel index within the configured spacing grid.
    pub channel: u16,
    /// Channel spacing in kHz.
    pub channel_spacing_khz: u32,
    /// TX power index, 0..=12.
    pub tx_power: u8,
    pub phy: PhyConfig,
}

/// Trait implemented by transceiver drivers.
///
/// All methods take `&self`; a driver serializes access internally with its
/// per-frontend mutex, which lets the same handle be shared between the
/// update thread (receive path) and application callers (configure,
/// transmit).
pub trait Radio: Send + Sync {
    /// Programs the PHY and the frequency synthesizer and selects the
    /// active sub-device.
    fn configure(&self, config: &RadioConfig) -> Result<()>;

    /// Transmits one frame. Blocks until the PHY reports completion.
    ///
    /// Fails with [`Error::PreconditionFailed`] before the first successful
    /// `configure`.
    fn transmit(&self, frame: &RadioFrame) -> Result<()>;

    /// Waits up to `timeout` for one received frame.
    ///
    /// Returns [`Error::Timeout`] when the window closes without a frame,
    /// and [`Error::PreconditionFailed`] before the first successful
    /// `configure`.
    fn receive(&self, frame: &mut RadioFrame, timeout: Duration) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_oversized_data() {
        let mut frame = RadioFrame::new();
        let data = vec![0u8; RADIO_FRAME_CAPACITY + 1];
        assert_eq!(frame.set_data(&data), Err(Error::InvalidArg));

        let data = vec![0xA5u8; RADIO_FRAME_CAPACITY];
        frame.set_data(&data).unwrap();
        assert_eq!(frame.len(), RADIO_FRAME_CAPACITY);
        assert_eq!(frame.as_slice(), &data[..]);
    }
}
