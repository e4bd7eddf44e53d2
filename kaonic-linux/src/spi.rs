//! spidev-backed register bus.
//!
//! Every transaction is two-phase under one chip select: a 16-bit
//! big-endian register address, then the data bytes. The AT86RF215 SPI
//! protocol encodes the access mode in the two address MSBs (`10` write,
//! `00` read), which this bus applies so the driver above stays
//! mode-agnostic.

use std::io;

use log::{error, info};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use kaonic::{Error, Result};
use kaonic_rf215::Bus;

/// Address-mode bit for register writes.
const MODE_WRITE: u16 = 0x8000;
/// Valid register address bits.
const ADDR_MASK: u16 = 0x3FFF;

#[derive(Debug, Clone)]
pub struct SpiConfig {
    pub device: String,
    pub speed_hz: u32,
    pub mode: u8,
    pub bits_per_word: u8,
}

impl Default for SpiConfig {
    fn default() -> Self {
        SpiConfig {
            device: "/dev/spidev0.0".into(),
            speed_hz: 1_000_000,
            mode: 0,
            bits_per_word: 8,
        }
    }
}

/// Exclusive handle on one spidev device. Closing is drop.
pub struct SpiBus {
    dev: Spidev,
}

impl SpiBus {
    /// Opens the device and applies mode, word width and clock.
    pub fn open(config: &SpiConfig) -> Result<Self> {
        let mut dev = Spidev::open(&config.device).map_err(|err| {
            error!("spi: unable to open {}: {}", config.device, err);
            Error::Fail
        })?;

        let options = SpidevOptions::new()
            .bits_per_word(config.bits_per_word)
            .max_speed_hz(config.speed_hz)
            .mode(SpiModeFlags::from_bits_truncate(config.mode as u32))
            .build();
        dev.configure(&options).map_err(|err| {
            error!("spi: unable to configure {}: {}", config.device, err);
            Error::Fail
        })?;

        info!(
            "spi: opened {} at {} Hz mode {}",
            config.device, config.speed_hz, config.mode
        );
        Ok(SpiBus { dev })
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let mut xfer = SpidevTransfer::read_write(tx, rx);
        self.dev.transfer(&mut xfer)
    }
}

impl Bus for SpiBus {
    fn read(&mut self, reg: u16, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            error!("spi: invalid buffer for register read");
            return Err(Error::InvalidArg);
        }

        let addr = (reg & ADDR_MASK).to_be_bytes();
        let mut tx = vec![0u8; buf.len() + 2];
        tx[..2].copy_from_slice(&addr);
        let mut rx = vec![0u8; buf.len() + 2];

        self.transfer(&tx, &mut rx).map_err(|err| {
            error!("spi: register read failed: {}", err);
            Error::Fail
        })?;

        buf.copy_from_slice(&rx[2..]);
        Ok(())
    }

    fn write(&mut self, reg: u16, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            error!("spi: invalid buffer for register write");
            return Err(Error::InvalidArg);
        }

        let addr = ((reg & ADDR_MASK) | MODE_WRITE).to_be_bytes();
        let mut tx = Vec::with_capacity(buf.len() + 2);
        tx.extend_from_slice(&addr);
        tx.extend_from_slice(buf);

        let mut rx = vec![0u8; tx.len()];
        self.transfer(&tx, &mut rx).map_err(|err| {
            error!("spi: register write failed: {}", err);
            Error::Fail
        })?;
        Ok(())
    }
}
