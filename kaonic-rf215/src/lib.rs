//! AT86RF215 transceiver driver.
//!
//! The AT86RF215 is a dual-band sub-GHz / 2.4 GHz transceiver: two radio
//! frontends (`RF09`, `RF24`) share one SPI register interface and two
//! baseband cores (`BBC0`, `BBC1`). This crate programs the chip and
//! implements [`kaonic::radio::Radio`] on top of three small hardware
//! seams — a register [`Bus`], [`OutputLine`]s for reset and filter
//! selects, and an [`EventLine`] for the interrupt pin — so the chip
//! logic runs unchanged against spidev/gpiod on the gateway and against
//! mocks in the test suite.

mod driver;
pub mod phy;
pub mod regs;

pub use self::driver::{Bus, EventLine, FilterLines, OutputLine, Rf215Parts, Rf215Radio};
