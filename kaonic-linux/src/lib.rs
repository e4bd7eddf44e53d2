//! Linux platform bindings for the kaonic gateway.
//!
//! Everything the hardware-agnostic crates leave open is filled in here:
//! the spidev-backed register bus, gpiod-backed reset/IRQ/filter lines,
//! the per-machine wiring descriptors, the OTP-derived node id, and a
//! poll-driven tty port for the serial service.

pub mod frontend;
pub mod gpio;
pub mod machine;
pub mod nodeid;
pub mod serial_port;
pub mod spi;
