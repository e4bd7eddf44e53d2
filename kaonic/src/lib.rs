//! Communication core of the kaonic radio gateway.
//!
//! A gateway carries one or two independent radio frontends, each built
//! around one half of an AT86RF215 transceiver. This crate contains
//! everything between the transceiver driver and the application clients:
//!
//! * [`radio`] — the frame/configuration model and the [`radio::Radio`]
//!   trait that a transceiver driver implements.
//! * [`mesh`] — the beacon-based mesh MAC: fragmentation and reassembly,
//!   peer tracking, slotted transmission, and the per-frontend update
//!   thread that drives it all.
//! * [`hdlc`] and [`wire`] — the serial framing and the packet codec shared
//!   by the serial link and the TCP RPC channel.
//! * [`service`] — the module-indexed radio service and the RPC/serial
//!   adapters that application clients talk to.
//!
//! The crate is hardware-agnostic: it only sees the radio through the
//! [`radio::Radio`] trait, which is implemented by the `kaonic-rf215`
//! driver crate (and by in-memory fakes in the test suites).

pub mod bytes;
mod error;
pub mod hdlc;
pub mod mesh;
pub mod radio;
pub mod service;
pub mod time;
pub mod wire;

pub use self::error::{Error, Result};
