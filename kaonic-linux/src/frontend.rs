//! Frontend bring-up: SPI + GPIO acquisition and transceiver probe.

use std::sync::Arc;

use log::info;

use kaonic::radio::Radio;
use kaonic::Result;
use kaonic_rf215::{FilterLines, Rf215Parts, Rf215Radio};

use crate::gpio::{GpioIrq, GpioOutput};
use crate::machine::FrontendDescriptor;
use crate::spi::SpiBus;

/// Opens every resource of one frontend and probes the transceiver.
///
/// Any failure aborts this frontend; resources acquired so far are
/// released on drop.
pub fn open_frontend(desc: &FrontendDescriptor) -> Result<Arc<dyn Radio>> {
    let bus = SpiBus::open(&desc.spi)?;

    // Reset is wired active-low.
    let reset = GpioOutput::request(&desc.reset, "kaonic-reset", true)?;
    let irq = GpioIrq::request(&desc.irq, "kaonic-irq")?;
    let filters = FilterLines {
        v1: Box::new(GpioOutput::request(&desc.filter_v1, "kaonic-filt-v1", false)?),
        v2: Box::new(GpioOutput::request(&desc.filter_v2, "kaonic-filt-v2", false)?),
        band24: Box::new(GpioOutput::request(&desc.filter_24, "kaonic-filt-24", false)?),
    };

    let radio = Rf215Radio::new(Rf215Parts {
        bus: Box::new(bus),
        reset: Box::new(reset),
        irq: Box::new(irq),
        filters,
    });
    radio.init()?;

    info!("frontend {}: transceiver ready", desc.name);
    Ok(Arc::new(radio))
}
