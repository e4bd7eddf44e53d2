//! Machine wiring descriptors.
//!
//! The gateway image writes the board name to `/etc/kaonic/kaonic_machine`
//! at first boot; the daemon maps it onto hardcoded SPI and GPIO wiring
//! for the two frontends. An absent or unknown name falls back to the
//! proto-c wiring.

use std::fs;

use log::{info, warn};

use crate::gpio::GpioSpec;
use crate::spi::SpiConfig;

pub const MACHINE_CONFIG_PATH: &str = "/etc/kaonic/kaonic_machine";

const FALLBACK_MACHINE: &str = "stm32mp1-kaonic-protoc";

/// Wiring of one radio frontend.
#[derive(Debug, Clone)]
pub struct FrontendDescriptor {
    /// Frontend name used in logs ("rfa" / "rfb").
    pub name: &'static str,
    pub spi: SpiConfig,
    pub reset: GpioSpec,
    pub irq: GpioSpec,
    pub filter_v1: GpioSpec,
    pub filter_v2: GpioSpec,
    pub filter_24: GpioSpec,
}

/// A machine: its name plus the wiring of both frontends.
#[derive(Debug, Clone)]
pub struct MachineDescriptor {
    pub name: &'static str,
    pub frontends: Vec<FrontendDescriptor>,
}

const SPI_SPEED_HZ: u32 = 10_000_000;

fn spi_config(device: &str) -> SpiConfig {
    SpiConfig {
        device: device.into(),
        speed_hz: SPI_SPEED_HZ,
        mode: 0,
        bits_per_word: 8,
    }
}

fn frontend(
    name: &'static str,
    spi_dev: &str,
    gpio_chip: &str,
    reset: u32,
    irq: u32,
    filter_chip: &str,
    filter_base: u32,
) -> FrontendDescriptor {
    FrontendDescriptor {
        name,
        spi: spi_config(spi_dev),
        reset: GpioSpec::new(gpio_chip, reset),
        irq: GpioSpec::new(gpio_chip, irq),
        filter_v1: GpioSpec::new(filter_chip, filter_base),
        filter_v2: GpioSpec::new(filter_chip, filter_base + 1),
        filter_24: GpioSpec::new(filter_chip, filter_base + 2),
    }
}

fn descriptor(name: &str) -> MachineDescriptor {
    match name {
        "stm32mp1-kaonic-protoa" => MachineDescriptor {
            name: "stm32mp1-kaonic-protoa",
            frontends: vec![
                frontend("rfa", "/dev/spidev0.0", "gpiochip0", 5, 7, "gpiochip2", 0),
                frontend("rfb", "/dev/spidev1.0", "gpiochip0", 10, 12, "gpiochip2", 3),
            ],
        },
        "stm32mp1-kaonic-protob" => MachineDescriptor {
            name: "stm32mp1-kaonic-protob",
            frontends: vec![
                frontend("rfa", "/dev/spidev0.0", "gpiochip1", 2, 4, "gpiochip3", 0),
                frontend("rfb", "/dev/spidev1.0", "gpiochip1", 8, 9, "gpiochip3", 3),
            ],
        },
        // proto-c, the current board revision.
        _ => MachineDescriptor {
            name: "stm32mp1-kaonic-protoc",
            frontends: vec![
                frontend("rfa", "/dev/spidev0.0", "gpiochip5", 0, 1, "gpiochip6", 0),
                frontend("rfb", "/dev/spidev1.0", "gpiochip5", 4, 5, "gpiochip6", 3),
            ],
        },
    }
}

/// Resolves a machine descriptor from an explicit name.
pub fn machine_by_name(name: &str) -> MachineDescriptor {
    let known = matches!(
        name,
        "stm32mp1-kaonic-protoa" | "stm32mp1-kaonic-protob" | "stm32mp1-kaonic-protoc"
    );
    if !known {
        warn!(
            "machine: unknown machine '{}', falling back to {}",
            name, FALLBACK_MACHINE
        );
    }
    descriptor(name)
}

/// Reads the machine name from [`MACHINE_CONFIG_PATH`] and resolves it.
pub fn detect() -> MachineDescriptor {
    match fs::read_to_string(MACHINE_CONFIG_PATH) {
        Ok(contents) => {
            let name = contents.trim();
            info!("machine: configured as '{}'", name);
            machine_by_name(name)
        }
        Err(err) => {
            warn!(
                "machine: unable to read {}: {}, falling back to {}",
                MACHINE_CONFIG_PATH, err, FALLBACK_MACHINE
            );
            descriptor(FALLBACK_MACHINE)
        }
    }
}
