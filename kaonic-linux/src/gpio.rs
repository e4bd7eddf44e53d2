//! gpiod-backed reset, filter-select and interrupt lines.

use std::os::fd::AsRawFd;
use std::time::Duration;

use gpiod::{Bias, Chip, EdgeDetect, Options};
use log::error;

use kaonic::{Error, Result};
use kaonic_rf215::{EventLine, OutputLine};

/// One GPIO line by chip name and offset.
#[derive(Debug, Clone)]
pub struct GpioSpec {
    pub chip: String,
    pub line: u32,
}

impl GpioSpec {
    pub fn new(chip: &str, line: u32) -> Self {
        GpioSpec {
            chip: chip.into(),
            line,
        }
    }
}

fn open_chip(spec: &GpioSpec) -> Result<Chip> {
    Chip::new(&spec.chip).map_err(|err| {
        error!("gpio: unable to open {}: {}", spec.chip, err);
        Error::Fail
    })
}

/// A requested output line. `active` is logical; wiring polarity is fixed
/// at request time.
pub struct GpioOutput {
    lines: gpiod::Lines<gpiod::Output>,
    active_low: bool,
}

impl GpioOutput {
    /// Requests `spec` as an output, initially inactive.
    pub fn request(spec: &GpioSpec, consumer: &str, active_low: bool) -> Result<Self> {
        let chip = open_chip(spec)?;
        let options = Options::output([spec.line])
            .values([active_low])
            .consumer(consumer);
        let lines = chip.request_lines(options).map_err(|err| {
            error!(
                "gpio: unable to request output {}:{}: {}",
                spec.chip, spec.line, err
            );
            Error::Fail
        })?;
        Ok(GpioOutput { lines, active_low })
    }
}

impl OutputLine for GpioOutput {
    fn set(&mut self, active: bool) -> Result<()> {
        self.lines
            .set_values([active != self.active_low])
            .map_err(|err| {
                error!("gpio: unable to drive output: {}", err);
                Error::Fail
            })
    }
}

/// Rising-edge interrupt input with pull-down bias.
pub struct GpioIrq {
    lines: gpiod::Lines<gpiod::Input>,
}

impl GpioIrq {
    pub fn request(spec: &GpioSpec, consumer: &str) -> Result<Self> {
        let chip = open_chip(spec)?;
        let options = Options::input([spec.line])
            .edge(EdgeDetect::Rising)
            .bias(Bias::PullDown)
            .consumer(consumer);
        let lines = chip.request_lines(options).map_err(|err| {
            error!(
                "gpio: unable to request irq {}:{}: {}",
                spec.chip, spec.line, err
            );
            Error::Fail
        })?;
        Ok(GpioIrq { lines })
    }
}

impl EventLine for GpioIrq {
    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.lines.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        // SAFETY: pollfd points at a valid descriptor owned by the line
        // request for the duration of the call.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        match ready {
            0 => Ok(false),
            n if n > 0 => {
                // Drain the event so the next wait blocks again.
                self.lines.read_event().map_err(|err| {
                    error!("gpio: unable to read edge event: {}", err);
                    Error::Fail
                })?;
                Ok(true)
            }
            _ => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                error!("gpio: poll failed: {}", err);
                Err(Error::Fail)
            }
        }
    }
}
