//! Byte-level seam between the MAC and a radio driver.

use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::radio::{Radio, RadioFrame, RADIO_FRAME_CAPACITY};
use crate::{Error, Result};

/// The MAC's view of the medium: send one air packet, poll for one.
///
/// Errors on either side are treated as transient by the MAC; it retries
/// on the next update.
pub trait NetworkInterface: Send {
    /// Transmits one encoded air packet.
    fn transmit(&mut self, data: &[u8]) -> Result<()>;

    /// Polls for one air packet, copying it into `buf`.
    ///
    /// Returns the packet length, [`Error::Timeout`] when the poll window
    /// closed empty, or [`Error::Fail`] when the packet did not fit `buf`.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// The MAC's cooperative yield granularity: how long one RX poll may block
/// the update thread.
const RX_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Adapts a [`Radio`] to [`NetworkInterface`].
///
/// Holds its own reusable frames so several frontends can run
/// concurrently without sharing buffers.
pub struct RadioNetworkInterface {
    radio: Arc<dyn Radio>,
    tx_frame: RadioFrame,
    rx_frame: RadioFrame,
}

impl RadioNetworkInterface {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        RadioNetworkInterface {
            radio,
            tx_frame: RadioFrame::new(),
            rx_frame: RadioFrame::new(),
        }
    }
}

impl NetworkInterface for RadioNetworkInterface {
    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > RADIO_FRAME_CAPACITY {
            error!(
                "radio interface: unable to transmit, max frame size is {}",
                RADIO_FRAME_CAPACITY
            );
            return Err(Error::InvalidArg);
        }

        self.tx_frame.set_data(data)?;
        self.radio.transmit(&self.tx_frame)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.radio.receive(&mut self.rx_frame, RX_POLL_TIMEOUT)?;

        let len = self.rx_frame.len();
        if len > buf.len() {
            return Err(Error::Fail);
        }

        buf[..len].copy_from_slice(self.rx_frame.as_slice());
        Ok(len)
    }
}
