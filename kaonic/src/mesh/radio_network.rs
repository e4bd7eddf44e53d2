//! Per-frontend network: one radio, one MAC, one update thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::radio::{Radio, RadioConfig};
use crate::{Error, Result};

use super::network::MeshMac;
use super::{Frame, Stats};

/// Poll cadence of [`RadioNetwork::transmit`] while the MAC drains a
/// previous payload.
const TX_FREE_POLL: Duration = Duration::from_millis(50);

/// Yield between MAC updates. Keeps the update thread off a busy spin
/// while staying well below the MAC's 1 ms receive poll.
const UPDATE_YIELD: Duration = Duration::from_micros(100);

/// Cadence of the statistics report on the update thread.
const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Owns one frontend: the transceiver, the MAC driving it, and the update
/// thread that keeps the MAC ticking.
///
/// The MAC sits behind a mutex shared with the update thread; `transmit`
/// and `stats` take the same lock, which serializes every path that can
/// reach the transceiver.
pub struct RadioNetwork {
    radio: Arc<dyn Radio>,
    mac: Arc<Mutex<dyn MeshMac>>,
    running: Arc<AtomicBool>,
    update_thread: Option<JoinHandle<()>>,
}

impl RadioNetwork {
    pub fn new(radio: Arc<dyn Radio>, mac: Arc<Mutex<dyn MeshMac>>) -> Self {
        RadioNetwork {
            radio,
            mac,
            running: Arc::new(AtomicBool::new(false)),
            update_thread: None,
        }
    }

    /// Launches the update thread.
    ///
    /// Fails with [`Error::PreconditionFailed`] if the frontend is already
    /// running.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::PreconditionFailed);
        }

        self.running.store(true, Ordering::SeqCst);

        let mac = self.mac.clone();
        let running = self.running.clone();
        self.update_thread = Some(thread::spawn(move || {
            info!("radio network: update thread started");
            let mut last_report = Instant::now();

            while running.load(Ordering::SeqCst) {
                let Ok(mut mac) = mac.lock() else {
                    error!("radio network: mac mutex poisoned, stopping updates");
                    break;
                };
                mac.update();

                if last_report.elapsed() >= STATS_REPORT_INTERVAL {
                    let stats = mac.stats();
                    debug!(
                        "radio network: tx {} B/s rx {} B/s, {} frames out {} frames in",
                        stats.tx_speed, stats.rx_speed, stats.tx_counter, stats.rx_counter
                    );
                    last_report = Instant::now();
                }
                drop(mac);

                thread::sleep(UPDATE_YIELD);
            }
            info!("radio network: update thread stopped");
        }));

        Ok(())
    }

    /// Stops and joins the update thread.
    ///
    /// Fails with [`Error::PreconditionFailed`] if the frontend is not
    /// running.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::PreconditionFailed);
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.update_thread.take() {
            if handle.join().is_err() {
                error!("radio network: update thread panicked");
                return Err(Error::Fail);
            }
        }

        Ok(())
    }

    /// Reconfigures the transceiver. Safe to call while running; the
    /// driver's internal mutex serializes against the update thread.
    pub fn configure(&self, config: &RadioConfig) -> Result<()> {
        self.radio.configure(config)
    }

    /// Queues one mesh frame, waiting for the MAC's TX queue to free up.
    ///
    /// Blocks in 50 ms polls while a previous payload drains. Returns
    /// [`Error::NotReady`] only when the MAC itself refuses the payload
    /// after reporting a free queue.
    pub fn transmit(&self, frame: &Frame) -> Result<()> {
        loop {
            {
                let Ok(mut mac) = self.mac.lock() else {
                    return Err(Error::Fail);
                };
                if mac.is_tx_free() {
                    return mac.send(&frame.buffer);
                }
            }
            thread::sleep(TX_FREE_POLL);
        }
    }

    pub fn stats(&self) -> Result<Stats> {
        let Ok(mac) = self.mac.lock() else {
            return Err(Error::Fail);
        };
        Ok(mac.stats())
    }
}

impl Drop for RadioNetwork {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.stop();
        }
    }
}
