//! Driver state machine: init/probe, PHY programming, frame TX/RX.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace};

use kaonic::radio::{PhyConfig, Radio, RadioConfig, RadioFrame, TrxType, RADIO_FRAME_CAPACITY};
use kaonic::{Error, Result};

use crate::phy;
use crate::regs::{self, cmd, BasebandIrq, RadioIrq};

/// Register access over the SPI bus.
///
/// Implementations perform the two-phase transaction (16-bit big-endian
/// address prefix, then data) and must transfer the full buffer or fail.
pub trait Bus: Send {
    fn read(&mut self, reg: u16, buf: &mut [u8]) -> Result<()>;
    fn write(&mut self, reg: u16, buf: &[u8]) -> Result<()>;
}

/// A GPIO output in logical polarity (`true` = active).
pub trait OutputLine: Send {
    fn set(&mut self, active: bool) -> Result<()>;
}

/// The edge-triggered interrupt input.
pub trait EventLine: Send {
    /// Waits up to `timeout` for an edge. `Ok(false)` on an empty window.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;
}

/// Front-end filter select outputs.
pub struct FilterLines {
    pub v1: Box<dyn OutputLine>,
    pub v2: Box<dyn OutputLine>,
    /// Selects the 2.4 GHz filter bank.
    pub band24: Box<dyn OutputLine>,
}

/// Everything the driver needs from the platform.
pub struct Rf215Parts {
    pub bus: Box<dyn Bus>,
    pub reset: Box<dyn OutputLine>,
    pub irq: Box<dyn EventLine>,
    pub filters: FilterLines,
}

/// Hardware reset pulse width (assert and settle).
const RESET_PULSE: Duration = Duration::from_millis(25);

/// How long a transmission may take before the driver gives up on the
/// TX-complete interrupt.
const TX_TIMEOUT: Duration = Duration::from_millis(500);

/// Window for the TXPREP-ready interrupt.
const TXPREP_TIMEOUT: Duration = Duration::from_millis(100);

/// IRQ wait granularity inside the TX state machine.
const IRQ_POLL: Duration = Duration::from_millis(10);

/// FCS appended by the baseband (32-bit for the PHYs used here).
const FCS_LEN: usize = 4;

/// `TXFLL/TXFLH` and `RXFLL/RXFLH` carry an 11-bit frame length.
const MAX_AIR_LEN: usize = 0x7FF;

/// Clock output disabled; the gateway does not feed anything from CLKO.
const CLKO_OFF: u8 = 0x00;

/// `BBCn_PC`: baseband enabled, auto-FCS on TX, FCS filtering on RX.
const PC_BASE: u8 = 0x14 | 0x20;
const PC_FSK: u8 = PC_BASE | 0x01;
const PC_OFDM: u8 = PC_BASE | 0x02;

const RADIO_IRQ_MASK: u8 = RadioIrq::TRXRDY.bits() | RadioIrq::TRXERR.bits();
const BB_IRQ_MASK: u8 = BasebandIrq::RXFE.bits() | BasebandIrq::TXFE.bits();

struct Inner {
    bus: Box<dyn Bus>,
    reset: Box<dyn OutputLine>,
    irq: Box<dyn EventLine>,
    filters: FilterLines,
    active: Option<TrxType>,
    rx_armed: bool,
}

/// AT86RF215 driver. One instance owns one chip; every operation runs
/// under the per-frontend mutex.
pub struct Rf215Radio {
    inner: Mutex<Inner>,
}

impl Rf215Radio {
    pub fn new(parts: Rf215Parts) -> Self {
        Rf215Radio {
            inner: Mutex::new(Inner {
                bus: parts.bus,
                reset: parts.reset,
                irq: parts.irq,
                filters: parts.filters,
                active: None,
                rx_armed: false,
            }),
        }
    }

    /// Hardware-resets and probes the chip.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.lock()?;

        inner.reset.set(true)?;
        thread::sleep(RESET_PULSE);
        inner.reset.set(false)?;
        thread::sleep(RESET_PULSE);

        let part = inner.read_reg(regs::RF_PN)?;
        if part == 0 {
            error!("rf215: no response from transceiver, probe read 0");
            return Err(Error::Fail);
        }
        let version = inner.read_reg(regs::RF_VN)?;
        info!("rf215: found part 0x{:02x} version {}", part, version);
        Ok(())
    }

    /// The currently configured sub-device, if any.
    pub fn active_trx(&self) -> Option<TrxType> {
        self.lock().ok().and_then(|inner| inner.active)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| Error::Fail)
    }
}

impl Drop for Rf215Radio {
    fn drop(&mut self) {
        // Park the chip in reset until the next init.
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.reset.set(true);
        }
    }
}

impl Radio for Rf215Radio {
    fn configure(&self, config: &RadioConfig) -> Result<()> {
        self.lock()?.configure(config)
    }

    fn transmit(&self, frame: &RadioFrame) -> Result<()> {
        self.lock()?.transmit(frame)
    }

    fn receive(&self, frame: &mut RadioFrame, timeout: Duration) -> Result<()> {
        self.lock()?.receive(frame, timeout)
    }
}

impl Inner {
    fn write_reg(&mut self, reg: u16, value: u8) -> Result<()> {
        self.bus.write(reg, &[value])
    }

    fn read_reg(&mut self, reg: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.bus.read(reg, &mut buf)?;
        Ok(buf[0])
    }

    /// One burst read over the four IRQ status registers; reading clears
    /// them. Returns the pair serving the active sub-device.
    fn read_irqs(&mut self, trx: TrxType) -> Result<(RadioIrq, BasebandIrq)> {
        let mut buf = [0u8; 4];
        self.bus.read(regs::RF09.irqs, &mut buf)?;
        let (radio, baseband) = match trx {
            TrxType::Rf09 => (buf[0], buf[2]),
            TrxType::Rf24 => (buf[1], buf[3]),
        };
        Ok((
            RadioIrq::from_bits_truncate(radio),
            BasebandIrq::from_bits_truncate(baseband),
        ))
    }

    fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        let trx = phy::trx_for_freq(config.freq_khz);
        let rf = regs::radio(trx);
        let bb = regs::baseband(trx);

        // Derive every register value first so a bad configuration leaves
        // the chip untouched.
        let pac = phy::pac_value(config.tx_power)?;
        let synth = phy::synth_values(trx, config.freq_khz, config.channel, config.channel_spacing_khz)?;

        let band = phy::filter_band(config.freq_khz);
        self.filters.v1.set(band.v1)?;
        self.filters.v2.set(band.v2)?;
        self.filters.band24.set(trx == TrxType::Rf24)?;

        // Common block: clock, command, interrupt masks.
        self.write_reg(regs::RF_CLKO, CLKO_OFF)?;
        self.write_reg(rf.cmd, cmd::TRXOFF)?;
        self.write_reg(rf.irqm, RADIO_IRQ_MASK)?;
        self.write_reg(bb.irqm, BB_IRQ_MASK)?;

        match &config.phy {
            PhyConfig::Ofdm(ofdm) => {
                let values = phy::ofdm_block(ofdm)?;
                self.write_reg(rf.rxbwc, values.rxbwc)?;
                self.write_reg(rf.rxdfe, values.rxdfe)?;
                self.write_reg(rf.txcutc, values.txcutc)?;
                self.write_reg(rf.txdfe, values.txdfe)?;
                self.write_reg(rf.pac, pac)?;
                self.write_reg(bb.pc, PC_OFDM)?;
                self.write_reg(bb.ofdmc, values.ofdmc)?;
                self.write_reg(bb.ofdmphrtx, values.ofdmphrtx)?;
            }
            PhyConfig::Fsk(fsk) => {
                let values = phy::fsk_block(fsk, trx)?;
                self.write_reg(rf.rxbwc, values.rxbwc)?;
                self.write_reg(rf.rxdfe, values.rxdfe)?;
                self.write_reg(rf.txcutc, values.txcutc)?;
                self.write_reg(rf.txdfe, values.txdfe)?;
                self.write_reg(rf.pac, pac)?;
                self.write_reg(bb.pc, PC_FSK)?;
                self.write_reg(bb.fskc0, values.fskc0)?;
                self.write_reg(bb.fskc1, values.fskc1)?;
                self.write_reg(bb.fskc2, values.fskc2)?;
                self.write_reg(bb.fskc3, values.fskc3)?;
                self.write_reg(bb.fskc4, values.fskc4)?;
                self.write_reg(bb.fskpll, values.fskpll)?;
                self.write_reg(bb.fsksfd0l, values.fsksfd0l)?;
                self.write_reg(bb.fsksfd0h, values.fsksfd0h)?;
                self.write_reg(bb.fsksfd1l, values.fsksfd1l)?;
                self.write_reg(bb.fsksfd1h, values.fsksfd1h)?;
                self.write_reg(bb.fskphrtx, values.fskphrtx)?;
                self.write_reg(bb.fskdm, values.fskdm)?;
                self.write_reg(bb.fskpe0, values.fskpe0)?;
                self.write_reg(bb.fskpe1, values.fskpe1)?;
                self.write_reg(bb.fskpe2, values.fskpe2)?;
            }
        }

        // Frequency synthesizer; the CNM write latches the whole channel
        // configuration, so it goes last.
        self.write_reg(rf.cs, synth.cs)?;
        self.write_reg(rf.ccf0l, synth.ccf0l)?;
        self.write_reg(rf.ccf0h, synth.ccf0h)?;
        self.write_reg(rf.cnl, synth.cnl)?;
        self.write_reg(rf.cnm, synth.cnm)?;

        self.active = Some(trx);
        self.rx_armed = false;
        info!(
            "rf215: configured {:?} at {} kHz channel {} spacing {} kHz",
            trx, config.freq_khz, config.channel, config.channel_spacing_khz
        );
        Ok(())
    }

    fn transmit(&mut self, frame: &RadioFrame) -> Result<()> {
        let Some(trx) = self.active else {
            return Err(Error::PreconditionFailed);
        };
        let rf = regs::radio(trx);
        let bb = regs::baseband(trx);

        let total = frame.len() + FCS_LEN;
        if frame.is_empty() || total > MAX_AIR_LEN {
            return Err(Error::InvalidArg);
        }

        self.write_reg(rf.cmd, cmd::TXPREP)?;
        self.rx_armed = false;
        self.wait_trxrdy(trx)?;

        // Frame length includes the FCS the baseband appends.
        self.write_reg(bb.txfll, (total & 0xFF) as u8)?;
        self.write_reg(bb.txflh, ((total >> 8) & 0x07) as u8)?;
        self.bus.write(bb.fbtxs, frame.as_slice())?;
        self.write_reg(rf.cmd, cmd::TX)?;

        let result = self.wait_txfe(trx);

        // Listen again regardless of the TX outcome.
        if self.write_reg(rf.cmd, cmd::RX).is_ok() {
            self.rx_armed = true;
        }

        result.map(|_| trace!("rf215: transmitted {} byte frame", frame.len()))
    }

    fn wait_trxrdy(&mut self, trx: TrxType) -> Result<()> {
        let deadline = Instant::now() + TXPREP_TIMEOUT;
        while Instant::now() < deadline {
            if self.irq.wait(IRQ_POLL)? {
                let (radio_irq, _) = self.read_irqs(trx)?;
                if radio_irq.contains(RadioIrq::TRXRDY) {
                    return Ok(());
                }
                if radio_irq.contains(RadioIrq::TRXERR) {
                    error!("rf215: transceiver error while preparing tx");
                    return Err(Error::Fail);
                }
            }
        }
        error!("rf215: timed out waiting for txprep");
        Err(Error::Fail)
    }

    fn wait_txfe(&mut self, trx: TrxType) -> Result<()> {
        let deadline = Instant::now() + TX_TIMEOUT;
        while Instant::now() < deadline {
            if self.irq.wait(IRQ_POLL)? {
                let (radio_irq, bb_irq) = self.read_irqs(trx)?;
                if bb_irq.contains(BasebandIrq::TXFE) {
                    return Ok(());
                }
                if radio_irq.contains(RadioIrq::TRXERR) {
                    error!("rf215: transceiver error during tx");
                    return Err(Error::Fail);
                }
            }
        }
        error!("rf215: tx completion interrupt did not arrive");
        Err(Error::Fail)
    }

    fn receive(&mut self, frame: &mut RadioFrame, timeout: Duration) -> Result<()> {
        let Some(trx) = self.active else {
            return Err(Error::PreconditionFailed);
        };
        let rf = regs::radio(trx);
        let bb = regs::baseband(trx);

        if !self.rx_armed {
            self.write_reg(rf.cmd, cmd::RX)?;
            self.rx_armed = true;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            if !self.irq.wait(deadline - now)? {
                return Err(Error::Timeout);
            }

            let (radio_irq, bb_irq) = self.read_irqs(trx)?;
            if bb_irq.contains(BasebandIrq::RXFE) {
                let low = self.read_reg(bb.rxfll)?;
                let high = self.read_reg(bb.rxflh)?;
                let raw_len = usize::from(low) | (usize::from(high & 0x07) << 8);

                if raw_len < FCS_LEN {
                    debug!("rf215: runt frame of {} bytes dropped", raw_len);
                    self.write_reg(rf.cmd, cmd::RX)?;
                    return Err(Error::Fail);
                }
                let len = raw_len - FCS_LEN;
                if len > RADIO_FRAME_CAPACITY {
                    debug!("rf215: oversized frame of {} bytes rejected", len);
                    self.write_reg(rf.cmd, cmd::RX)?;
                    return Err(Error::Fail);
                }

                self.bus.read(bb.fbrxs, &mut frame.buffer_mut()[..len])?;
                frame.set_len(len)?;

                // Receiving leaves the baseband idle; listen again.
                self.write_reg(rf.cmd, cmd::RX)?;
                trace!("rf215: received {} byte frame", len);
                return Ok(());
            }

            if radio_irq.contains(RadioIrq::TRXERR) {
                debug!("rf215: transceiver error while receiving, re-arming");
                self.write_reg(rf.cmd, cmd::RX)?;
            }
            // Anything else was a spurious or TX-leftover interrupt; keep
            // waiting for the window to close.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaonic::radio::OfdmConfig;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type WriteLog = Arc<Mutex<Vec<(u16, Vec<u8>)>>>;
    type RegMap = Arc<Mutex<HashMap<u16, u8>>>;

    struct MockBus {
        writes: WriteLog,
        regs: RegMap,
    }

    impl Bus for MockBus {
        fn read(&mut self, reg: u16, buf: &mut [u8]) -> Result<()> {
            let regs = self.regs.lock().unwrap();
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = regs.get(&(reg + i as u16)).copied().unwrap_or(0);
            }
            Ok(())
        }

        fn write(&mut self, reg: u16, buf: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push((reg, buf.to_vec()));
            let mut regs = self.regs.lock().unwrap();
            for (i, byte) in buf.iter().enumerate() {
                regs.insert(reg + i as u16, *byte);
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockLine {
        state: Arc<Mutex<Option<bool>>>,
    }

    impl OutputLine for MockLine {
        fn set(&mut self, active: bool) -> Result<()> {
            *self.state.lock().unwrap() = Some(active);
            Ok(())
        }
    }

    impl MockLine {
        fn get(&self) -> Option<bool> {
            *self.state.lock().unwrap()
        }
    }

    /// Fires edges while the script has entries, then reports silence.
    #[derive(Clone, Default)]
    struct MockIrq {
        edges: Arc<Mutex<usize>>,
    }

    impl EventLine for MockIrq {
        fn wait(&mut self, _timeout: Duration) -> Result<bool> {
            let mut edges = self.edges.lock().unwrap();
            if *edges > 0 {
                *edges -= 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    struct Fixture {
        radio: Rf215Radio,
        writes: WriteLog,
        regs: RegMap,
        irq: MockIrq,
        v1: MockLine,
        v2: MockLine,
        band24: MockLine,
        reset: MockLine,
    }

    fn fixture() -> Fixture {
        let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
        let regs: RegMap = Arc::new(Mutex::new(HashMap::new()));
        let irq = MockIrq::default();
        let (v1, v2, band24, reset) = (
            MockLine::default(),
            MockLine::default(),
            MockLine::default(),
            MockLine::default(),
        );

        let radio = Rf215Radio::new(Rf215Parts {
            bus: Box::new(MockBus {
                writes: writes.clone(),
                regs: regs.clone(),
            }),
            reset: Box::new(reset.clone()),
            irq: Box::new(irq.clone()),
            filters: FilterLines {
                v1: Box::new(v1.clone()),
                v2: Box::new(v2.clone()),
                band24: Box::new(band24.clone()),
            },
        });

        Fixture {
            radio,
            writes,
            regs,
            irq,
            v1,
            v2,
            band24,
            reset,
        }
    }

    fn ofdm_config(freq_khz: u32) -> RadioConfig {
        RadioConfig {
            freq_khz,
            channel: 1,
            channel_spacing_khz: 200,
            tx_power: 10,
            phy: PhyConfig::Ofdm(OfdmConfig { mcs: 6, opt: 0 }),
        }
    }

    #[test]
    fn init_probes_the_part_number() {
        let f = fixture();

        f.regs.lock().unwrap().insert(regs::RF_PN, 0x34);
        f.radio.init().unwrap();
        assert_eq!(f.reset.get(), Some(false), "reset released after the pulse");

        // A part number of zero means the chip is absent.
        f.regs.lock().unwrap().insert(regs::RF_PN, 0x00);
        assert_eq!(f.radio.init(), Err(Error::Fail));
    }

    #[test]
    fn state_gate_rejects_unconfigured_use() {
        let f = fixture();

        let frame = {
            let mut frame = RadioFrame::new();
            frame.set_data(&[1, 2, 3]).unwrap();
            frame
        };
        assert_eq!(f.radio.transmit(&frame), Err(Error::PreconditionFailed));

        let mut rx = RadioFrame::new();
        assert_eq!(
            f.radio.receive(&mut rx, Duration::from_millis(1)),
            Err(Error::PreconditionFailed)
        );

        f.radio.configure(&ofdm_config(869_535)).unwrap();

        // After configure both operations run and fail differently (the
        // mock never raises interrupts).
        assert_eq!(f.radio.transmit(&frame), Err(Error::Fail));
        assert_eq!(
            f.radio.receive(&mut rx, Duration::from_millis(1)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn ofdm_configure_writes_the_documented_block() {
        let f = fixture();
        f.radio.configure(&ofdm_config(869_535)).unwrap();

        let rf = &regs::RF09;
        let bb = &regs::BBC0;
        let expected: Vec<(u16, Vec<u8>)> = vec![
            // Common block.
            (regs::RF_CLKO, vec![0x00]),
            (rf.cmd, vec![cmd::TRXOFF]),
            (rf.irqm, vec![RADIO_IRQ_MASK]),
            (bb.irqm, vec![BB_IRQ_MASK]),
            // OFDM front end and baseband.
            (rf.rxbwc, vec![0x19]),
            (rf.rxdfe, vec![0x83]),
            (rf.txcutc, vec![0x0B]),
            (rf.txdfe, vec![0x83]),
            (rf.pac, vec![0x7B]),
            (bb.pc, vec![PC_OFDM]),
            (bb.ofdmc, vec![0x00]),
            (bb.ofdmphrtx, vec![0x06]),
            // Frequency program.
            (rf.cs, vec![8]),
            (rf.ccf0l, vec![0xDD]),
            (rf.ccf0h, vec![0x87]),
            (rf.cnl, vec![0x01]),
            (rf.cnm, vec![0x00]),
        ];
        assert_eq!(*f.writes.lock().unwrap(), expected);
    }

    #[test]
    fn sub_device_and_filters_follow_the_frequency() {
        let f = fixture();

        f.radio.configure(&ofdm_config(2_400_000)).unwrap();
        assert_eq!(f.radio.active_trx(), Some(TrxType::Rf24));
        assert_eq!(f.v1.get(), Some(true));
        assert_eq!(f.v2.get(), Some(false));
        assert_eq!(f.band24.get(), Some(true));

        f.radio.configure(&ofdm_config(869_535)).unwrap();
        assert_eq!(f.radio.active_trx(), Some(TrxType::Rf09));
        assert_eq!(f.v1.get(), Some(false));
        assert_eq!(f.v2.get(), Some(true));
        assert_eq!(f.band24.get(), Some(false));

        f.radio.configure(&ofdm_config(915_000)).unwrap();
        assert_eq!(f.v1.get(), Some(true));
        assert_eq!(f.v2.get(), Some(true));
        assert_eq!(f.band24.get(), Some(false));
    }

    #[test]
    fn receive_consumes_a_completed_frame() {
        let f = fixture();
        f.radio.configure(&ofdm_config(869_535)).unwrap();

        let payload: Vec<u8> = (1..=10).collect();
        {
            let mut regs_map = f.regs.lock().unwrap();
            // Receive-complete flag for BBC0 plus a 10+4 byte frame.
            regs_map.insert(regs::BBC0.irqs, BasebandIrq::RXFE.bits());
            regs_map.insert(regs::BBC0.rxfll, (payload.len() + FCS_LEN) as u8);
            regs_map.insert(regs::BBC0.rxflh, 0);
            for (i, byte) in payload.iter().enumerate() {
                regs_map.insert(regs::BBC0.fbrxs + i as u16, *byte);
            }
        }
        *f.irq.edges.lock().unwrap() = 1;

        let mut frame = RadioFrame::new();
        f.radio
            .receive(&mut frame, Duration::from_millis(100))
            .unwrap();
        assert_eq!(frame.as_slice(), &payload[..]);

        // The driver re-armed the receiver.
        let rearm = f
            .writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(reg, data)| *reg == regs::RF09.cmd && data == &vec![cmd::RX])
            .count();
        assert!(rearm >= 2, "expected rx arm and re-arm, saw {}", rearm);
    }

    #[test]
    fn transmit_copies_the_frame_and_fires_tx() {
        let f = fixture();
        f.radio.configure(&ofdm_config(869_535)).unwrap();

        // Ready immediately, then TX done.
        {
            let mut regs_map = f.regs.lock().unwrap();
            regs_map.insert(regs::RF09.irqs, RadioIrq::TRXRDY.bits());
            regs_map.insert(regs::BBC0.irqs, BasebandIrq::TXFE.bits());
        }
        *f.irq.edges.lock().unwrap() = 2;

        let mut frame = RadioFrame::new();
        frame.set_data(&[0xAA; 100]).unwrap();
        f.radio.transmit(&frame).unwrap();

        let writes = f.writes.lock().unwrap();
        assert!(writes.contains(&(regs::BBC0.txfll, vec![104])));
        assert!(writes.contains(&(regs::BBC0.txflh, vec![0])));
        assert!(writes.contains(&(regs::RF09.cmd, vec![cmd::TX])));
        let (reg, data) = writes
            .iter()
            .find(|(reg, _)| *reg == regs::BBC0.fbtxs)
            .expect("frame buffer write");
        assert_eq!(*reg, regs::BBC0.fbtxs);
        assert_eq!(data.len(), 100);
    }
}
