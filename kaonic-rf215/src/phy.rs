//! PHY register derivation: OFDM option tables, the FSK front-end lookup
//! table, PA mapping, filter-band selection and frequency synthesizer
//! programming.

use kaonic::radio::{FskConfig, FskFec, FskModulation, OfdmConfig, TrxType};
use kaonic::{Error, Result};

/// Frequency and channel-spacing resolution of the synthesizer in channel
/// scheme CM=0.
pub const FREQ_RESOLUTION_KHZ: u32 = 25;

/// Frequency offset of the 2.4 GHz band in CM=0.
pub const RF24_FREQ_OFFSET_KHZ: u32 = 1_500_000;

/// Frequencies at or below this select the sub-GHz transceiver.
pub const RF09_MAX_FREQ_KHZ: u32 = 1_500_000;

/// Picks the sub-device serving `freq_khz`.
pub fn trx_for_freq(freq_khz: u32) -> TrxType {
    if freq_khz <= RF09_MAX_FREQ_KHZ {
        TrxType::Rf09
    } else {
        TrxType::Rf24
    }
}

/// Front-end filter selects for one band.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FilterBand {
    pub v1: bool,
    pub v2: bool,
}

/// Sub-GHz filter bank selection by frequency.
pub fn filter_band(freq_khz: u32) -> FilterBand {
    if (902_000..=928_000).contains(&freq_khz) {
        FilterBand { v1: true, v2: true }
    } else if (862_000..=876_000).contains(&freq_khz) {
        FilterBand { v1: false, v2: true }
    } else {
        FilterBand { v1: true, v2: false }
    }
}

/// Front-end register values of one OFDM option.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OfdmRegValues {
    pub rxbwc: u8,
    pub rxdfe: u8,
    pub txcutc: u8,
    pub txdfe: u8,
    pub ofdmc: u8,
    pub ofdmphrtx: u8,
}

/// RX/TX front-end settings per OFDM option (datasheet §6.12.2: bandwidth,
/// DFE sample rate and cutoff per option).
const OFDM_FRONTEND: [(u8, u8, u8, u8); 4] = [
    // (rxbwc, rxdfe, txcutc, txdfe) for option 1..=4
    (0x19, 0x83, 0x0B, 0x83),
    (0x17, 0x83, 0x0A, 0x83),
    (0x04, 0x46, 0x09, 0x66),
    (0x03, 0x26, 0x09, 0x46),
];

/// Derives the OFDM register block. Validates `mcs` and `opt` ranges.
pub fn ofdm_block(config: &OfdmConfig) -> Result<OfdmRegValues> {
    if config.mcs > 6 || config.opt > 3 {
        return Err(Error::InvalidArg);
    }

    let (rxbwc, rxdfe, txcutc, txdfe) = OFDM_FRONTEND[usize::from(config.opt)];
    Ok(OfdmRegValues {
        rxbwc,
        rxdfe,
        txcutc,
        txdfe,
        ofdmc: config.opt,
        ofdmphrtx: config.mcs,
    })
}

/// Register values of the FSK block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FskRegValues {
    pub rxbwc: u8,
    pub rxdfe: u8,
    pub txcutc: u8,
    pub txdfe: u8,
    pub fskc0: u8,
    pub fskc1: u8,
    pub fskc2: u8,
    pub fskc3: u8,
    pub fskc4: u8,
    pub fskpll: u8,
    pub fsksfd0l: u8,
    pub fsksfd0h: u8,
    pub fsksfd1l: u8,
    pub fsksfd1h: u8,
    pub fskphrtx: u8,
    pub fskdm: u8,
    pub fskpe0: u8,
    pub fskpe1: u8,
    pub fskpe2: u8,
}

/// One row of the FSK front-end table (datasheet §6.10.4–6.10.5).
struct FskFrontendRow {
    /// `TXDFE.SR` / `RXDFE.SR` sample rate code.
    sr: u8,
    /// `TXCUTC.LPFCUT` for a modulation index of 1.0.
    lpfcut: u8,
    /// `RXBWC` for modulation index <= 1.0 resp. > 1.0.
    rxbwc_lo: u8,
    rxbwc_hi: u8,
    /// `RXDFE.RCUT` for modulation index <= 1.0 resp. > 1.0.
    rcut_lo: u8,
    rcut_hi: u8,
}

/// Indexed by the symbol rate class (50..400 kHz). The receiver bandwidth
/// follows the occupied bandwidth `srate * (1 + midx)`, which is why the
/// modulation index picks the column.
const FSK_FRONTEND: [FskFrontendRow; 6] = [
    FskFrontendRow { sr: 8, lpfcut: 0x00, rxbwc_lo: 0x00, rxbwc_hi: 0x01, rcut_lo: 1, rcut_hi: 2 },
    FskFrontendRow { sr: 4, lpfcut: 0x03, rxbwc_lo: 0x02, rxbwc_hi: 0x03, rcut_lo: 1, rcut_hi: 2 },
    FskFrontendRow { sr: 2, lpfcut: 0x05, rxbwc_lo: 0x03, rxbwc_hi: 0x04, rcut_lo: 1, rcut_hi: 2 },
    FskFrontendRow { sr: 2, lpfcut: 0x07, rxbwc_lo: 0x04, rxbwc_hi: 0x05, rcut_lo: 2, rcut_hi: 3 },
    FskFrontendRow { sr: 1, lpfcut: 0x08, rxbwc_lo: 0x05, rxbwc_hi: 0x07, rcut_lo: 2, rcut_hi: 3 },
    FskFrontendRow { sr: 1, lpfcut: 0x09, rxbwc_lo: 0x07, rxbwc_hi: 0x08, rcut_lo: 2, rcut_hi: 3 },
];

/// Modulation indices above this register code exceed 1.0 and widen the
/// occupied bandwidth.
const MIDX_WIDE: u8 = 3;

/// Derives the FSK register block for one sub-device.
pub fn fsk_block(config: &FskConfig, trx: TrxType) -> Result<FskRegValues> {
    if config.midx > 7 || config.midxs > 3 || config.bt > 3 || config.sfd > 1 {
        return Err(Error::InvalidArg);
    }

    let row = &FSK_FRONTEND[usize::from(config.srate.index())];
    let wide = config.midx > MIDX_WIDE;

    let rxbwc = if wide { row.rxbwc_hi } else { row.rxbwc_lo };
    // The 2.4 GHz receiver runs a higher IF; shift the channel filter cut
    // up one step, as the band column of the datasheet table does.
    let rcut = {
        let rcut = if wide { row.rcut_hi } else { row.rcut_lo };
        match trx {
            TrxType::Rf09 => rcut,
            TrxType::Rf24 => (rcut + 1).min(4),
        }
    };

    let mord = match config.mord {
        FskModulation::Fsk2 => 0,
        FskModulation::Fsk4 => 1,
    };
    let fskc0 = mord | (config.midx << 1) | (config.midxs << 4) | (config.bt << 6);

    let preamble = config.preamble_length;
    let fskc1 = (config.srate.index() & 0x0F)
        | ((config.preamble_inverted as u8) << 5)
        | ((((preamble >> 8) & 0x03) as u8) << 6);

    let fecs: u8 = match config.fec_scheme {
        FskFec::Nrnsc => 0,
        FskFec::Rsc => 1,
    };
    let fskc2 = (config.fec_enabled as u8) | (fecs << 1);

    // SFD detection threshold and preamble detection threshold at their
    // reset values.
    let fskc3 = 0x85;

    let fskc4 = (config.sfd << 1) | (config.sfd << 3);

    Ok(FskRegValues {
        rxbwc,
        rxdfe: (rcut << 5) | row.sr,
        txcutc: row.lpfcut,
        txdfe: (2 << 5) | row.sr,
        fskc0,
        fskc1,
        fskc2,
        fskc3,
        fskc4,
        fskpll: (preamble & 0xFF) as u8,
        fsksfd0l: (config.sfd0 & 0xFF) as u8,
        fsksfd0h: (config.sfd0 >> 8) as u8,
        fsksfd1l: (config.sfd1 & 0xFF) as u8,
        fsksfd1h: (config.sfd1 >> 8) as u8,
        fskphrtx: (config.dw as u8) << 2,
        fskdm: 0x01 | ((config.preemphasis as u8) << 1),
        fskpe0: config.pe0,
        fskpe1: config.pe1,
        fskpe2: config.pe2,
    })
}

/// Maps the TX power index 0..=12 onto `RFn_PAC` (max PA current, power
/// field in two-step increments).
pub fn pac_value(tx_power: u8) -> Result<u8> {
    if tx_power > 12 {
        return Err(Error::InvalidArg);
    }
    Ok(0x60 | (7 + tx_power * 2))
}

/// Frequency synthesizer register values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SynthValues {
    pub cs: u8,
    pub ccf0l: u8,
    pub ccf0h: u8,
    pub cnl: u8,
    pub cnm: u8,
}

/// Programs channel scheme CM=0: `f = base + 25 kHz * (CCF0 + CS * CN)`,
/// where `base` is 0 for the sub-GHz band and 1.5 GHz for 2.4 GHz.
pub fn synth_values(
    trx: TrxType,
    freq_khz: u32,
    channel: u16,
    channel_spacing_khz: u32,
) -> Result<SynthValues> {
    let base = match trx {
        TrxType::Rf09 => 0,
        TrxType::Rf24 => RF24_FREQ_OFFSET_KHZ,
    };
    if freq_khz < base {
        return Err(Error::InvalidArg);
    }

    let cs = channel_spacing_khz / FREQ_RESOLUTION_KHZ;
    if cs == 0 || cs > 0xFF {
        return Err(Error::InvalidArg);
    }

    // Center frequencies are rounded to the 25 kHz grid.
    let ccf0 = (freq_khz - base + FREQ_RESOLUTION_KHZ / 2) / FREQ_RESOLUTION_KHZ;
    if ccf0 > 0xFFFF {
        return Err(Error::InvalidArg);
    }

    // CNL plus the single CNH bit in CNM.
    if channel > 0x1FF {
        return Err(Error::InvalidArg);
    }

    Ok(SynthValues {
        cs: cs as u8,
        ccf0l: (ccf0 & 0xFF) as u8,
        ccf0h: (ccf0 >> 8) as u8,
        cnl: (channel & 0xFF) as u8,
        cnm: (channel >> 8) as u8,
    })
}
