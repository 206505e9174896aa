//! Instrument register map.
//!
//! This module declares the configuration parameters that the control domain
//! passes to the sample domain through the [configuration bus](crate::cdc).

use crate::cdc::{ConfigBus, ConfigReader, ConfigWriter, Parameter};
use crate::ddc::constants::{FTW_BITS, NUM_CHANNELS, OUTPUT_BITS, PERIOD_BITS, SHIFT_BITS};

const FTW_NAMES: [&str; NUM_CHANNELS] = ["dds_ftw0", "dds_ftw1", "dds_ftw2", "dds_ftw3"];
const PP_MULT_NAMES: [&str; NUM_CHANNELS] = ["pp_mult0", "pp_mult1", "pp_mult2", "pp_mult3"];

/// Width of the phase processing multipliers.
pub const MULTIPLIER_BITS: u32 = 4;
/// Width of the result IIR smoothing factor.
pub const IIR_BITS: u32 = 4;
/// Width of the pulse trigger channel selector.
pub const PULSE_CHANNEL_BITS: u32 = 3;
/// Width of the pulse trigger window lengths, in sample clock cycles.
pub const PULSE_WAIT_BITS: u32 = 32;

/// Instrument registers.
///
/// Each field is a handle to a parameter of the configuration bus. Channel 0 is
/// the reference channel. Its phase processing multiplier is fixed to 1 and is
/// never written.
#[derive(Debug, Copy, Clone)]
pub struct Registers {
    /// CIC decimation factor.
    pub ddc_deci: Parameter<u16>,
    /// CIC output shift, in addition to the base shift.
    pub ddc_shift: Parameter<u8>,
    /// NCO tuning word of each channel.
    pub dds_ftw: [Parameter<u32>; NUM_CHANNELS],
    /// NCO phase reset (pulsed).
    pub dds_phase_reset: Parameter<bool>,
    /// Phase processing multiplier of each channel.
    pub pp_mult: [Parameter<u8>; NUM_CHANNELS],
    /// Result IIR smoothing factor.
    pub iir: Parameter<u8>,
    /// Pulse trigger channel. Values above the last channel select continuous
    /// mode.
    pub pulse_channel: Parameter<u8>,
    /// Pulse trigger magnitude threshold.
    pub pulse_threshold: Parameter<u32>,
    /// Cycles between the trigger and the acquisition window.
    pub pulse_wait_pre: Parameter<u32>,
    /// Cycles in the acquisition window.
    pub pulse_wait_acq: Parameter<u32>,
    /// Hold-off cycles after the acquisition window.
    pub pulse_wait_post: Parameter<u32>,
}

impl Registers {
    /// Declares the instrument registers on a new configuration bus.
    ///
    /// Returns the register handles and both sides of the bus.
    pub fn map() -> (Registers, ConfigWriter, ConfigReader) {
        let mut bus = ConfigBus::new();
        let registers = Registers {
            ddc_deci: bus.latched("ddc_deci", PERIOD_BITS, 100),
            ddc_shift: bus.latched("ddc_shift", SHIFT_BITS, 2),
            dds_ftw: std::array::from_fn(|k| bus.latched(FTW_NAMES[k], FTW_BITS, 0)),
            dds_phase_reset: bus.pulsed("dds_phase_reset", 1, false),
            pp_mult: std::array::from_fn(|k| bus.latched(PP_MULT_NAMES[k], MULTIPLIER_BITS, 1)),
            iir: bus.latched("iir", IIR_BITS, 10),
            pulse_channel: bus.latched("pulse_channel", PULSE_CHANNEL_BITS, 7),
            pulse_threshold: bus.latched("pulse_threshold", OUTPUT_BITS, 1024),
            pulse_wait_pre: bus.latched("pulse_wait_pre", PULSE_WAIT_BITS, 0),
            pulse_wait_acq: bus.latched("pulse_wait_acq", PULSE_WAIT_BITS, 0),
            pulse_wait_post: bus.latched("pulse_wait_post", PULSE_WAIT_BITS, 0),
        };
        let (writer, reader) = bus.split();
        (registers, writer, reader)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reset_values() {
        let (registers, writer, mut reader) = Registers::map();
        reader.tick();
        assert_eq!(reader.get(registers.ddc_deci), 100);
        assert_eq!(reader.get(registers.pulse_channel), 7);
        assert!(!reader.get(registers.dds_phase_reset));
        for k in 0..NUM_CHANNELS {
            assert_eq!(reader.get(registers.pp_mult[k]), 1);
            assert_eq!(writer.read(registers.dds_ftw[k]), 0);
        }
        assert_eq!(writer.name(registers.dds_ftw[3]), "dds_ftw3");
    }

    #[test]
    fn widths() {
        let (registers, mut writer, _) = Registers::map();
        assert!(writer.commit(registers.ddc_shift, 16).is_err());
        assert!(writer.commit(registers.pp_mult[1], 15).is_ok());
        assert!(writer.commit(registers.pulse_threshold, 1 << OUTPUT_BITS).is_err());
        assert!(writer.commit(registers.dds_ftw[2], u32::MAX).is_ok());
    }
}
