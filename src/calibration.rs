//! Calibration.
//!
//! A [`Calibration`] converts the raw measurements of the sample domain into
//! magnitudes in dBm and calibrated phases. [`FlatCalibration`] applies fixed
//! offsets that do not depend on frequency.

use crate::{
    ddc::constants::{NUM_CHANNELS, OUTPUT_BITS},
    measure::RawMeasurement,
};
use anyhow::Result;

/// Calibrated measurement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Calibrated {
    /// Magnitude of each channel, in dBm.
    pub magnitudes_dbm: [f64; NUM_CHANNELS],
    /// Phase of channels A, B and C relative to the reference, in degrees
    /// between -180 and 180.
    pub phases_deg: [f64; NUM_CHANNELS - 1],
}

/// Calibration oracle.
pub trait Calibration: Send + Sync + std::fmt::Debug {
    /// Calibrates a raw measurement.
    ///
    /// The `shift` is the CIC output shift with which the measurement was
    /// taken, and `frequencies` contains the frequency of the tone measured in
    /// each channel, in Hz.
    fn apply_calibration(
        &self,
        raw: &RawMeasurement,
        shift: u8,
        frequencies: &[f64; NUM_CHANNELS],
    ) -> Result<Calibrated>;
}

/// Calibration with frequency-independent offsets.
///
/// Magnitudes are referred to the decimator full scale before the output shift
/// and the offsets are added to them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatCalibration {
    /// Offset added to the magnitude of each channel, in dB.
    pub magnitude_offsets_db: [f64; NUM_CHANNELS],
    /// Offset added to the phase of channels A, B and C, in degrees.
    pub phase_offsets_deg: [f64; NUM_CHANNELS - 1],
}

// Magnitudes below this are clamped to avoid taking the logarithm of zero.
const MIN_MAGNITUDE: f64 = 1e-3;

/// Wraps a phase in degrees to the interval [-180, 180).
pub fn wrap_degrees(phase: f64) -> f64 {
    (phase + 180.0).rem_euclid(360.0) - 180.0
}

impl Calibration for FlatCalibration {
    fn apply_calibration(
        &self,
        raw: &RawMeasurement,
        shift: u8,
        _frequencies: &[f64; NUM_CHANNELS],
    ) -> Result<Calibrated> {
        let full_scale = f64::from(1u32 << (OUTPUT_BITS - 1));
        let gain = 2f64.powi(i32::from(shift));
        let mut calibrated = Calibrated::default();
        for ((dbm, &magnitude), &offset) in calibrated
            .magnitudes_dbm
            .iter_mut()
            .zip(raw.magnitudes.iter())
            .zip(self.magnitude_offsets_db.iter())
        {
            *dbm = 20.0 * (magnitude.max(MIN_MAGNITUDE) * gain / full_scale).log10() + offset;
        }
        for ((deg, &phase), &offset) in calibrated
            .phases_deg
            .iter_mut()
            .zip(raw.phases.iter())
            .zip(self.phase_offsets_deg.iter())
        {
            *deg = wrap_degrees(phase + offset);
        }
        if calibrated
            .magnitudes_dbm
            .iter()
            .chain(calibrated.phases_deg.iter())
            .any(|x| !x.is_finite())
        {
            anyhow::bail!("calibration of {raw:?} is not finite");
        }
        Ok(calibrated)
    }
}
