//! DDC implementation constants.
//!
//! This module contains constants that define the fixed-point characteristics
//! of the down converter.

/// Number of input channels (REF, A, B and C).
pub const NUM_CHANNELS: usize = 4;

/// Number of lanes through the decimator (I and Q of each channel).
pub const NUM_LANES: usize = 2 * NUM_CHANNELS;

/// Width of the ADC samples.
pub const ADC_BITS: u32 = 14;

/// Extra bits kept from the mixer products.
pub const MIXER_GUARD_BITS: u32 = 4;

/// Width of the I and Q lanes at the mixer output.
pub const MIX_BITS: u32 = ADC_BITS + MIXER_GUARD_BITS;

/// Width of the local oscillator cosine and sine.
pub const LO_BITS: u32 = 18;

/// Width of the NCO phase accumulator and tuning words.
pub const FTW_BITS: u32 = 32;

/// Base 2 logarithm of the number of entries in the LO lookup table.
pub const LUT_BITS: u32 = 12;

/// Number of integrator and comb stages in the CIC decimator.
pub const CIC_STAGES: usize = 2;

/// Width of the decimation factor register.
pub const PERIOD_BITS: u32 = 13;

/// Width of the output shift register.
pub const SHIFT_BITS: u32 = 4;

/// Bits always discarded at the CIC output, in addition to the output shift.
pub const SHIFT_BASE: u32 = 9;

/// Width of the decimated IQ samples.
pub const OUTPUT_BITS: u32 = 21;

/// Minimum decimation factor.
///
/// The serializer needs at least one idle cycle between bursts of
/// [`NUM_LANES`] samples.
pub const MIN_DECIMATION: u16 = 10;

/// Maximum decimation factor.
///
/// The CIC accumulators are sized for this decimation factor.
pub const MAX_DECIMATION: u16 = 500;

/// Maximum output shift.
pub const MAX_SHIFT: u8 = (1 << SHIFT_BITS) - 1;

/// Computes the accumulator width of a CIC decimator.
///
/// The width is `input_bits + ceil(log2(max_decimation^stages))`, which is the
/// bit growth of the DC gain of the filter.
pub const fn cic_accumulator_bits(input_bits: u32, max_decimation: u64, stages: usize) -> u32 {
    let mut gain: u128 = 1;
    let mut n = 0;
    while n < stages {
        gain *= max_decimation as u128;
        n += 1;
    }
    if gain <= 1 {
        input_bits
    } else {
        input_bits + (gain - 1).ilog2() + 1
    }
}

/// Accumulator width of the instrument CIC decimator.
pub const CIC_ACCUMULATOR_BITS: u32 =
    cic_accumulator_bits(MIX_BITS, MAX_DECIMATION as u64, CIC_STAGES);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulator_bits() {
        assert_eq!(cic_accumulator_bits(18, 500, 2), 36);
        assert_eq!(cic_accumulator_bits(18, 512, 2), 36);
        assert_eq!(cic_accumulator_bits(18, 513, 2), 37);
        assert_eq!(cic_accumulator_bits(10, 1, 3), 10);
        assert_eq!(CIC_ACCUMULATOR_BITS, 36);
        assert!(CIC_ACCUMULATOR_BITS <= 64);
    }
}
