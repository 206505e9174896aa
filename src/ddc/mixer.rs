//! Quadrature mixer.

use super::constants::{LO_BITS, MIXER_GUARD_BITS};

/// Right shift applied to the ADC and LO products.
///
/// The products are truncated so that [`MIXER_GUARD_BITS`] bits below the ADC
/// resolution are kept.
pub const PRODUCT_SHIFT: u32 = LO_BITS - 1 - MIXER_GUARD_BITS;

/// Mixes an ADC sample with the local oscillator.
///
/// The `lo` parameter contains the cosine and sine produced by the
/// [`Oscillator`](super::nco::Oscillator). Returns the I and Q products scaled
/// to [`MIX_BITS`](super::constants::MIX_BITS). The products are truncated,
/// not rounded.
pub fn mix(sample: i16, lo: (i32, i32)) -> (i32, i32) {
    let x = i64::from(sample);
    let i = (x * i64::from(lo.0)) >> PRODUCT_SHIFT;
    let q = (x * i64::from(lo.1)) >> PRODUCT_SHIFT;
    (i as i32, q as i32)
}

#[cfg(test)]
mod test {
    use super::super::constants::{ADC_BITS, MIX_BITS};
    use super::super::nco::LO_AMPLITUDE;
    use super::*;

    #[test]
    fn full_scale_fits() {
        let max = (1 << (ADC_BITS - 1)) - 1;
        let min = -(1 << (ADC_BITS - 1));
        let limit = 1 << (MIX_BITS - 1);
        for x in [max, min] {
            for lo in [LO_AMPLITUDE, -LO_AMPLITUDE] {
                let (i, q) = mix(x, (lo, lo));
                assert!((-limit..limit).contains(&i));
                assert_eq!(i, q);
            }
        }
    }

    #[test]
    fn truncation() {
        assert_eq!(mix(1, (LO_AMPLITUDE, 0)), (15, 0));
        assert_eq!(mix(-1, (LO_AMPLITUDE, 0)), (-16, 0));
        assert_eq!(mix(8191, (LO_AMPLITUDE, -LO_AMPLITUDE)), (131055, -131056));
    }
}
