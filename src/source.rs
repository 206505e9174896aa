//! ADC sample sources.
//!
//! The sample domain reads blocks of simultaneous samples of the four ADC
//! channels from an [`AdcSource`]. [`ToneSource`] is a synthetic source that
//! produces phase-coherent tones, which allows running the instrument without
//! hardware.

use crate::ddc::constants::{ADC_BITS, NUM_CHANNELS};
use anyhow::Result;

/// Source of ADC samples.
pub trait AdcSource: Send {
    /// Fills `block` with consecutive samples of all the channels.
    fn read_block(&mut self, block: &mut [[i16; NUM_CHANNELS]]) -> Result<()>;
}

/// Synthetic tone source.
///
/// Channel 0 (the reference) carries a tone at the source frequency. Channel
/// `k` carries a tone at `multipliers[k]` times that frequency with a fixed
/// phase offset. The tones are sampled at the ADC sample rate, so frequencies
/// above the first Nyquist zone alias like they would in the ADC.
#[derive(Debug, Clone)]
pub struct ToneSource {
    // phase and phase step of each channel, in cycles
    phases: [f64; NUM_CHANNELS],
    steps: [f64; NUM_CHANNELS],
    offsets: [f64; NUM_CHANNELS],
    amplitude: f64,
}

impl ToneSource {
    /// Creates a tone source.
    ///
    /// The `amplitude` is given as a fraction of the ADC full scale, and the
    /// `phase_offsets` in degrees.
    pub fn new(
        frequency: f64,
        samp_rate: f64,
        multipliers: [u8; NUM_CHANNELS],
        amplitude: f64,
        phase_offsets: [f64; NUM_CHANNELS],
    ) -> Result<ToneSource> {
        if !(frequency.is_finite() && frequency >= 0.0) {
            anyhow::bail!("invalid tone frequency {frequency}");
        }
        if !(samp_rate.is_finite() && samp_rate > 0.0) {
            anyhow::bail!("invalid sample rate {samp_rate}");
        }
        if !(0.0..=1.0).contains(&amplitude) {
            anyhow::bail!("tone amplitude {amplitude} outside of [0, 1]");
        }
        let full_scale = f64::from((1 << (ADC_BITS - 1)) - 1);
        Ok(ToneSource {
            phases: [0.0; NUM_CHANNELS],
            steps: multipliers.map(|m| (f64::from(m) * frequency / samp_rate).fract()),
            offsets: phase_offsets.map(|offset| offset / 360.0),
            amplitude: amplitude * full_scale,
        })
    }
}

impl AdcSource for ToneSource {
    fn read_block(&mut self, block: &mut [[i16; NUM_CHANNELS]]) -> Result<()> {
        for samples in block.iter_mut() {
            for (k, sample) in samples.iter_mut().enumerate() {
                let cycles = self.phases[k] + self.offsets[k];
                let value = self.amplitude * (2.0 * std::f64::consts::PI * cycles).cos();
                *sample = value.round() as i16;
                self.phases[k] = (self.phases[k] + self.steps[k]).fract();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coherent_tones() {
        let mut source =
            ToneSource::new(1e6, 16e6, [1, 1, 2, 4], 0.5, [0.0, 90.0, 0.0, 180.0]).unwrap();
        let mut block = [[0; NUM_CHANNELS]; 16];
        source.read_block(&mut block).unwrap();
        let a = 4095.5f64.round() as i16;
        assert_eq!(block[0], [a, 0, a, -a]);
        // a quarter of a period of the reference
        assert_eq!(block[4], [0, -a, -a, -a]);
        assert_eq!(block[8][0], -a);
        assert!(block.iter().flatten().all(|x| x.abs() <= a));
    }

    #[test]
    fn invalid_parameters() {
        assert!(ToneSource::new(f64::NAN, 1e6, [1; 4], 0.5, [0.0; 4]).is_err());
        assert!(ToneSource::new(1e3, 0.0, [1; 4], 0.5, [0.0; 4]).is_err());
        assert!(ToneSource::new(1e3, 1e6, [1; 4], 1.5, [0.0; 4]).is_err());
    }
}
