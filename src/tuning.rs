//! Tuning.
//!
//! This module converts the reference frequency measured by the frequency
//! counter into NCO tuning words. The counter measures the frequency aliased
//! into the first Nyquist zone, so it is first unfolded into the Nyquist band
//! selected by the operator. The tuning word of each channel is the base
//! tuning word multiplied by the harmonic multiplier of the channel.
//!
//! Tuning words are computed for the absolute frequency and only truncated to
//! the accumulator width by the oscillators. In odd Nyquist bands this makes
//! the oscillators run at the negative of the baseband alias frequency, which
//! is what preserves the sign of the measured phases.

use crate::{
    cdc::ConfigWriter,
    ddc::constants::{FTW_BITS, NUM_CHANNELS},
    registers::{Registers, MULTIPLIER_BITS},
};
use anyhow::Result;
use std::str::FromStr;

// Keeps base_word * multiplier well within u64.
const MAX_BASE_WORD: u64 = 1 << 52;

/// Unfolds a baseband frequency into a Nyquist band.
///
/// Band `n` spans from `n * samp_rate / 2` to `(n + 1) * samp_rate / 2`. The
/// spectrum is mirrored in odd bands.
///
/// # Examples
///
/// ```
/// use vvm_httpd::tuning::unfold;
///
/// assert_eq!(unfold(10e6, 0, 100e6), 10e6);
/// assert_eq!(unfold(10e6, 1, 100e6), 90e6);
/// assert_eq!(unfold(10e6, 2, 100e6), 110e6);
/// ```
pub fn unfold(baseband: f64, band: u32, samp_rate: f64) -> f64 {
    let band_start = f64::from(band) * samp_rate / 2.0;
    if band % 2 == 0 {
        band_start + baseband
    } else {
        band_start + samp_rate / 2.0 - baseband
    }
}

/// Computes the tuning word for a frequency.
///
/// The tuning word is `round(frequency / samp_rate * 2^FTW_BITS)`, without
/// wrapping. The frequency must be finite and non-negative.
pub fn tuning_word(frequency: f64, samp_rate: f64) -> Result<u64> {
    if !(frequency.is_finite() && frequency >= 0.0) {
        anyhow::bail!("invalid tuning frequency {frequency}");
    }
    if !(samp_rate.is_finite() && samp_rate > 0.0) {
        anyhow::bail!("invalid sample rate {samp_rate}");
    }
    let word = (frequency / samp_rate * (1u64 << FTW_BITS) as f64).round();
    if word >= MAX_BASE_WORD as f64 {
        anyhow::bail!("tuning frequency {frequency} too high");
    }
    Ok(word as u64)
}

/// Tuning target.
///
/// The textual form of a tuning target is either `auto` or a frequency in Hz.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TuneTarget {
    /// Tune to the measured reference frequency.
    Auto,
    /// Tune to a fixed frequency, in Hz.
    Frequency(f64),
}

impl FromStr for TuneTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<TuneTarget> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(TuneTarget::Auto);
        }
        match s.parse::<f64>() {
            Ok(frequency) if frequency.is_finite() && frequency >= 0.0 => {
                Ok(TuneTarget::Frequency(frequency))
            }
            _ => anyhow::bail!(
                "invalid tuning target {s:?} (expected \"auto\" or a frequency in Hz)"
            ),
        }
    }
}

impl std::fmt::Display for TuneTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TuneTarget::Auto => write!(f, "auto"),
            TuneTarget::Frequency(frequency) => write!(f, "{frequency}"),
        }
    }
}

/// Tuning of the oscillators.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    /// Target that produced this tuning.
    pub target: TuneTarget,
    /// Tuning frequency, in Hz.
    pub frequency: f64,
    /// Base tuning word.
    pub base_word: u64,
    /// Harmonic multiplier of each channel.
    pub multipliers: [u8; NUM_CHANNELS],
    /// Tuning word of each channel.
    pub words: [u64; NUM_CHANNELS],
}

impl Tuning {
    /// Returns the tuning word of a channel truncated to the accumulator width.
    pub fn register_word(&self, channel: usize) -> u32 {
        (self.words[channel] & ((1u64 << FTW_BITS) - 1)) as u32
    }
}

/// Tuning controller.
///
/// The tuning controller keeps the tuning currently applied to the
/// oscillators and applies new tunings through the configuration bus.
#[derive(Debug)]
pub struct TuningController {
    samp_rate: f64,
    target: TuneTarget,
    current: Option<Tuning>,
}

impl TuningController {
    /// Creates a tuning controller in auto mode.
    pub fn new(samp_rate: f64) -> TuningController {
        TuningController {
            samp_rate,
            target: TuneTarget::Auto,
            current: None,
        }
    }

    /// Returns the ADC sample rate.
    pub fn samp_rate(&self) -> f64 {
        self.samp_rate
    }

    /// Returns the target of the last successful tuning.
    pub fn target(&self) -> TuneTarget {
        self.target
    }

    /// Returns the tuning currently applied, if any.
    pub fn current(&self) -> Option<&Tuning> {
        self.current.as_ref()
    }

    /// Computes a tuning without applying it.
    ///
    /// The `reference` is the baseband reference frequency measured by the
    /// frequency counter, which is needed for [`TuneTarget::Auto`]. The
    /// multiplier of channel 0 is always taken as 1.
    pub fn plan(
        &self,
        target: TuneTarget,
        reference: Option<f64>,
        band: u32,
        multipliers: &[u8; NUM_CHANNELS],
    ) -> Result<Tuning> {
        let frequency = match target {
            TuneTarget::Auto => {
                let Some(reference) = reference else {
                    anyhow::bail!("no reference frequency measurement available");
                };
                unfold(reference, band, self.samp_rate)
            }
            TuneTarget::Frequency(frequency) => frequency,
        };
        let base_word = tuning_word(frequency, self.samp_rate)?;
        let mut multipliers = *multipliers;
        multipliers[0] = 1;
        let max_multiplier = (1 << MULTIPLIER_BITS) - 1;
        if let Some(k) = multipliers
            .iter()
            .position(|&m| m == 0 || m > max_multiplier)
        {
            anyhow::bail!(
                "harmonic multiplier {} of channel {k} outside of [1, {max_multiplier}]",
                multipliers[k]
            );
        }
        Ok(Tuning {
            target,
            frequency,
            base_word,
            multipliers,
            words: multipliers.map(|m| base_word * u64::from(m)),
        })
    }

    /// Computes and applies a tuning.
    ///
    /// The tuning words and multipliers of all the channels are committed
    /// before the phase reset pulse. If the tuning cannot be computed, nothing
    /// is committed and the current tuning is kept.
    pub fn retune(
        &mut self,
        writer: &mut ConfigWriter,
        registers: &Registers,
        target: TuneTarget,
        reference: Option<f64>,
        band: u32,
        multipliers: &[u8; NUM_CHANNELS],
    ) -> Result<&Tuning> {
        let tuning = match self.plan(target, reference, band, multipliers) {
            Ok(tuning) => tuning,
            Err(error) => {
                tracing::warn!(%target, "cannot tune: {error:#}");
                return Err(error);
            }
        };
        for (k, &parameter) in registers.dds_ftw.iter().enumerate() {
            writer.commit(parameter, tuning.register_word(k))?;
        }
        for (k, &parameter) in registers.pp_mult.iter().enumerate().skip(1) {
            writer.commit(parameter, tuning.multipliers[k])?;
        }
        writer.commit(registers.dds_phase_reset, true)?;
        tracing::info!(
            %target,
            frequency = tuning.frequency,
            base_word = tuning.base_word,
            "tuned to {:.6} MHz",
            tuning.frequency * 1e-6
        );
        self.target = target;
        Ok(&*self.current.insert(tuning))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FS: f64 = 117.6e6;

    #[test]
    fn unfold_bands() {
        let f_bb = 7_310_921.52;
        assert_eq!(unfold(f_bb, 0, FS), f_bb);
        assert!((unfold(f_bb, 2, FS) - 124_910_921.52).abs() < 1e-6);
        assert!((unfold(f_bb, 8, FS) - (8.0 * FS / 2.0 + f_bb)).abs() < 1e-6);
        assert!((unfold(f_bb, 1, FS) - (FS - f_bb)).abs() < 1e-6);
        assert!((unfold(f_bb, 3, FS) - (2.0 * FS - f_bb)).abs() < 1e-6);
    }

    #[test]
    fn unfold_round_trip() {
        // sampling an unfolded frequency gives back the baseband alias
        for band in 0..14 {
            for f_bb in [0.0, 1.0, 7_310_921.52, 29.4e6, 58.8e6 - 1.0] {
                let f = unfold(f_bb, band, FS);
                let alias = f % FS;
                let alias = if alias > FS / 2.0 { FS - alias } else { alias };
                assert!((alias - f_bb).abs() < 1e-6, "band {band} f_bb {f_bb}");
                assert!(f >= f64::from(band) * FS / 2.0);
                assert!(f <= f64::from(band + 1) * FS / 2.0);
            }
        }
    }

    #[test]
    fn tuning_words() {
        assert_eq!(tuning_word(FS / 4.0, FS).unwrap(), 1 << 30);
        assert_eq!(tuning_word(FS, FS).unwrap(), 1 << 32);
        assert_eq!(tuning_word(0.0, FS).unwrap(), 0);
        assert!(tuning_word(-1.0, FS).is_err());
        assert!(tuning_word(f64::NAN, FS).is_err());
        assert!(tuning_word(f64::INFINITY, FS).is_err());
        assert!(tuning_word(1e6, 0.0).is_err());
    }

    #[test]
    fn harmonic_words() {
        let controller = TuningController::new(FS);
        let tuning = controller
            .plan(TuneTarget::Auto, Some(7_310_921.52), 8, &[1, 2, 3, 15])
            .unwrap();
        for (k, m) in [1, 2, 3, 15].into_iter().enumerate() {
            assert_eq!(tuning.words[k], tuning.base_word * m);
            assert_eq!(
                tuning.register_word(k),
                tuning.base_word.wrapping_mul(m) as u32
            );
        }
    }

    #[test]
    fn odd_band_conjugates() {
        let controller = TuningController::new(FS);
        let f_bb = 7_310_921.52;
        let tuning = controller
            .plan(TuneTarget::Auto, Some(f_bb), 1, &[1; NUM_CHANNELS])
            .unwrap();
        let baseband = tuning_word(f_bb, FS).unwrap() as u32;
        // the oscillator runs at -f_bb
        let sum = tuning.register_word(0).wrapping_add(baseband);
        assert!(sum <= 1 || sum == u32::MAX);
    }

    #[test]
    fn parse_targets() {
        assert_eq!("auto".parse::<TuneTarget>().unwrap(), TuneTarget::Auto);
        assert_eq!(" AUTO\n".parse::<TuneTarget>().unwrap(), TuneTarget::Auto);
        assert_eq!(
            "477710921.52".parse::<TuneTarget>().unwrap(),
            TuneTarget::Frequency(477_710_921.52)
        );
        assert_eq!(
            "1e6".parse::<TuneTarget>().unwrap(),
            TuneTarget::Frequency(1e6)
        );
        for invalid in ["", "hello", "-1", "nan", "inf"] {
            assert!(invalid.parse::<TuneTarget>().is_err(), "{invalid}");
        }
    }

    #[test]
    fn retune_commits() {
        let (registers, mut writer, mut reader) = Registers::map();
        let mut controller = TuningController::new(FS);
        let tuning = controller
            .retune(
                &mut writer,
                &registers,
                TuneTarget::Frequency(10e6),
                None,
                0,
                &[1, 2, 3, 4],
            )
            .unwrap()
            .clone();
        reader.tick();
        reader.tick();
        assert!(reader.get(registers.dds_phase_reset));
        for k in 0..NUM_CHANNELS {
            assert_eq!(reader.get(registers.dds_ftw[k]), tuning.register_word(k));
            assert_eq!(reader.get(registers.pp_mult[k]), tuning.multipliers[k]);
        }
        assert_eq!(controller.target(), TuneTarget::Frequency(10e6));
    }

    #[test]
    fn failed_retune_keeps_tuning() {
        let (registers, mut writer, _) = Registers::map();
        let mut controller = TuningController::new(FS);
        controller
            .retune(
                &mut writer,
                &registers,
                TuneTarget::Frequency(10e6),
                None,
                0,
                &[1; NUM_CHANNELS],
            )
            .unwrap();
        let before = controller.current().cloned();
        let words = registers.dds_ftw.map(|p| writer.read(p));
        // auto tuning without a reference measurement
        assert!(controller
            .retune(
                &mut writer,
                &registers,
                TuneTarget::Auto,
                None,
                0,
                &[1; NUM_CHANNELS]
            )
            .is_err());
        assert_eq!(controller.current().cloned(), before);
        assert_eq!(controller.target(), TuneTarget::Frequency(10e6));
        assert_eq!(registers.dds_ftw.map(|p| writer.read(p)), words);
    }
}
