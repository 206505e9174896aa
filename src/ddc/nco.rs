//! Numerically controlled oscillator.

use super::constants::{FTW_BITS, LO_BITS, LUT_BITS};
use std::sync::OnceLock;

/// Amplitude of the local oscillator outputs.
pub const LO_AMPLITUDE: i32 = (1 << (LO_BITS - 1)) - 1;

// One period of the cosine, quantized to LO_BITS.
fn table() -> &'static [i32] {
    static TABLE: OnceLock<Vec<i32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let size = 1usize << LUT_BITS;
        (0..size)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * n as f64 / size as f64;
                (f64::from(LO_AMPLITUDE) * phase.cos()).round() as i32
            })
            .collect()
    })
}

/// Numerically controlled oscillator.
///
/// The oscillator is a phase accumulator of [`FTW_BITS`] bits. Its cosine and
/// sine outputs are looked up from the upper [`LUT_BITS`] bits of the
/// accumulator.
#[derive(Debug, Clone, Default)]
pub struct Oscillator {
    accumulator: u32,
}

impl Oscillator {
    /// Creates an oscillator with the accumulator at zero.
    pub fn new() -> Oscillator {
        Oscillator::default()
    }

    /// Returns the phase accumulator.
    pub fn accumulator(&self) -> u32 {
        self.accumulator
    }

    /// Advances the oscillator by one sample clock cycle.
    ///
    /// The accumulator advances by the tuning word `ftw`, unless `phase_reset`
    /// is set, in which case it is forced to zero during this cycle. Returns
    /// the cosine and sine outputs for the new accumulator value.
    pub fn tick(&mut self, ftw: u32, phase_reset: bool) -> (i32, i32) {
        self.accumulator = if phase_reset {
            0
        } else {
            self.accumulator.wrapping_add(ftw)
        };
        self.output()
    }

    /// Returns the cosine and sine for the current accumulator value.
    pub fn output(&self) -> (i32, i32) {
        let table = table();
        let mask = table.len() - 1;
        let index = (self.accumulator >> (FTW_BITS - LUT_BITS)) as usize;
        let quarter = table.len() / 4;
        (table[index], table[index.wrapping_sub(quarter) & mask])
    }
}
