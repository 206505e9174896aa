//! CIC decimator.
//!
//! The decimator filters and decimates several lanes in lock-step. The
//! integrators run at the full sample rate and the combs run once every
//! decimation period. The decimated values of all the lanes are then
//! serialized into a single stream, one lane per cycle, accompanied by a
//! strobe.

use super::constants::{cic_accumulator_bits, MAX_SHIFT, MIN_DECIMATION, OUTPUT_BITS, SHIFT_BASE};
use anyhow::Result;

/// Sample of the serialized decimator output.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct StreamSample {
    /// Output value. This is zero when `strobe` is not set.
    pub value: i32,
    /// Output valid strobe.
    pub strobe: bool,
    /// Set on the first cycle of each burst, which carries lane 0.
    pub first: bool,
}

/// CIC decimator.
#[derive(Debug, Clone)]
pub struct Decimator {
    accumulator_bits: u32,
    max_period: u16,
    period: u16,
    shift: u8,
    counter: u16,
    // [lane][stage]
    integrators: Vec<Vec<i64>>,
    combs: Vec<Vec<i64>>,
    serializer: Vec<i32>,
    next_out: usize,
    strobe_prev: bool,
}

fn wrap(value: i64, bits: u32) -> i64 {
    let unused = 64 - bits;
    value.wrapping_shl(unused).wrapping_shr(unused)
}

fn saturate(value: i64, bits: u32) -> i32 {
    let max = (1i64 << (bits - 1)) - 1;
    value.clamp(-max - 1, max) as i32
}

impl Decimator {
    /// Creates a new decimator.
    ///
    /// The decimator processes `lanes` lanes of `input_bits` bits with a CIC
    /// filter of `stages` stages. The accumulators are sized for decimation
    /// factors up to `max_period`. The decimator starts with a decimation
    /// factor of `max_period` and no output shift.
    ///
    /// # Panics
    ///
    /// Panics if `lanes` or `stages` is zero, or if the accumulators would need
    /// more than 64 bits.
    pub fn new(lanes: usize, stages: usize, input_bits: u32, max_period: u16) -> Decimator {
        assert!(lanes > 0 && stages > 0);
        let accumulator_bits = cic_accumulator_bits(input_bits, u64::from(max_period), stages);
        assert!(accumulator_bits <= 64, "CIC accumulators too wide");
        Decimator {
            accumulator_bits,
            max_period,
            period: max_period,
            shift: 0,
            counter: 0,
            integrators: vec![vec![0; stages]; lanes],
            combs: vec![vec![0; stages]; lanes],
            serializer: Vec::with_capacity(lanes),
            next_out: 0,
            strobe_prev: false,
        }
    }

    /// Returns the width of the accumulators.
    pub fn accumulator_bits(&self) -> u32 {
        self.accumulator_bits
    }

    /// Returns the decimation factor.
    pub fn period(&self) -> u16 {
        self.period
    }

    /// Returns the output shift.
    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Changes the decimation factor and output shift.
    ///
    /// All the accumulators, the decimation counter and the output serializer
    /// are reset together with the change. An invalid configuration is
    /// rejected and leaves the decimator untouched.
    pub fn configure(&mut self, period: u16, shift: u8) -> Result<()> {
        // the strobe must also go low between bursts
        let min_period = usize::from(MIN_DECIMATION).max(self.integrators.len() + 1);
        if !(min_period..=usize::from(self.max_period)).contains(&usize::from(period)) {
            anyhow::bail!(
                "decimation factor {period} outside of [{min_period}, {}]",
                self.max_period
            );
        }
        if shift > MAX_SHIFT {
            anyhow::bail!("output shift {shift} larger than {MAX_SHIFT}");
        }
        self.period = period;
        self.shift = shift;
        self.reset();
        Ok(())
    }

    /// Clears the state of the filter.
    pub fn reset(&mut self) {
        for lane in self.integrators.iter_mut().chain(self.combs.iter_mut()) {
            lane.fill(0);
        }
        self.counter = 0;
        self.serializer.clear();
        self.next_out = 0;
        self.strobe_prev = false;
    }

    /// Advances the decimator by one sample clock cycle.
    ///
    /// The `input` slice contains one sample for each lane.
    pub fn tick(&mut self, input: &[i32]) -> StreamSample {
        debug_assert_eq!(input.len(), self.integrators.len());
        let strobe = self.next_out < self.serializer.len();
        let value = if strobe {
            self.next_out += 1;
            self.serializer[self.next_out - 1]
        } else {
            0
        };
        let first = strobe && !self.strobe_prev;
        self.strobe_prev = strobe;

        let bits = self.accumulator_bits;
        for (stages, &x) in self.integrators.iter_mut().zip(input) {
            let mut carry = i64::from(x);
            for integrator in stages.iter_mut() {
                *integrator = wrap(integrator.wrapping_add(carry), bits);
                carry = *integrator;
            }
        }

        self.counter += 1;
        if self.counter >= self.period {
            self.counter = 0;
            self.decimate();
        }
        StreamSample {
            value,
            strobe,
            first,
        }
    }

    fn decimate(&mut self) {
        let bits = self.accumulator_bits;
        let shift = SHIFT_BASE + u32::from(self.shift);
        self.serializer.clear();
        self.next_out = 0;
        for (integrators, combs) in self.integrators.iter().zip(self.combs.iter_mut()) {
            let mut value = integrators[integrators.len() - 1];
            for delay in combs.iter_mut() {
                let difference = wrap(value.wrapping_sub(*delay), bits);
                *delay = value;
                value = difference;
            }
            self.serializer.push(saturate(value >> shift, OUTPUT_BITS));
        }
    }
}
