//! Digital down converter.
//!
//! This module contains a cycle-accurate model of the sample domain down
//! converter. Each of the four ADC channels is mixed to baseband by its own
//! [`Oscillator`](nco::Oscillator), and the I and Q products of all the
//! channels are decimated by a single CIC [`Decimator`](cic::Decimator), which
//! outputs a serialized stream `I0, Q0, I1, Q1, ..., I3, Q3` once per
//! decimation period.
//!
//! The down converter is configured through the configuration bus. Changes of
//! the decimation factor or the output shift reset the decimator in the same
//! cycle in which they are committed.

use crate::cdc::ConfigReader;
use crate::registers::Registers;
use anyhow::Result;
use cic::{Decimator, StreamSample};
use constants::{CIC_STAGES, MAX_DECIMATION, MIX_BITS, NUM_CHANNELS, NUM_LANES};
use nco::Oscillator;

pub mod cic;
pub mod constants;
pub mod mixer;
pub mod nco;

/// Digital down converter.
#[derive(Debug, Clone)]
pub struct Ddc {
    oscillators: [Oscillator; NUM_CHANNELS],
    decimator: Decimator,
    lanes: [i32; NUM_LANES],
}

impl Ddc {
    /// Creates a down converter.
    ///
    /// The decimator is configured with the values that the `reader` currently
    /// holds for the decimation and shift registers.
    pub fn new(reader: &ConfigReader, registers: &Registers) -> Result<Ddc> {
        let mut decimator = Decimator::new(NUM_LANES, CIC_STAGES, MIX_BITS, MAX_DECIMATION);
        decimator.configure(reader.get(registers.ddc_deci), reader.get(registers.ddc_shift))?;
        Ok(Ddc {
            oscillators: Default::default(),
            decimator,
            lanes: [0; NUM_LANES],
        })
    }

    /// Gives access to the oscillator of a channel.
    pub fn oscillator(&self, channel: usize) -> &Oscillator {
        &self.oscillators[channel]
    }

    /// Gives access to the decimator.
    pub fn decimator(&self) -> &Decimator {
        &self.decimator
    }

    /// Processes one sample of each ADC channel.
    ///
    /// This must be called once per sample clock cycle, after
    /// [`ConfigReader::tick`].
    pub fn tick(
        &mut self,
        adc: &[i16; NUM_CHANNELS],
        reader: &ConfigReader,
        registers: &Registers,
    ) -> StreamSample {
        if reader.committed(registers.ddc_deci) || reader.committed(registers.ddc_shift) {
            let period = reader.get(registers.ddc_deci);
            let shift = reader.get(registers.ddc_shift);
            match self.decimator.configure(period, shift) {
                Ok(()) => tracing::debug!(period, shift, "decimator reconfigured"),
                Err(error) => tracing::error!("decimator configuration rejected: {error:#}"),
            }
        }
        let phase_reset = reader.get(registers.dds_phase_reset);
        for (k, (oscillator, &sample)) in self.oscillators.iter_mut().zip(adc).enumerate() {
            let lo = oscillator.tick(reader.get(registers.dds_ftw[k]), phase_reset);
            let (i, q) = mixer::mix(sample, lo);
            self.lanes[2 * k] = i;
            self.lanes[2 * k + 1] = q;
        }
        self.decimator.tick(&self.lanes)
    }
}
