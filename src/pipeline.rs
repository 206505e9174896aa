//! Sample domain.
//!
//! This module contains the sample domain of the instrument, which runs in its
//! own thread. It reads samples from an [`AdcSource`], clocks the
//! configuration bus reader and the [`Ddc`], and turns the decimated output
//! into measurements, which are published for the control domain.

use crate::{
    cdc::ConfigReader,
    ddc::{constants::NUM_CHANNELS, Ddc},
    measure::{
        CounterHandle, Extractor, FrameAssembler, FrequencyCounter, IqFrame, PulseTrigger,
        RawMeasurement, TriggerCount, TriggerEvent, TriggerWindows,
    },
    registers::Registers,
    source::AdcSource,
};
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Number of samples read from the source at once.
pub const BLOCK_SIZE: usize = 4096;

/// Number of samples in each frequency counter gate.
pub const COUNTER_GATE: u64 = 1 << 20;

/// Sample domain.
///
/// The sample domain is run with [`SampleDomain::run`], which blocks, so it
/// should be run in its own thread.
#[derive(Debug)]
pub struct SampleDomain<S> {
    source: S,
    reader: ConfigReader,
    registers: Registers,
    ddc: Ddc,
    assembler: FrameAssembler,
    extractor: Extractor,
    counter: FrequencyCounter,
    trigger: PulseTrigger,
    measurements: watch::Sender<Option<RawMeasurement>>,
    rate_limit: Option<f64>,
}

impl<S: AdcSource> SampleDomain<S> {
    /// Creates the sample domain.
    ///
    /// The `reader` must belong to the same configuration bus as `registers`.
    /// The `samp_rate` is the ADC sample rate, which is used to scale the
    /// frequency counter measurements.
    pub fn new(
        source: S,
        reader: ConfigReader,
        registers: Registers,
        samp_rate: f64,
    ) -> Result<SampleDomain<S>> {
        let ddc = Ddc::new(&reader, &registers)?;
        let (measurements, _) = watch::channel(None);
        Ok(SampleDomain {
            source,
            reader,
            registers,
            ddc,
            assembler: FrameAssembler::new(),
            extractor: Extractor::new(),
            counter: FrequencyCounter::new(COUNTER_GATE, samp_rate),
            trigger: PulseTrigger::new(),
            measurements,
            rate_limit: None,
        })
    }

    /// Limits the rate at which samples are processed.
    ///
    /// This is used with synthetic sources, which would otherwise run as fast
    /// as possible. A `None` or non-positive limit disables rate limiting.
    pub fn with_rate_limit(mut self, samples_per_second: Option<f64>) -> SampleDomain<S> {
        self.rate_limit = samples_per_second.filter(|&rate| rate > 0.0);
        self
    }

    /// Returns a receiver for the latest measurement.
    ///
    /// In continuous mode the measurement is updated with each IQ frame. In
    /// pulsed mode it is updated at the end of each acquisition window.
    pub fn measurements(&self) -> watch::Receiver<Option<RawMeasurement>> {
        self.measurements.subscribe()
    }

    /// Returns a handle to the frequency counter measurements.
    pub fn counter(&self) -> CounterHandle {
        self.counter.handle()
    }

    /// Returns a handle to the pulse trigger acquisition count.
    pub fn trigger_count(&self) -> TriggerCount {
        self.trigger.count()
    }

    /// Runs the sample domain.
    ///
    /// This blocks until `cancel` is cancelled or the source fails.
    #[tracing::instrument(name = "SampleDomain::run", level = "debug", skip_all)]
    pub fn run(mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(rate_limit = ?self.rate_limit, "sample domain running");
        let mut block = vec![[0; NUM_CHANNELS]; BLOCK_SIZE];
        let start = Instant::now();
        let mut processed: u64 = 0;
        while !cancel.is_cancelled() {
            self.source.read_block(&mut block)?;
            for adc in &block {
                self.tick(adc);
            }
            processed += block.len() as u64;
            if let Some(rate) = self.rate_limit {
                let due = Duration::from_secs_f64(processed as f64 / rate);
                if let Some(wait) = due.checked_sub(start.elapsed()) {
                    std::thread::sleep(wait);
                }
            }
        }
        tracing::info!(processed, "sample domain stopped");
        Ok(())
    }

    /// Processes one sample clock cycle.
    pub fn tick(&mut self, adc: &[i16; NUM_CHANNELS]) {
        self.reader.tick();
        self.counter.push(adc[0]);
        let sample = self.ddc.tick(adc, &self.reader, &self.registers);
        if let Some(frame) = self.assembler.push(sample) {
            self.process_frame(&frame);
        }
    }

    fn process_frame(&mut self, frame: &IqFrame) {
        let reader = &self.reader;
        let multipliers = self.registers.pp_mult.map(|p| reader.get(p));
        let iir = reader.get(self.registers.iir);
        let measurement = self.extractor.process(frame, &multipliers, iir);
        let channel = usize::from(reader.get(self.registers.pulse_channel));
        if channel >= NUM_CHANNELS {
            if !self.trigger.is_armed() {
                self.trigger.rearm();
            }
            self.measurements.send_replace(Some(measurement));
            return;
        }
        let windows = TriggerWindows {
            threshold: reader.get(self.registers.pulse_threshold),
            pre: u64::from(reader.get(self.registers.pulse_wait_pre)),
            acq: u64::from(reader.get(self.registers.pulse_wait_acq)),
            post: u64::from(reader.get(self.registers.pulse_wait_post)),
        };
        let cycles = u64::from(self.ddc.decimator().period());
        match self
            .trigger
            .frame(frame.magnitude(channel), &windows, cycles)
        {
            Some(TriggerEvent::Started) => self.extractor.restart(),
            Some(TriggerEvent::Acquired) => {
                self.measurements.send_replace(Some(measurement));
                self.trigger.count_acquisition();
            }
            None => (),
        }
    }
}
