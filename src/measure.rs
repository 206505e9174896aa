//! Sample domain measurements.
//!
//! This module contains the processing that the sample domain does after the
//! down converter: assembling IQ frames from the serialized decimator output,
//! extracting magnitudes and relative phases, averaging them, counting the
//! frequency of the reference channel, and detecting pulses.

use crate::ddc::cic::StreamSample;
use crate::ddc::constants::{NUM_CHANNELS, NUM_LANES};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// IQ frame.
///
/// An IQ frame contains one decimated IQ sample of each channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct IqFrame {
    /// I and Q samples of each channel.
    pub iq: [(i32, i32); NUM_CHANNELS],
}

impl IqFrame {
    /// Returns the magnitude of a channel.
    pub fn magnitude(&self, channel: usize) -> f64 {
        let (i, q) = self.iq[channel];
        f64::from(i).hypot(f64::from(q))
    }

    /// Returns the phase of the tone of a channel with respect to its local
    /// oscillator, in radians.
    ///
    /// The mixer multiplies by the sine of the LO in the Q arm, so a tone
    /// leading the LO by `phi` gives a negative Q.
    pub fn tone_phase(&self, channel: usize) -> f64 {
        let (i, q) = self.iq[channel];
        (-f64::from(q)).atan2(f64::from(i))
    }
}

/// Assembles [`IqFrame`]s from the serialized decimator output.
#[derive(Debug, Clone, Default)]
pub struct FrameAssembler {
    values: [i32; NUM_LANES],
    received: Option<usize>,
}

impl FrameAssembler {
    /// Creates a frame assembler.
    pub fn new() -> FrameAssembler {
        FrameAssembler::default()
    }

    /// Processes a sample of the decimator output.
    ///
    /// Returns a frame when its last lane is received. Incomplete bursts are
    /// discarded.
    pub fn push(&mut self, sample: StreamSample) -> Option<IqFrame> {
        if !sample.strobe {
            self.received = None;
            return None;
        }
        if sample.first {
            self.received = Some(0);
        }
        let n = self.received?;
        self.values[n] = sample.value;
        if n + 1 < NUM_LANES {
            self.received = Some(n + 1);
            return None;
        }
        self.received = None;
        let mut frame = IqFrame::default();
        for (iq, lanes) in frame.iq.iter_mut().zip(self.values.chunks_exact(2)) {
            *iq = (lanes[0], lanes[1]);
        }
        Some(frame)
    }
}

/// Uncalibrated measurement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMeasurement {
    /// Magnitude of each channel, in decimator units.
    pub magnitudes: [f64; NUM_CHANNELS],
    /// Phase of channels A, B and C relative to the reference, in degrees.
    pub phases: [f64; NUM_CHANNELS - 1],
}

/// Magnitude and phase extractor.
///
/// The extractor computes the magnitude of each channel and the phase of each
/// measured channel relative to the reference channel, taking into account the
/// phase processing multiplier of the channel: for a channel with multiplier
/// `m`, the relative phase is `phi_k - m * phi_0`. Magnitudes and unit phase
/// vectors are averaged with an exponential filter of weight `2^-iir`.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    magnitudes: [f64; NUM_CHANNELS],
    // averaged (cos, sin) of each relative phase
    phasors: [(f64, f64); NUM_CHANNELS - 1],
    primed: bool,
}

impl Extractor {
    /// Creates an extractor.
    pub fn new() -> Extractor {
        Extractor::default()
    }

    /// Restarts the averaging.
    ///
    /// The next frame replaces the averages instead of being averaged with
    /// them.
    pub fn restart(&mut self) {
        self.primed = false;
    }

    /// Processes a frame and returns the updated measurement.
    pub fn process(
        &mut self,
        frame: &IqFrame,
        multipliers: &[u8; NUM_CHANNELS],
        iir: u8,
    ) -> RawMeasurement {
        let alpha = if self.primed {
            0.5f64.powi(i32::from(iir))
        } else {
            1.0
        };
        self.primed = true;
        for (k, magnitude) in self.magnitudes.iter_mut().enumerate() {
            *magnitude += alpha * (frame.magnitude(k) - *magnitude);
        }
        let reference = frame.tone_phase(0);
        for (k, phasor) in (1..NUM_CHANNELS).zip(self.phasors.iter_mut()) {
            let relative = frame.tone_phase(k) - f64::from(multipliers[k]) * reference;
            let (sin, cos) = relative.sin_cos();
            phasor.0 += alpha * (cos - phasor.0);
            phasor.1 += alpha * (sin - phasor.1);
        }
        RawMeasurement {
            magnitudes: self.magnitudes,
            phases: self.phasors.map(|(cos, sin)| sin.atan2(cos).to_degrees()),
        }
    }
}

/// Frequency counter.
///
/// The counter measures the frequency of the reference ADC channel by timing
/// its rising zero crossings, interpolated linearly between samples, over a
/// gate of a fixed number of samples. Since it works on the ADC samples, it
/// measures the frequency aliased to the first Nyquist zone.
#[derive(Debug)]
pub struct FrequencyCounter {
    gate: u64,
    samp_rate: f64,
    elapsed: u64,
    previous: i16,
    first: Option<f64>,
    last: f64,
    crossings: u64,
    estimate: Arc<AtomicU64>,
}

/// Shared access to the last frequency counter measurement.
#[derive(Debug, Clone)]
pub struct CounterHandle(Arc<AtomicU64>);

impl CounterHandle {
    /// Returns the frequency measured in the last gate, in Hz.
    ///
    /// Returns `None` if no gate has finished yet or the last gate did not
    /// contain at least two zero crossings.
    pub fn frequency(&self) -> Option<f64> {
        let frequency = f64::from_bits(self.0.load(Ordering::Acquire));
        frequency.is_finite().then_some(frequency)
    }
}

impl FrequencyCounter {
    /// Creates a frequency counter.
    ///
    /// The `gate` parameter is the number of samples per measurement, and
    /// `samp_rate` is the ADC sample rate.
    pub fn new(gate: u64, samp_rate: f64) -> FrequencyCounter {
        FrequencyCounter {
            gate,
            samp_rate,
            elapsed: 0,
            previous: 0,
            first: None,
            last: 0.0,
            crossings: 0,
            estimate: Arc::new(AtomicU64::new(f64::NAN.to_bits())),
        }
    }

    /// Returns a handle to read the measurements of this counter.
    pub fn handle(&self) -> CounterHandle {
        CounterHandle(Arc::clone(&self.estimate))
    }

    /// Processes a sample of the reference channel.
    pub fn push(&mut self, sample: i16) {
        if self.previous < 0 && sample >= 0 {
            let fraction = -f64::from(self.previous) / (f64::from(sample) - f64::from(self.previous));
            let time = self.elapsed as f64 - 1.0 + fraction;
            if self.first.is_none() {
                self.first = Some(time);
            }
            self.last = time;
            self.crossings += 1;
        }
        self.previous = sample;
        self.elapsed += 1;
        if self.elapsed == self.gate {
            let frequency = match self.first {
                Some(first) if self.crossings >= 2 && self.last > first => {
                    (self.crossings - 1) as f64 / (self.last - first) * self.samp_rate
                }
                _ => f64::NAN,
            };
            self.estimate
                .store(frequency.to_bits(), Ordering::Release);
            self.elapsed = 0;
            self.first = None;
            self.crossings = 0;
        }
    }
}

/// Pulse trigger windows.
///
/// The window lengths are given in sample clock cycles.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct TriggerWindows {
    /// Magnitude threshold.
    pub threshold: u32,
    /// Cycles between the trigger and the acquisition window.
    pub pre: u64,
    /// Cycles in the acquisition window.
    pub acq: u64,
    /// Hold-off cycles after the acquisition window.
    pub post: u64,
}

/// Pulse trigger event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TriggerEvent {
    /// The acquisition window has started.
    Started,
    /// The acquisition window has finished.
    Acquired,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum TriggerPhase {
    Armed,
    Pre(u64),
    Acquire(u64),
    Hold(u64),
}

/// Pulse trigger.
///
/// When the magnitude of the trigger channel reaches the threshold, the
/// trigger waits for the `pre` window, acquires during the `acq` window and
/// then holds off for the `post` window before it is armed again.
#[derive(Debug)]
pub struct PulseTrigger {
    phase: TriggerPhase,
    count: Arc<AtomicU64>,
}

/// Shared access to the number of acquisitions done by a [`PulseTrigger`].
#[derive(Debug, Clone)]
pub struct TriggerCount(Arc<AtomicU64>);

impl TriggerCount {
    /// Returns the number of acquisitions.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for PulseTrigger {
    fn default() -> PulseTrigger {
        PulseTrigger::new()
    }
}

impl PulseTrigger {
    /// Creates an armed pulse trigger.
    pub fn new() -> PulseTrigger {
        PulseTrigger {
            phase: TriggerPhase::Armed,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a handle to read the acquisition count.
    pub fn count(&self) -> TriggerCount {
        TriggerCount(Arc::clone(&self.count))
    }

    /// Returns `true` if the trigger is waiting for a pulse.
    pub fn is_armed(&self) -> bool {
        self.phase == TriggerPhase::Armed
    }

    /// Aborts any acquisition in progress and arms the trigger.
    pub fn rearm(&mut self) {
        self.phase = TriggerPhase::Armed;
    }

    /// Advances the trigger by one IQ frame.
    ///
    /// The `magnitude` is the magnitude of the trigger channel in this frame,
    /// and `cycles` is the number of sample clock cycles per frame.
    pub fn frame(
        &mut self,
        magnitude: f64,
        windows: &TriggerWindows,
        cycles: u64,
    ) -> Option<TriggerEvent> {
        use TriggerPhase::*;
        let (phase, event) = match self.phase {
            Armed if magnitude >= f64::from(windows.threshold) => (Pre(windows.pre), None),
            Armed => (Armed, None),
            Pre(remaining) if remaining <= cycles => {
                (Acquire(windows.acq), Some(TriggerEvent::Started))
            }
            Pre(remaining) => (Pre(remaining - cycles), None),
            Acquire(remaining) if remaining <= cycles => {
                (Hold(windows.post), Some(TriggerEvent::Acquired))
            }
            Acquire(remaining) => (Acquire(remaining - cycles), None),
            Hold(remaining) if remaining <= cycles => (Armed, None),
            Hold(remaining) => (Hold(remaining - cycles), None),
        };
        self.phase = phase;
        event
    }

    /// Counts an acquisition.
    ///
    /// This should be called once the acquired measurement has been published.
    pub fn count_acquisition(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn burst(values: &[i32]) -> Vec<StreamSample> {
        values
            .iter()
            .enumerate()
            .map(|(n, &value)| StreamSample {
                value,
                strobe: true,
                first: n == 0,
            })
            .collect()
    }

    #[test]
    fn assemble_frames() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(StreamSample::default()), None);
        let samples = burst(&[1, 2, 3, 4, 5, 6, 7, 8]);
        for sample in &samples[..7] {
            assert_eq!(assembler.push(*sample), None);
        }
        let frame = assembler.push(samples[7]).unwrap();
        assert_eq!(frame.iq, [(1, 2), (3, 4), (5, 6), (7, 8)]);
        // interrupted burst
        for sample in &samples[..5] {
            assert_eq!(assembler.push(*sample), None);
        }
        assert_eq!(assembler.push(StreamSample::default()), None);
        // trailing samples of a burst whose start was missed
        assert_eq!(assembler.push(samples[5]), None);
        assert_eq!(assembler.push(samples[6]), None);
        assert_eq!(assembler.push(samples[7]), None);
        assert_eq!(assembler.push(StreamSample::default()), None);
        for sample in &samples[..7] {
            assert_eq!(assembler.push(*sample), None);
        }
        assert!(assembler.push(samples[7]).is_some());
    }

    fn phasor(magnitude: f64, degrees: f64) -> (i32, i32) {
        let phi = degrees.to_radians();
        (
            (magnitude * phi.cos()).round() as i32,
            (-magnitude * phi.sin()).round() as i32,
        )
    }

    #[test]
    fn relative_phases() {
        let mut extractor = Extractor::new();
        let frame = IqFrame {
            iq: [
                phasor(1e5, 40.0),
                phasor(2e5, 70.0),
                phasor(3e5, 80.0 + 30.0),
                phasor(4e5, 3.0 * 40.0 - 45.0),
            ],
        };
        let measurement = extractor.process(&frame, &[1, 1, 2, 3], 10);
        let expected = [30.0, 30.0, -45.0];
        for (phase, expected) in measurement.phases.iter().zip(expected) {
            assert!((phase - expected).abs() < 1e-2, "{phase} != {expected}");
        }
        for (k, magnitude) in measurement.magnitudes.iter().enumerate() {
            assert!((magnitude - (k + 1) as f64 * 1e5).abs() < 1.0);
        }
    }

    #[test]
    fn averaging() {
        let mut extractor = Extractor::new();
        let a = IqFrame {
            iq: [phasor(1000.0, 0.0); NUM_CHANNELS],
        };
        let b = IqFrame {
            iq: [
                phasor(3000.0, 0.0),
                phasor(3000.0, 90.0),
                phasor(3000.0, 0.0),
                phasor(3000.0, 0.0),
            ],
        };
        let multipliers = [1; NUM_CHANNELS];
        extractor.process(&a, &multipliers, 1);
        let measurement = extractor.process(&b, &multipliers, 1);
        assert!((measurement.magnitudes[0] - 2000.0).abs() < 1e-9);
        // average of 0 and 90 degrees
        assert!((measurement.phases[0] - 45.0).abs() < 1e-3);
        extractor.restart();
        let measurement = extractor.process(&b, &multipliers, 1);
        assert!((measurement.magnitudes[0] - 3000.0).abs() < 1e-9);
        assert!((measurement.phases[0] - 90.0).abs() < 1e-3);
    }

    #[test]
    fn phase_wraps() {
        let mut extractor = Extractor::new();
        let frame = IqFrame {
            iq: [
                phasor(1e6, -170.0),
                phasor(1e6, 170.0),
                phasor(1e6, -170.0),
                phasor(1e6, 0.0),
            ],
        };
        let measurement = extractor.process(&frame, &[1, 1, 1, 1], 0);
        assert!((measurement.phases[0] + 20.0).abs() < 1e-3);
        assert!(measurement.phases[1].abs() < 1e-3);
        assert!((measurement.phases[2] - 170.0).abs() < 1e-3);
    }

    #[test]
    fn frequency_counter() {
        let samp_rate = 117.6e6;
        let frequency = 7_310_921.52;
        let mut counter = FrequencyCounter::new(1 << 16, samp_rate);
        let handle = counter.handle();
        assert_eq!(handle.frequency(), None);
        for n in 0..(1 << 16) {
            let phase = 2.0 * std::f64::consts::PI * frequency * n as f64 / samp_rate + 0.3;
            counter.push((4000.0 * phase.cos()).round() as i16);
        }
        let measured = handle.frequency().unwrap();
        assert!((measured - frequency).abs() < 100.0, "{measured}");
        for _ in 0..(1 << 16) {
            counter.push(0);
        }
        assert_eq!(handle.frequency(), None);
    }

    #[test]
    fn pulse_trigger() {
        let windows = TriggerWindows {
            threshold: 100,
            pre: 20,
            acq: 40,
            post: 100,
        };
        let mut trigger = PulseTrigger::new();
        let count = trigger.count();
        for _ in 0..10 {
            assert_eq!(trigger.frame(50.0, &windows, 10), None);
        }
        assert_eq!(trigger.frame(150.0, &windows, 10), None);
        assert_eq!(trigger.frame(0.0, &windows, 10), None);
        assert_eq!(
            trigger.frame(0.0, &windows, 10),
            Some(TriggerEvent::Started)
        );
        for _ in 0..3 {
            assert_eq!(trigger.frame(0.0, &windows, 10), None);
        }
        assert_eq!(
            trigger.frame(0.0, &windows, 10),
            Some(TriggerEvent::Acquired)
        );
        trigger.count_acquisition();
        assert_eq!(count.get(), 1);
        // the hold-off ignores pulses
        for _ in 0..9 {
            assert_eq!(trigger.frame(500.0, &windows, 10), None);
            assert!(!trigger.is_armed());
        }
        assert_eq!(trigger.frame(500.0, &windows, 10), None);
        assert!(trigger.is_armed());
    }

    #[test]
    fn continuous_pulses() {
        let windows = TriggerWindows {
            threshold: 1,
            pre: 0,
            acq: 0,
            post: 0,
        };
        let mut trigger = PulseTrigger::new();
        let acquired = (0..40)
            .filter(|_| trigger.frame(10.0, &windows, 10) == Some(TriggerEvent::Acquired))
            .count();
        // armed, pre, acquire, hold
        assert_eq!(acquired, 10);
    }
}
