//! Acquisition scheduler.
//!
//! The acquisition scheduler runs the measurement cycles of the instrument.
//! Cycles are aligned to the wall-clock instants `k / fps`. In each cycle the
//! scheduler does the housekeeping (measuring the reference frequency and
//! tracking it in auto tuning mode) at most once per second, decides whether
//! to report depending on the trigger mode, and reports a calibrated
//! measurement batch.

use crate::{
    app::AppState,
    calibration::Calibration,
    ddc::constants::NUM_CHANNELS,
    measure::{CounterHandle, RawMeasurement, TriggerCount},
    tuning::TuneTarget,
};
use anyhow::Result;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vvm_json::MeasurementBatch;

/// Minimum interval between housekeeping tasks, in seconds.
pub const HOUSEKEEPING_INTERVAL: f64 = 1.0;

/// Number of trigger window durations without triggers after which the trigger
/// is considered stale.
pub const TRIGGER_TIMEOUT_WINDOWS: f64 = 3.0;

/// Reference frequency oracle.
pub trait ReferenceCounter: Send + std::fmt::Debug {
    /// Measures the reference frequency aliased to the first Nyquist zone, in
    /// Hz.
    fn measure_reference_frequency(&mut self) -> Result<f64>;
}

impl ReferenceCounter for CounterHandle {
    fn measure_reference_frequency(&mut self) -> Result<f64> {
        self.frequency()
            .ok_or_else(|| anyhow::anyhow!("the frequency counter has no measurement"))
    }
}

/// External trigger counter.
///
/// The count is monotonic.
pub trait TriggerCounter: Send + std::fmt::Debug {
    /// Returns the number of triggers so far.
    fn trigger_count(&self) -> u64;
}

impl TriggerCounter for TriggerCount {
    fn trigger_count(&self) -> u64 {
        self.get()
    }
}

/// Trigger mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TriggerMode {
    /// A measurement is reported in every cycle.
    Continuous,
    /// A measurement is reported only after a trigger.
    Pulsed,
}

impl TriggerMode {
    /// Returns the trigger mode selected by a pulse trigger channel.
    ///
    /// Channels that do not exist select the continuous mode.
    pub fn from_channel(channel: u8) -> TriggerMode {
        if usize::from(channel) < NUM_CHANNELS {
            TriggerMode::Pulsed
        } else {
            TriggerMode::Continuous
        }
    }
}

/// Trigger state.
///
/// This keeps the last trigger count seen by the scheduler.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TriggerState {
    last_seen_count: u64,
}

impl TriggerState {
    /// Creates a trigger state which has seen `count` triggers.
    pub fn new(count: u64) -> TriggerState {
        TriggerState {
            last_seen_count: count,
        }
    }

    /// Returns the last trigger count seen.
    pub fn last_seen_count(&self) -> u64 {
        self.last_seen_count
    }

    /// Decides whether to report in this cycle.
    ///
    /// In continuous mode this always reports. In pulsed mode it reports only
    /// if `trigger_count` has advanced since the last poll. In both cases
    /// `trigger_count` is recorded as seen.
    pub fn poll(&mut self, mode: TriggerMode, trigger_count: u64) -> bool {
        let advanced = trigger_count > self.last_seen_count;
        self.last_seen_count = trigger_count;
        match mode {
            TriggerMode::Continuous => true,
            TriggerMode::Pulsed => advanced,
        }
    }
}

/// Returns the first cycle boundary strictly after `now`.
///
/// Cycle boundaries are the instants `k / fps`, with times in seconds.
pub fn next_cycle_boundary(now: f64, fps: f64) -> f64 {
    let next = ((now * fps).floor() + 1.0) / fps;
    // rounding can give back a boundary equal to now
    if next > now {
        next
    } else {
        next + 1.0 / fps
    }
}

/// Scheduler state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SchedulerState {
    /// The scheduler has not run any cycle yet.
    Idle,
    /// The scheduler is running measurement cycles.
    Running,
}

/// Summary of a measurement cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct CycleReport {
    /// Whether the housekeeping was done in this cycle.
    pub housekeeping: bool,
    /// Epoch of the batch reported in this cycle, if any.
    pub batch: Option<u64>,
}

/// Acquisition scheduler.
#[derive(Debug)]
pub struct AcquisitionScheduler {
    app: AppState,
    counter: Box<dyn ReferenceCounter>,
    triggers: Box<dyn TriggerCounter>,
    calibration: Box<dyn Calibration>,
    measurements: watch::Receiver<Option<RawMeasurement>>,
    startup_delay: f64,
    state: SchedulerState,
    trigger: TriggerState,
    mode: TriggerMode,
    epoch: u64,
    last_housekeeping: Option<f64>,
    // time of the last trigger, or of the start of the pulsed mode
    last_trigger: f64,
}

impl AcquisitionScheduler {
    /// Creates an acquisition scheduler.
    ///
    /// The scheduler waits `startup_delay` seconds when it is run before the
    /// first cycle, to let the frequency counter produce a measurement.
    pub fn new(
        app: AppState,
        counter: Box<dyn ReferenceCounter>,
        triggers: Box<dyn TriggerCounter>,
        calibration: Box<dyn Calibration>,
        measurements: watch::Receiver<Option<RawMeasurement>>,
        startup_delay: f64,
    ) -> Result<AcquisitionScheduler> {
        if !(startup_delay.is_finite() && startup_delay >= 0.0) {
            anyhow::bail!("invalid startup delay {startup_delay}");
        }
        let trigger = TriggerState::new(triggers.trigger_count());
        Ok(AcquisitionScheduler {
            app,
            counter,
            triggers,
            calibration,
            measurements,
            startup_delay,
            state: SchedulerState::Idle,
            trigger,
            mode: TriggerMode::Continuous,
            epoch: 0,
            last_housekeeping: None,
            last_trigger: 0.0,
        })
    }

    /// Returns the scheduler state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns the trigger state.
    pub fn trigger_state(&self) -> &TriggerState {
        &self.trigger
    }

    /// Runs the scheduler.
    ///
    /// This returns when `cancel` is cancelled. Cancellation is only observed
    /// between cycles.
    #[tracing::instrument(name = "AcquisitionScheduler::run", level = "debug", skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(startup_delay = self.startup_delay, "scheduler idle");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(self.startup_delay)) => {}
            _ = cancel.cancelled() => return Ok(()),
        }
        loop {
            let report = self.cycle(wall_clock()?);
            tracing::trace!(?report, "cycle done");
            let fps = self.app.instrument().lock().unwrap().settings().fps;
            let now = wall_clock()?;
            let wait = (next_cycle_boundary(now, fps) - now).max(0.0);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
                _ = cancel.cancelled() => {
                    tracing::info!(epoch = self.epoch, "scheduler stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Runs a measurement cycle.
    ///
    /// The time `now` is given in seconds. The first cycle takes the scheduler
    /// to the running state, doing the housekeeping and an auto tuning.
    pub fn cycle(&mut self, now: f64) -> CycleReport {
        let housekeeping = self
            .last_housekeeping
            .map_or(true, |last| now - last >= HOUSEKEEPING_INTERVAL);
        if housekeeping {
            self.last_housekeeping = Some(now);
            self.housekeeping();
        }

        let mut instrument = self.app.instrument().lock().unwrap();
        let queued = instrument.flush_commits();
        if queued != 0 {
            tracing::debug!(queued, "configuration commits still deferred");
        }
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Running;
            self.last_trigger = now;
            tracing::info!("scheduler running");
            if instrument.tune(TuneTarget::Auto).is_err() {
                if let Err(error) = instrument.phase_reset() {
                    tracing::error!("phase reset failed: {error:#}");
                }
            }
        } else if housekeeping {
            if let Err(error) = instrument.track_reference() {
                tracing::warn!("could not track the reference frequency: {error:#}");
            }
        }

        let mode = instrument.trigger_mode();
        if mode != self.mode {
            tracing::info!(?mode, "trigger mode changed");
            self.mode = mode;
            self.last_trigger = now;
        }
        let trigger_count = self.triggers.trigger_count();
        let report = self.trigger.poll(mode, trigger_count);
        let timed_out = match mode {
            TriggerMode::Continuous => false,
            TriggerMode::Pulsed => {
                if report {
                    self.last_trigger = now;
                }
                now - self.last_trigger
                    > TRIGGER_TIMEOUT_WINDOWS * instrument.trigger_windows_duration()
            }
        };
        self.app.results().set_trigger_timed_out(timed_out);
        if !report {
            return CycleReport {
                housekeeping,
                batch: None,
            };
        }

        let Some(raw) = self.measurements.borrow().clone() else {
            tracing::debug!("no measurement available yet");
            return CycleReport {
                housekeeping,
                batch: None,
            };
        };
        // without a reference measurement, the tones are calibrated at the
        // manual tuning frequency
        let f_ref = instrument.reference_frequency();
        let Some(f_cal) = f_ref.or_else(|| instrument.tuning().map(|t| t.frequency)) else {
            tracing::debug!("no reference frequency available yet");
            return CycleReport {
                housekeeping,
                batch: None,
            };
        };
        let frequencies = instrument
            .multipliers()
            .map(|m| f_cal * f64::from(m));
        let shift = instrument.settings().ddc_shift;
        drop(instrument);
        let calibrated = match self.calibration.apply_calibration(&raw, shift, &frequencies) {
            Ok(calibrated) => calibrated,
            Err(error) => {
                tracing::warn!("calibration failed: {error:#}");
                return CycleReport {
                    housekeeping,
                    batch: None,
                };
            }
        };

        self.epoch += 1;
        let batch = MeasurementBatch {
            epoch: self.epoch,
            timestamp: chrono::Utc::now().to_rfc3339(),
            magnitudes: calibrated.magnitudes_dbm.to_vec(),
            phases: calibrated.phases_deg.to_vec(),
            raw_magnitudes: raw.magnitudes.to_vec(),
            trigger_count: (mode == TriggerMode::Pulsed).then_some(trigger_count),
            f_ref,
            f_cal,
        };
        if let Err(error) = self.app.results().publish_batch(batch) {
            tracing::error!("could not publish measurement batch: {error:#}");
            return CycleReport {
                housekeeping,
                batch: None,
            };
        }
        CycleReport {
            housekeeping,
            batch: Some(self.epoch),
        }
    }

    fn housekeeping(&mut self) {
        let measurement = self.counter.measure_reference_frequency();
        let mut instrument = self.app.instrument().lock().unwrap();
        match measurement {
            Ok(frequency) => {
                tracing::debug!(frequency, "reference frequency measured");
                instrument.set_reference(frequency);
            }
            Err(error) => tracing::warn!(
                last = ?instrument.reference_baseband(),
                "reference frequency measurement failed: {error:#}"
            ),
        }
        self.app.results().set_reference(
            instrument.reference_baseband(),
            instrument.reference_frequency(),
        );
    }
}

fn wall_clock() -> Result<f64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64())
}
