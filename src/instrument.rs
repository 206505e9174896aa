//! Vector voltmeter instrument.
//!
//! This module contains the control domain driver of the instrument. It owns
//! the writer side of the configuration bus and writes the operator settings
//! and the tuning into the sample domain.

use crate::{
    cdc::ConfigWriter,
    ddc::constants::NUM_CHANNELS,
    registers::Registers,
    scheduler::TriggerMode,
    settings,
    tuning::{unfold, TuneTarget, Tuning, TuningController},
};
use anyhow::Result;
use vvm_json::{PatchSettings, Settings};

/// Vector voltmeter instrument.
///
/// This struct gives access to the configuration of the sample domain through
/// the configuration bus, and keeps the state of the control domain: the
/// operator settings, the tuning and the last reference frequency measurement.
#[derive(Debug)]
pub struct Instrument {
    writer: ConfigWriter,
    registers: Registers,
    tuning: TuningController,
    retune_tolerance: f64,
    // RAM-based cache of the operator settings and of the register values
    // derived from them. These are used to avoid writing registers whose value
    // does not change.
    settings: Settings,
    hardware: HardwareSettings,
    // baseband reference frequency given by the frequency counter
    reference: Option<f64>,
}

// Register values derived from the operator settings.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct HardwareSettings {
    ddc_deci: u16,
    ddc_shift: u8,
    iir: u8,
    pulse_channel: u8,
    pulse_threshold: u32,
    pulse_wait_pre: u32,
    pulse_wait_acq: u32,
    pulse_wait_post: u32,
}

impl HardwareSettings {
    fn new(settings: &Settings, samp_rate: f64) -> Result<HardwareSettings> {
        Ok(HardwareSettings {
            ddc_deci: settings.ddc_deci,
            ddc_shift: settings.ddc_shift,
            iir: settings.iir,
            pulse_channel: settings.pulse_channel,
            pulse_threshold: settings.pulse_threshold,
            pulse_wait_pre: settings::seconds_to_cycles(settings.pulse_wait_pre, samp_rate)?,
            pulse_wait_acq: settings::seconds_to_cycles(settings.pulse_wait_acq, samp_rate)?,
            pulse_wait_post: settings::seconds_to_cycles(settings.pulse_wait_post, samp_rate)?,
        })
    }
}

macro_rules! write_changed {
    ($self:ident, $new:expr, $old:expr, $($field:ident),*) => {
        $(
            if $old.map_or(true, |old| old.$field != $new.$field) {
                $self.writer.commit($self.registers.$field, $new.$field)?;
            }
        )*
    };
}

impl Instrument {
    /// Creates the instrument.
    ///
    /// The `settings` are validated and written to the sample domain. The
    /// instrument starts untuned and in auto tuning mode. In auto mode, a
    /// change of the reference frequency larger than `retune_tolerance` Hz
    /// causes a retune (see [`Instrument::track_reference`]).
    pub fn new(
        writer: ConfigWriter,
        registers: Registers,
        samp_rate: f64,
        settings: Settings,
        retune_tolerance: f64,
    ) -> Result<Instrument> {
        if !(samp_rate.is_finite() && samp_rate > 0.0) {
            anyhow::bail!("invalid sample rate {samp_rate}");
        }
        settings::validate(&settings)?;
        let hardware = HardwareSettings::new(&settings, samp_rate)?;
        let mut instrument = Instrument {
            writer,
            registers,
            tuning: TuningController::new(samp_rate),
            retune_tolerance,
            settings,
            hardware,
            reference: None,
        };
        instrument.write_hardware(&hardware, None)?;
        Ok(instrument)
    }

    fn write_hardware(
        &mut self,
        new: &HardwareSettings,
        old: Option<&HardwareSettings>,
    ) -> Result<()> {
        write_changed!(
            self,
            new,
            old,
            ddc_deci,
            ddc_shift,
            iir,
            pulse_channel,
            pulse_threshold,
            pulse_wait_pre,
            pulse_wait_acq,
            pulse_wait_post
        );
        Ok(())
    }

    /// Returns the ADC sample rate.
    pub fn samp_rate(&self) -> f64 {
        self.tuning.samp_rate()
    }

    /// Returns the operator settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the harmonic multipliers of all the channels.
    pub fn multipliers(&self) -> [u8; NUM_CHANNELS] {
        settings::multipliers(&self.settings)
    }

    /// Returns the trigger mode selected by the pulse trigger channel.
    pub fn trigger_mode(&self) -> TriggerMode {
        TriggerMode::from_channel(self.settings.pulse_channel)
    }

    /// Returns the total length of the pulse trigger windows, in seconds.
    pub fn trigger_windows_duration(&self) -> f64 {
        self.settings.pulse_wait_pre + self.settings.pulse_wait_acq + self.settings.pulse_wait_post
    }

    /// Modifies the operator settings.
    ///
    /// The patched settings are validated as a whole, and nothing is modified
    /// if any of them is invalid. Changing a harmonic multiplier, or changing
    /// the Nyquist band in auto tuning mode, retunes the instrument if it is
    /// already tuned.
    pub fn set_settings(&mut self, patch: &PatchSettings) -> Result<()> {
        let settings = settings::apply_patch(&self.settings, patch)?;
        let hardware = HardwareSettings::new(&settings, self.samp_rate())?;
        let old = self.hardware;
        self.write_hardware(&hardware, Some(&old))?;
        self.hardware = hardware;
        let auto = matches!(self.tuning.target(), TuneTarget::Auto);
        let retune = settings::multipliers(&settings) != self.multipliers()
            || (auto && settings.nyquist_band != self.settings.nyquist_band);
        if settings != self.settings {
            tracing::info!(?patch, "settings updated");
        }
        self.settings = settings;
        if retune && self.tuning.current().is_some() {
            let target = self.tuning.target();
            // a failed retune keeps the previous tuning and is logged by the
            // tuning controller
            let _ = self.tune(target);
        }
        Ok(())
    }

    /// Tunes the oscillators.
    ///
    /// See [`TuningController::retune`].
    pub fn tune(&mut self, target: TuneTarget) -> Result<&Tuning> {
        let multipliers = self.multipliers();
        self.tuning.retune(
            &mut self.writer,
            &self.registers,
            target,
            self.reference,
            self.settings.nyquist_band,
            &multipliers,
        )
    }

    /// Tunes the oscillators to a textual target.
    ///
    /// The `request` is either `auto` or a frequency in Hz. An invalid request
    /// is rejected with a warning and the tuning is not modified.
    pub fn tune_request(&mut self, request: &str) -> Result<&Tuning> {
        let target = match request.parse::<TuneTarget>() {
            Ok(target) => target,
            Err(error) => {
                tracing::warn!("rejected tuning request: {error:#}");
                return Err(error);
            }
        };
        self.tune(target)
    }

    /// Resets the phase of the oscillators.
    pub fn phase_reset(&mut self) -> Result<()> {
        self.writer.commit(self.registers.dds_phase_reset, true)?;
        tracing::debug!("phase reset");
        Ok(())
    }

    /// Returns the applied tuning, if any.
    pub fn tuning(&self) -> Option<&Tuning> {
        self.tuning.current()
    }

    /// Updates the baseband reference frequency measurement.
    pub fn set_reference(&mut self, baseband: f64) {
        self.reference = Some(baseband);
    }

    /// Returns the last baseband reference frequency measurement.
    pub fn reference_baseband(&self) -> Option<f64> {
        self.reference
    }

    /// Returns the absolute reference frequency.
    ///
    /// This is the last baseband measurement unfolded into the Nyquist band
    /// given by the settings.
    pub fn reference_frequency(&self) -> Option<f64> {
        self.reference
            .map(|f| unfold(f, self.settings.nyquist_band, self.samp_rate()))
    }

    /// Retunes if the reference frequency has moved.
    ///
    /// This only has an effect in auto tuning mode. The instrument is retuned
    /// if it is not tuned or if the absolute reference frequency differs from
    /// the tuning frequency by more than the retune tolerance. Returns `true`
    /// if the instrument was retuned.
    pub fn track_reference(&mut self) -> Result<bool> {
        if !matches!(self.tuning.target(), TuneTarget::Auto) {
            return Ok(false);
        }
        let Some(reference) = self.reference_frequency() else {
            return Ok(false);
        };
        if let Some(current) = self.tuning.current() {
            if (reference - current.frequency).abs() <= self.retune_tolerance {
                return Ok(false);
            }
        }
        self.tune(TuneTarget::Auto)?;
        Ok(true)
    }

    /// Applies the configuration commits that were deferred because a
    /// previous commit of the same register was in flight.
    ///
    /// Returns the number of commits that remain deferred.
    pub fn flush_commits(&mut self) -> usize {
        self.writer.flush()
    }

    /// Returns the tuning in JSON format.
    pub fn tuning_json(&self) -> vvm_json::Tuning {
        let current = self.tuning.current();
        vvm_json::Tuning {
            auto: matches!(self.tuning.target(), TuneTarget::Auto),
            frequency: current.map(|t| t.frequency),
            base_word: current.map(|t| t.base_word),
            words: current.map_or_else(Vec::new, |t| t.words.to_vec()),
        }
    }

    /// Returns the DDC configuration in JSON format.
    ///
    /// The values are read back from the configuration bus, including commits
    /// that are still deferred.
    pub fn ddc_json(&self) -> vvm_json::Ddc {
        let decimation = self.writer.read(self.registers.ddc_deci);
        let samp_rate = self.samp_rate();
        vvm_json::Ddc {
            decimation,
            shift: self.writer.read(self.registers.ddc_shift),
            nyquist_band: self.settings.nyquist_band,
            input_sampling_frequency: samp_rate,
            output_sampling_frequency: samp_rate / f64::from(decimation),
            tuning_words: self
                .registers
                .dds_ftw
                .iter()
                .map(|&p| self.writer.read(p))
                .collect(),
            multipliers: self
                .registers
                .pp_mult
                .iter()
                .map(|&p| self.writer.read(p))
                .collect(),
            queued_commits: self.writer.queued(),
            protocol_violations: self.writer.protocol_violations(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{args::Args, cdc::ConfigReader};
    use clap::Parser;

    const FS: f64 = 117.6e6;

    fn instrument() -> (Instrument, Registers, ConfigReader) {
        let (registers, writer, reader) = Registers::map();
        let settings = settings::from_args(&Args::parse_from(["vvm-httpd"])).unwrap();
        let instrument = Instrument::new(writer, registers, FS, settings, 10.0).unwrap();
        (instrument, registers, reader)
    }

    #[test]
    fn initial_settings_written() {
        let (_instrument, registers, mut reader) = instrument();
        reader.tick();
        reader.tick();
        assert_eq!(reader.get(registers.ddc_deci), 100);
        assert_eq!(reader.get(registers.pulse_wait_acq), 2352);
        assert_eq!(reader.get(registers.pulse_wait_post), 117_600_000);
    }

    #[test]
    fn rejected_patch() {
        let (mut instrument, _, _) = instrument();
        let before = instrument.ddc_json();
        let patch = PatchSettings {
            ddc_deci: Some(200),
            iir: Some(20),
            ..Default::default()
        };
        assert!(instrument.set_settings(&patch).is_err());
        assert_eq!(instrument.ddc_json(), before);
        assert_eq!(instrument.settings().iir, 10);
    }

    #[test]
    fn decimation_readback() {
        let (mut instrument, _, _) = instrument();
        let patch = PatchSettings {
            ddc_deci: Some(200),
            ddc_shift: Some(5),
            ..Default::default()
        };
        instrument.set_settings(&patch).unwrap();
        let ddc = instrument.ddc_json();
        assert_eq!((ddc.decimation, ddc.shift), (200, 5));
        assert_eq!(ddc.output_sampling_frequency, FS / 200.0);
    }

    #[test]
    fn multiplier_change_retunes() {
        let (mut instrument, _, _) = instrument();
        let base = instrument.tune(TuneTarget::Frequency(10e6)).unwrap().base_word;
        let patch = PatchSettings {
            m_b: Some(3),
            ..Default::default()
        };
        instrument.set_settings(&patch).unwrap();
        let tuning = instrument.tuning().unwrap();
        assert_eq!(tuning.words[2], base * 3);
        assert_eq!(tuning.target, TuneTarget::Frequency(10e6));
        assert_eq!(instrument.ddc_json().tuning_words[2], (base * 3) as u32);
        assert_eq!(instrument.ddc_json().multipliers, [1, 1, 3, 1]);
    }

    #[test]
    fn back_to_back_retunes_reach_sample_domain() {
        let (mut instrument, registers, mut reader) = instrument();
        let base = instrument.tune(TuneTarget::Frequency(10e6)).unwrap().base_word;
        reader.tick();
        for m_b in [3, 2] {
            let patch = PatchSettings {
                m_b: Some(m_b),
                ..Default::default()
            };
            instrument.set_settings(&patch).unwrap();
        }
        let ddc = instrument.ddc_json();
        assert!(ddc.queued_commits > 0);
        assert!(ddc.protocol_violations > 0);
        let mut phase_resets = 0;
        for _ in 0..16 {
            instrument.flush_commits();
            reader.tick();
            if reader.get(registers.dds_phase_reset) {
                phase_resets += 1;
            }
        }
        assert_eq!(instrument.flush_commits(), 0);
        assert_eq!(reader.get(registers.dds_ftw[2]), (base * 2) as u32);
        assert_eq!(reader.get(registers.pp_mult[2]), 2);
        assert_eq!(instrument.ddc_json().tuning_words[2], (base * 2) as u32);
        // one phase reset for the initial tuning and one per retune
        assert_eq!(phase_resets, 3);
    }

    #[test]
    fn band_change_retunes_in_auto() {
        let (mut instrument, _, _) = instrument();
        instrument.set_reference(7_310_921.52);
        let frequency = instrument.tune(TuneTarget::Auto).unwrap().frequency;
        assert!((frequency - (8.0 * FS / 2.0 + 7_310_921.52)).abs() < 1e-6);
        let patch = PatchSettings {
            nyquist_band: Some(2),
            ..Default::default()
        };
        instrument.set_settings(&patch).unwrap();
        let frequency = instrument.tuning().unwrap().frequency;
        assert!((frequency - 124_910_921.52).abs() < 1e-6);
    }

    #[test]
    fn band_change_keeps_manual_tuning() {
        let (mut instrument, _, _) = instrument();
        instrument.set_reference(7_310_921.52);
        instrument.tune_request("100e6").unwrap();
        let patch = PatchSettings {
            nyquist_band_step: Some(-1),
            ..Default::default()
        };
        instrument.set_settings(&patch).unwrap();
        assert_eq!(instrument.settings().nyquist_band, 7);
        assert_eq!(instrument.tuning().unwrap().frequency, 100e6);
        assert!(!instrument.track_reference().unwrap());
    }

    #[test]
    fn tracking() {
        let (mut instrument, _, _) = instrument();
        assert!(!instrument.track_reference().unwrap());
        instrument.set_reference(7_310_921.52);
        assert!(instrument.track_reference().unwrap());
        instrument.set_reference(7_310_926.52);
        assert!(!instrument.track_reference().unwrap());
        instrument.set_reference(7_311_021.52);
        assert!(instrument.track_reference().unwrap());
        let frequency = instrument.tuning().unwrap().frequency;
        assert!((frequency - (8.0 * FS / 2.0 + 7_311_021.52)).abs() < 1e-6);
    }

    #[test]
    fn invalid_tune_request() {
        let (mut instrument, _, _) = instrument();
        instrument.tune_request("auto").unwrap_err();
        instrument.tune_request("5e6").unwrap();
        let before = instrument.tuning().cloned();
        assert!(instrument.tune_request("five MHz").is_err());
        assert_eq!(instrument.tuning().cloned(), before);
        assert!(!instrument.tuning_json().auto);
    }
}
