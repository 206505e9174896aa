//! vvm-json contains the JSON schemas used by the vector voltmeter daemon
//! API.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

/// API JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api`. It contains the
/// settings, the down converter configuration, the tuning and the latest
/// results of the instrument.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Api {
    /// Operator settings.
    pub settings: Settings,
    /// Down converter configuration read back from the configuration bus.
    pub ddc: Ddc,
    /// Currently applied tuning.
    pub tuning: Tuning,
    /// Latest results.
    pub results: Results,
}

/// Settings JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api/settings`. It contains
/// the operator settings of the instrument.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Measurements per second.
    pub fps: f64,
    /// Nyquist band in which the reference signal is assumed to be.
    ///
    /// Band `n` covers the frequencies between `n * fs / 2` and `(n + 1) * fs
    /// / 2`.
    pub nyquist_band: u32,
    /// Result averaging smoothing factor.
    ///
    /// Each new result is averaged with a weight of `2^-iir`.
    pub iir: u8,
    /// Bits discarded after the CIC decimator to prevent overflow.
    pub ddc_shift: u8,
    /// Decimation factor of the CIC decimator.
    pub ddc_deci: u16,
    /// Harmonic multiplier of channel A.
    pub m_a: u8,
    /// Harmonic multiplier of channel B.
    pub m_b: u8,
    /// Harmonic multiplier of channel C.
    pub m_c: u8,
    /// Channel used for the pulse trigger.
    ///
    /// A channel larger than the last channel index selects continuous mode.
    pub pulse_channel: u8,
    /// Magnitude threshold for the pulse trigger, in raw decimator units.
    pub pulse_threshold: u32,
    /// Delay between the trigger and the acquisition window, in seconds.
    pub pulse_wait_pre: f64,
    /// Width of the acquisition window, in seconds.
    pub pulse_wait_acq: f64,
    /// Hold-off time after the acquisition window, in seconds.
    pub pulse_wait_post: f64,
}

/// Settings PATCH JSON schema.
///
/// This JSON schema corresponds to PATCH requests on `/api/settings`. It
/// contains a subset of the settings. All the values are validated before any
/// of them is applied.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PatchSettings {
    /// Measurements per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Nyquist band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nyquist_band: Option<u32>,
    /// Relative change of the Nyquist band.
    ///
    /// Unlike `nyquist_band`, the result of a step is clamped to the valid
    /// range of bands instead of being rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nyquist_band_step: Option<i32>,
    /// Result averaging smoothing factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iir: Option<u8>,
    /// Bits discarded after the CIC decimator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddc_shift: Option<u8>,
    /// Decimation factor of the CIC decimator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddc_deci: Option<u16>,
    /// Harmonic multiplier of channel A.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m_a: Option<u8>,
    /// Harmonic multiplier of channel B.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m_b: Option<u8>,
    /// Harmonic multiplier of channel C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m_c: Option<u8>,
    /// Channel used for the pulse trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_channel: Option<u8>,
    /// Magnitude threshold for the pulse trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_threshold: Option<u32>,
    /// Delay between the trigger and the acquisition window, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_wait_pre: Option<f64>,
    /// Width of the acquisition window, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_wait_acq: Option<f64>,
    /// Hold-off time after the acquisition window, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_wait_post: Option<f64>,
}

macro_rules! get_fields {
    ($struct:ident, $x:expr, $($field:ident),*) => {
        $struct {
            $(
                $field: Some($x.$field),
            )*
            ..Default::default()
        }
    }
}

impl From<Settings> for PatchSettings {
    fn from(val: Settings) -> PatchSettings {
        get_fields!(
            PatchSettings,
            val,
            fps,
            nyquist_band,
            iir,
            ddc_shift,
            ddc_deci,
            m_a,
            m_b,
            m_c,
            pulse_channel,
            pulse_threshold,
            pulse_wait_pre,
            pulse_wait_acq,
            pulse_wait_post
        )
    }
}

/// DDC JSON schema.
///
/// This JSON schema contains the configuration of the digital down converter,
/// as read back from the control side of the configuration bus.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Ddc {
    /// CIC decimation factor.
    pub decimation: u16,
    /// Output shift of the CIC decimator.
    pub shift: u8,
    /// Nyquist band.
    pub nyquist_band: u32,
    /// ADC sampling frequency in samples per second.
    pub input_sampling_frequency: f64,
    /// Sampling frequency of the decimated IQ stream in samples per second.
    pub output_sampling_frequency: f64,
    /// NCO tuning word of each channel.
    pub tuning_words: Vec<u32>,
    /// Phase processing multiplier of each channel.
    pub multipliers: Vec<u8>,
    /// Configuration commits waiting for the previous commit of the same
    /// register to be acknowledged by the down converter.
    pub queued_commits: usize,
    /// Number of registers modified while a commit was in flight.
    pub protocol_violations: u64,
}

/// Tuning JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api/tune`. It describes
/// the tuning currently applied to the oscillators.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tuning {
    /// Whether the tuning follows the measured reference frequency.
    pub auto: bool,
    /// Applied tuning frequency in Hz.
    ///
    /// This is `None` until the first successful tuning.
    pub frequency: Option<f64>,
    /// Base tuning word, before applying the harmonic multipliers.
    pub base_word: Option<u64>,
    /// Tuning word of each channel, before truncation to the accumulator
    /// width.
    pub words: Vec<u64>,
}

/// Results JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api/results`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Results {
    /// Reference frequency measured by the frequency counter (aliased to the
    /// first Nyquist zone), in Hz.
    pub f_ref_bb: Option<f64>,
    /// Absolute reference frequency for the selected Nyquist band, in Hz.
    pub f_ref: Option<f64>,
    /// Applied tuning frequency, in Hz.
    pub f_tune: Option<f64>,
    /// In pulsed mode, set when no trigger has been seen for a while.
    pub trigger_timed_out: bool,
    /// Latest measurement batch.
    pub batch: Option<MeasurementBatch>,
}

/// Measurement batch JSON schema.
///
/// A measurement batch contains the results of all the channels for a single
/// acquisition. Measurement batches are streamed on the `/measurements`
/// WebSocket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MeasurementBatch {
    /// Sequence number of the batch.
    pub epoch: u64,
    /// Time at which the batch was produced, in RFC 3339 format.
    pub timestamp: String,
    /// Calibrated magnitudes of the REF, A, B and C channels, in dBm.
    pub magnitudes: Vec<f64>,
    /// Calibrated phases of the A, B and C channels relative to REF, in
    /// degrees.
    pub phases: Vec<f64>,
    /// Uncalibrated magnitudes, in decimator units.
    pub raw_magnitudes: Vec<f64>,
    /// Trigger count at the time of the report (pulsed mode only).
    pub trigger_count: Option<u64>,
    /// Absolute reference frequency measured by the frequency counter, in Hz.
    ///
    /// This is `None` if the frequency counter has not given a measurement
    /// yet.
    pub f_ref: Option<f64>,
    /// Fundamental frequency used for the calibration, in Hz.
    ///
    /// This is the reference frequency, or the tuning frequency if there is no
    /// reference frequency measurement.
    pub f_cal: f64,
}
