//! Operator settings.
//!
//! This module contains the bounds of the operator settings and the functions
//! that validate and patch them. The settings themselves are the
//! [`Settings`](vvm_json::Settings) of the JSON API.

use crate::{
    args::Args,
    ddc::constants::{MAX_DECIMATION, MAX_SHIFT, MIN_DECIMATION, NUM_CHANNELS, OUTPUT_BITS},
    registers::{MULTIPLIER_BITS, PULSE_CHANNEL_BITS},
};
use anyhow::Result;
use std::{fmt::Display, ops::RangeInclusive};
use vvm_json::{PatchSettings, Settings};

/// Measurements per second.
pub const FPS: RangeInclusive<f64> = 0.01..=120.0;
/// Nyquist bands.
pub const NYQUIST_BAND: RangeInclusive<u32> = 0..=13;
/// Result IIR smoothing factor.
pub const IIR: RangeInclusive<u8> = 0..=13;
/// CIC output shift.
pub const DDC_SHIFT: RangeInclusive<u8> = 0..=MAX_SHIFT;
/// CIC decimation factor.
pub const DDC_DECI: RangeInclusive<u16> = MIN_DECIMATION..=MAX_DECIMATION;
/// Harmonic multipliers.
pub const MULTIPLIER: RangeInclusive<u8> = 1..=(1 << MULTIPLIER_BITS) - 1;
/// Pulse trigger channel.
pub const PULSE_CHANNEL: RangeInclusive<u8> = 0..=(1 << PULSE_CHANNEL_BITS) - 1;
/// Pulse trigger threshold.
pub const PULSE_THRESHOLD: RangeInclusive<u32> = 0..=(1 << OUTPUT_BITS) - 1;
/// Pulse trigger windows, in seconds.
pub const PULSE_WAIT: RangeInclusive<f64> = 0.0..=10.0;

fn check<T: PartialOrd + Display>(name: &str, value: T, range: &RangeInclusive<T>) -> Result<()> {
    if !range.contains(&value) {
        anyhow::bail!(
            "{name} = {value} outside of [{}, {}]",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

/// Validates the settings.
pub fn validate(settings: &Settings) -> Result<()> {
    check("fps", settings.fps, &FPS)?;
    check("nyquist_band", settings.nyquist_band, &NYQUIST_BAND)?;
    check("iir", settings.iir, &IIR)?;
    check("ddc_shift", settings.ddc_shift, &DDC_SHIFT)?;
    check("ddc_deci", settings.ddc_deci, &DDC_DECI)?;
    check("m_a", settings.m_a, &MULTIPLIER)?;
    check("m_b", settings.m_b, &MULTIPLIER)?;
    check("m_c", settings.m_c, &MULTIPLIER)?;
    check("pulse_channel", settings.pulse_channel, &PULSE_CHANNEL)?;
    check("pulse_threshold", settings.pulse_threshold, &PULSE_THRESHOLD)?;
    check("pulse_wait_pre", settings.pulse_wait_pre, &PULSE_WAIT)?;
    check("pulse_wait_acq", settings.pulse_wait_acq, &PULSE_WAIT)?;
    check("pulse_wait_post", settings.pulse_wait_post, &PULSE_WAIT)?;
    Ok(())
}

/// Steps the Nyquist band, clamping the result to the valid bands.
pub fn step_nyquist_band(band: u32, step: i32) -> u32 {
    let band = i64::from(band) + i64::from(step);
    band.clamp(
        i64::from(*NYQUIST_BAND.start()),
        i64::from(*NYQUIST_BAND.end()),
    ) as u32
}

macro_rules! patch_fields {
    ($settings:expr, $patch:expr, $($field:ident),*) => {
        $(
            if let Some(value) = $patch.$field {
                $settings.$field = value;
            }
        )*
    }
}

/// Applies a patch to the settings.
///
/// Returns the patched settings if all of them are valid. An absolute
/// `nyquist_band` is applied before a `nyquist_band_step`.
pub fn apply_patch(settings: &Settings, patch: &PatchSettings) -> Result<Settings> {
    let mut patched = settings.clone();
    patch_fields!(
        patched,
        patch,
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
    );
    if let Some(step) = patch.nyquist_band_step {
        patched.nyquist_band = step_nyquist_band(patched.nyquist_band, step);
    }
    validate(&patched)?;
    Ok(patched)
}

/// Returns the harmonic multipliers of all the channels.
///
/// The multiplier of the reference channel is always 1.
pub fn multipliers(settings: &Settings) -> [u8; NUM_CHANNELS] {
    [1, settings.m_a, settings.m_b, settings.m_c]
}

/// Converts a duration into sample clock cycles.
pub fn seconds_to_cycles(seconds: f64, samp_rate: f64) -> Result<u32> {
    let cycles = (seconds * samp_rate).round();
    if !(0.0..=f64::from(u32::MAX)).contains(&cycles) {
        anyhow::bail!("{seconds} s is not representable in sample clock cycles");
    }
    Ok(cycles as u32)
}

/// Builds the initial settings from the command line arguments.
pub fn from_args(args: &Args) -> Result<Settings> {
    let settings = Settings {
        fps: args.fps,
        nyquist_band: args.nyquist_band,
        iir: args.iir,
        ddc_shift: args.ddc_shift,
        ddc_deci: args.ddc_deci,
        m_a: args.m_a,
        m_b: args.m_b,
        m_c: args.m_c,
        pulse_channel: args.pulse_channel,
        pulse_threshold: args.pulse_threshold,
        pulse_wait_pre: args.pulse_wait_pre,
        pulse_wait_acq: args.pulse_wait_acq,
        pulse_wait_post: args.pulse_wait_post,
    };
    validate(&settings)?;
    Ok(settings)
}
