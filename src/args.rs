//! vvm-httpd CLI arguments.
//!
//! This module contains the definition of the CLI arguments for the vvm-httpd
//! application. The operator settings given here are only the initial values,
//! since they can be changed later through the HTTP API.

use clap::Parser;
use std::net::SocketAddr;

/// vvm-httpd CLI arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Listen address for the HTTP server
    #[clap(long, default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,
    /// ADC sample rate [Hz]
    #[clap(long, default_value_t = 117.6e6)]
    pub fs: f64,
    /// Measurements per second
    #[clap(long, default_value_t = 30.0)]
    pub fps: f64,
    /// Nyquist band of the reference signal (band N starts at N * fs / 2)
    #[clap(long, default_value_t = 8)]
    pub nyquist_band: u32,
    /// Result averaging IIR smoothing factor
    #[clap(long, default_value_t = 10)]
    pub iir: u8,
    /// Bits to discard after the CIC decimator to prevent overflow
    #[clap(long, default_value_t = 2)]
    pub ddc_shift: u8,
    /// CIC decimation factor
    #[clap(long, default_value_t = 100)]
    pub ddc_deci: u16,
    /// Harmonic multiplier of channel A
    #[clap(long, default_value_t = 1)]
    pub m_a: u8,
    /// Harmonic multiplier of channel B
    #[clap(long, default_value_t = 1)]
    pub m_b: u8,
    /// Harmonic multiplier of channel C
    #[clap(long, default_value_t = 1)]
    pub m_c: u8,
    /// Pulse trigger channel (values above 3 select continuous mode)
    #[clap(long, default_value_t = 7)]
    pub pulse_channel: u8,
    /// Pulse trigger magnitude threshold
    #[clap(long, default_value_t = 1024)]
    pub pulse_threshold: u32,
    /// Delay between the pulse trigger and the acquisition [s]
    #[clap(long, default_value_t = 2e-6)]
    pub pulse_wait_pre: f64,
    /// Pulse acquisition window [s]
    #[clap(long, default_value_t = 20e-6)]
    pub pulse_wait_acq: f64,
    /// Hold-off time after a pulse acquisition [s]
    #[clap(long, default_value_t = 1.0)]
    pub pulse_wait_post: f64,
    /// Time to let the frequency counter settle before the first tuning [s]
    #[clap(long, default_value_t = 2.5)]
    pub startup_delay: f64,
    /// Reference frequency change that triggers a retune in auto mode [Hz]
    #[clap(long, default_value_t = 10.0)]
    pub retune_tolerance: f64,
    /// Frequency of the synthetic reference tone [Hz]
    #[clap(long, default_value_t = 477_710_921.52)]
    pub sim_frequency: f64,
    /// Amplitude of the synthetic tones, relative to the ADC full scale
    #[clap(long, default_value_t = 0.5)]
    pub sim_amplitude: f64,
    /// Rate at which synthetic samples are processed [samples/s] (0 means
    /// unlimited)
    #[clap(long, default_value_t = 2e6)]
    pub sim_sample_rate_limit: f64,
}
