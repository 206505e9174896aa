//! vvm-httpd application.
//!
//! This module contains a top-level structure [`App`] that represents the whole
//! vvm-httpd application and a structure [`AppState`] that contains the
//! application state.

use crate::{
    args::Args,
    calibration::FlatCalibration,
    ddc::constants::NUM_CHANNELS,
    httpd,
    instrument::Instrument,
    pipeline::SampleDomain,
    registers::Registers,
    results::Results,
    scheduler::AcquisitionScheduler,
    settings,
    source::ToneSource,
};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// Phase offsets of the synthetic tones of each channel, in degrees.
const SIM_PHASE_OFFSETS: [f64; NUM_CHANNELS] = [0.0, 30.0, -60.0, 120.0];

/// vvm-httpd application.
///
/// This struct represents the vvm-httpd application. It owns the different
/// objects of which the application is formed, and runs them concurrently.
#[derive(Debug)]
pub struct App {
    httpd: httpd::Server,
    scheduler: AcquisitionScheduler,
    sample_domain: SampleDomain<ToneSource>,
    cancel: CancellationToken,
}

impl App {
    /// Creates a new application.
    #[tracing::instrument(name = "App::new", level = "debug")]
    pub async fn new(args: &Args) -> Result<App> {
        // Initialize and build application state
        let (registers, writer, reader) = Registers::map();
        let settings = settings::from_args(args)?;
        let source = ToneSource::new(
            args.sim_frequency,
            args.fs,
            settings::multipliers(&settings),
            args.sim_amplitude,
            SIM_PHASE_OFFSETS,
        )?;
        let instrument =
            Instrument::new(writer, registers, args.fs, settings, args.retune_tolerance)?;
        let state = AppState::new(instrument, Results::new());

        // Build application objects

        let sample_domain = SampleDomain::new(source, reader, registers, args.fs)?
            .with_rate_limit(Some(args.sim_sample_rate_limit));

        let scheduler = AcquisitionScheduler::new(
            state.clone(),
            Box::new(sample_domain.counter()),
            Box::new(sample_domain.trigger_count()),
            Box::new(FlatCalibration::default()),
            sample_domain.measurements(),
            args.startup_delay,
        )?;

        let httpd = httpd::Server::new(&args.listen, state).await?;

        Ok(App {
            httpd,
            scheduler,
            sample_domain,
            cancel: CancellationToken::new(),
        })
    }

    /// Runs the application.
    ///
    /// This only returns if one of the objects that form the application fails
    /// or if the application is interrupted with Ctrl-C.
    #[tracing::instrument(name = "App::run", level = "debug", skip_all)]
    pub async fn run(self) -> Result<()> {
        let App {
            httpd,
            scheduler,
            sample_domain,
            cancel,
        } = self;
        let sample_cancel = cancel.clone();
        let sample_task = tokio::task::spawn_blocking(move || sample_domain.run(sample_cancel));
        let ret = tokio::select! {
            ret = httpd.run() => ret,
            ret = scheduler.run(cancel.clone()) => ret,
            ret = sample_task => ret.map_err(anyhow::Error::from).and_then(|r| r),
            ret = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                ret.map_err(anyhow::Error::from)
            }
        };
        cancel.cancel();
        ret
    }
}

/// Application state.
///
/// This struct contains the application state that needs to be shared between
/// different modules, such as different Axum handlers in the HTTP server and
/// the acquisition scheduler. The struct behaves as an `Arc<...>`. It is
/// cheaply clonable and clones represent a reference to a shared object.
#[derive(Debug, Clone)]
pub struct AppState(Arc<State>);

#[derive(Debug)]
struct State {
    instrument: Mutex<Instrument>,
    results: Results,
}

impl AppState {
    /// Creates the application state.
    pub fn new(instrument: Instrument, results: Results) -> AppState {
        AppState(Arc::new(State {
            instrument: Mutex::new(instrument),
            results,
        }))
    }

    /// Gives access to the [`Instrument`] object of the application.
    pub fn instrument(&self) -> &Mutex<Instrument> {
        &self.0.instrument
    }

    /// Gives access to the measurement [`Results`] of the application.
    pub fn results(&self) -> &Results {
        &self.0.results
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use clap::Parser;
    let args = Args::parse_from(["vvm-httpd"]);
    let (registers, writer, _) = Registers::map();
    let settings = settings::from_args(&args).unwrap();
    let instrument =
        Instrument::new(writer, registers, args.fs, settings, args.retune_tolerance).unwrap();
    AppState::new(instrument, Results::new())
}
