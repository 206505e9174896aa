//! vvm-httpd is the control and signal-processing daemon of a four-channel
//! vector voltmeter. It down-converts the channels with phase-coherent
//! oscillators tuned to the measured reference frequency (or to its
//! harmonics), decimates them, and reports their magnitudes and their phases
//! relative to the reference channel. It provides a RESTful API for the
//! instrument settings and results, and streams measurement batches to clients
//! in real time using WebSockets.

#![warn(missing_docs)]

pub mod app;
pub mod args;
pub mod calibration;
pub mod cdc;
pub mod ddc;
pub mod httpd;
pub mod instrument;
pub mod measure;
pub mod pipeline;
pub mod registers;
pub mod results;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod tuning;
