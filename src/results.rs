//! Measurement results.
//!
//! This module contains [`Results`], which holds the latest results of the
//! instrument and broadcasts each measurement batch, serialized to JSON, to
//! the websocket clients.

use anyhow::Result;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use vvm_json::MeasurementBatch;

/// Capacity of the measurement batch broadcast channel.
pub const CHANNEL_CAPACITY: usize = 16;

/// Measurement results.
///
/// This struct gives shared access to the latest results. It behaves as an
/// `Arc<...>`. Clones represent a reference to the same results.
#[derive(Debug, Clone)]
pub struct Results(Arc<Shared>);

#[derive(Debug)]
struct Shared {
    latest: Mutex<vvm_json::Results>,
    sender: broadcast::Sender<Bytes>,
}

impl Default for Results {
    fn default() -> Results {
        Results::new()
    }
}

impl Results {
    /// Creates empty results.
    pub fn new() -> Results {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Results(Arc::new(Shared {
            latest: Mutex::new(vvm_json::Results::default()),
            sender,
        }))
    }

    /// Subscribes to the measurement batch broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.0.sender.subscribe()
    }

    /// Returns a copy of the latest results.
    pub fn snapshot(&self) -> vvm_json::Results {
        self.0.latest.lock().unwrap().clone()
    }

    /// Updates the reference frequency.
    ///
    /// The `baseband` frequency is the one given by the frequency counter and
    /// `absolute` is its unfolding into the selected Nyquist band.
    pub fn set_reference(&self, baseband: Option<f64>, absolute: Option<f64>) {
        let mut latest = self.0.latest.lock().unwrap();
        latest.f_ref_bb = baseband;
        latest.f_ref = absolute;
    }

    /// Updates the pulse trigger staleness flag.
    pub fn set_trigger_timed_out(&self, timed_out: bool) {
        let mut latest = self.0.latest.lock().unwrap();
        if latest.trigger_timed_out != timed_out {
            tracing::info!(timed_out, "pulse trigger staleness changed");
        }
        latest.trigger_timed_out = timed_out;
    }

    /// Publishes a measurement batch.
    ///
    /// The batch replaces the latest one and is sent to all the subscribers.
    pub fn publish_batch(&self, batch: MeasurementBatch) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(&batch)?);
        self.0.latest.lock().unwrap().batch = Some(batch);
        if self.0.sender.receiver_count() > 0 {
            // It is ok if send returns Err, because the receivers might have
            // been dropped in the meantime.
            let _ = self.0.sender.send(bytes);
        }
        Ok(())
    }
}
