//! Tracker output streams

use crate::discovery::Peripheral;
use crate::error::Error;
use tokio::sync::mpsc;

/// The tracker's three output streams.
///
/// `found` and `lost` carry edge events; `error` carries at most one terminal
/// source error. All three close when the tracker shuts down.
pub struct TrackerStream {
    found: mpsc::Receiver<Peripheral>,
    lost: mpsc::Receiver<Peripheral>,
    error: mpsc::Receiver<Error>,
}

impl TrackerStream {
    pub fn new(
        found: mpsc::Receiver<Peripheral>,
        lost: mpsc::Receiver<Peripheral>,
        error: mpsc::Receiver<Error>,
    ) -> Self {
        Self { found, lost, error }
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<Peripheral>,
        mpsc::Receiver<Peripheral>,
        mpsc::Receiver<Error>,
    ) {
        (self.found, self.lost, self.error)
    }
}
