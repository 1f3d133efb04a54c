//! One currently-present peripheral

use crate::discovery::Peripheral;
use std::time::Duration;
use tokio::time::Instant;

/// The tracker's record of one currently-present peripheral.
///
/// A track is active while the time since the last sighting stays within its
/// TTL; it is evicted (and a `lost` event published) on the first heartbeat
/// after that window closes.
#[derive(Debug, Clone)]
pub struct Track {
    peripheral: Peripheral,
    ttl: Duration,
    last_seen: Instant,
}

impl Track {
    pub fn new(peripheral: Peripheral, ttl: Duration) -> Self {
        Self {
            peripheral,
            ttl,
            last_seen: Instant::now(),
        }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub fn into_peripheral(self) -> Peripheral {
        self.peripheral
    }

    /// Refresh the sighting timestamp.
    pub fn refresh(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.last_seen.elapsed() <= self.ttl
    }
}
