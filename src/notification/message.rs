//! One notification bundle handed from the broker to the sender

use crate::discovery::Peripheral;
use crate::notification::subscriber::Subscriber;

/// One (event, peripheral, target, subscriber-list) bundle.
///
/// Immutable; lives only for the duration of one batch dispatch.
#[derive(Debug, Clone)]
pub struct Message {
    event_name: String,
    target_name: String,
    peripheral: Peripheral,
    subscribers: Vec<Subscriber>,
}

impl Message {
    pub fn new(
        event_name: impl Into<String>,
        target_name: impl Into<String>,
        peripheral: Peripheral,
        subscribers: Vec<Subscriber>,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            target_name: target_name.into(),
            peripheral,
            subscribers,
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }
}
