//! Observability events

use crate::discovery::Peripheral;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const FOUND: &str = "found";
pub const LOST: &str = "lost";

/// Matches subscribers registered for every event of a target.
pub const EVENT_WILDCARD: &str = "*";

/// One pipeline transition observed by the broker.
///
/// Emitted for every edge event the broker consumes, whether or not the
/// peripheral is registered.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub peripheral: Peripheral,
    pub registered: bool,
}

/// Whether `name` is one of the edge events the pipeline produces.
pub fn is_supported_event_name(name: &str) -> bool {
    name == FOUND || name == LOST
}
