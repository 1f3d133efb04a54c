//! Presence tracking
//!
//! The [`Tracker`](tracker::Tracker) owns the map of currently-seen
//! peripherals and turns a raw advertisement stream into `found`/`lost` edge
//! events with TTL-based eviction.

pub mod stream;
pub mod track;
pub mod tracker;

pub use stream::TrackerStream;
pub use track::Track;
pub use tracker::Tracker;
