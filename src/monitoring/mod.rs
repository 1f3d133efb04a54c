//! Runtime monitoring
//!
//! The activity monitor keeps an in-memory snapshot of currently-present
//! peripherals for the management API.

pub mod activity;

pub use activity::{ActivityMonitor, ActivityRecord};
