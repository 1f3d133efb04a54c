//! Registration data types
//!
//! Targets, subscribers, and endpoints come from the registration store and
//! are read-only to the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered, named peripheral the operator cares about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    pub key: String,
    pub name: String,
    pub kind: String,
    pub enabled: bool,
}

/// A registered recipient of notifications for a target × event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: u64,
    pub name: String,
    /// `"found"`, `"lost"`, or the wildcard `"*"`
    pub event: String,
    pub enabled: bool,
    pub endpoint: Option<Endpoint>,
}

/// The HTTP location a subscriber's deliveries go to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u64,
    pub name: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}
