//! Current-presence snapshot
//!
//! Consumes broker events: a `found` upserts a record, a `lost` deletes it.
//! Reads return copies ordered by key descending so pagination stays stable
//! while the pipeline keeps writing.

use crate::notification::{BrokerEvent, FOUND};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// One currently-present peripheral as seen by the broker
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub key: String,
    pub kind: String,
    pub proximity: String,
    pub registered: bool,
    pub time: DateTime<Utc>,
}

/// In-memory presence snapshot for the management API
pub struct ActivityMonitor {
    records: Arc<RwLock<HashMap<String, ActivityRecord>>>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn quantity(&self) -> usize {
        self.records.read().len()
    }

    /// Paginated snapshot, ordered by key descending. `take == 0` means all.
    pub fn get_records(&self, take: usize, skip: usize) -> Vec<ActivityRecord> {
        let records = self.records.read();

        let mut list: Vec<ActivityRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| b.key.cmp(&a.key));

        let take = if take == 0 { list.len() } else { take };

        list.into_iter().skip(skip).take(take).collect()
    }

    /// Spawn a consumer task over a broker event subscription.
    pub fn watch(&self, mut events: broadcast::Receiver<BrokerEvent>) -> JoinHandle<()> {
        let records = self.records.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(evt) => apply(&records, evt),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "activity monitor lagged behind broker events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(records: &RwLock<HashMap<String, ActivityRecord>>, evt: BrokerEvent) {
    let key = evt.peripheral.unique_key().to_string();
    let mut records = records.write();

    if evt.name == FOUND {
        records.insert(
            key.clone(),
            ActivityRecord {
                key,
                kind: evt.peripheral.kind().to_string(),
                proximity: evt.peripheral.proximity().as_str().to_string(),
                registered: evt.registered,
                time: evt.timestamp,
            },
        );
    } else {
        records.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Peripheral;
    use crate::notification::LOST;

    fn beacon(minor: u16) -> Peripheral {
        Peripheral::ibeacon(
            "0123456789abcdef0123456789abcdef",
            1,
            minor,
            "test",
            Vec::new(),
            -59.0,
            -59.0,
            "",
        )
    }

    fn event(name: &str, minor: u16) -> BrokerEvent {
        BrokerEvent {
            name: name.to_string(),
            timestamp: Utc::now(),
            peripheral: beacon(minor),
            registered: minor % 2 == 0,
        }
    }

    #[test]
    fn test_found_upserts_and_lost_deletes() {
        let monitor = ActivityMonitor::new();

        apply(&monitor.records, event(FOUND, 1));
        apply(&monitor.records, event(FOUND, 2));
        assert_eq!(monitor.quantity(), 2);

        // Re-found refreshes, not duplicates.
        apply(&monitor.records, event(FOUND, 1));
        assert_eq!(monitor.quantity(), 2);

        apply(&monitor.records, event(LOST, 1));
        assert_eq!(monitor.quantity(), 1);
    }

    #[test]
    fn test_records_are_ordered_and_paginated() {
        let monitor = ActivityMonitor::new();

        for minor in 1..=5 {
            apply(&monitor.records, event(FOUND, minor));
        }

        let all = monitor.get_records(0, 0);
        assert_eq!(all.len(), 5);
        let keys: Vec<_> = all.iter().map(|r| r.key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(keys, sorted);

        let page = monitor.get_records(2, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].key, all[2].key);
        assert_eq!(page[1].key, all[3].key);

        assert!(monitor.get_records(2, 10).is_empty());
    }

    #[tokio::test]
    async fn test_watch_consumes_broker_events() {
        let monitor = ActivityMonitor::new();
        let (tx, rx) = broadcast::channel(16);

        let handle = monitor.watch(rx);

        tx.send(event(FOUND, 7)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(monitor.quantity(), 1);
        assert_eq!(monitor.get_records(0, 0)[0].kind, "ibeacon");
    }
}
