//! The notification broker
//!
//! A single dispatcher loop consumes the tracker's streams. For each edge
//! event it resolves the peripheral against the registry, emits an
//! observability event, and hands a message to the sender. Registry failures
//! never stop the loop; only stream closure does.

use crate::error::Result;
use crate::notification::event::{BrokerEvent, EVENT_WILDCARD};
use crate::notification::message::Message;
use crate::notification::subscriber::{Subscriber, Target};
use crate::tracking::TrackerStream;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Resolves peripheral keys to registered targets and their subscribers.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn find_target(&self, key: &str) -> Result<Option<Target>>;

    /// Enabled subscribers of a target matching any of `events` (which may
    /// contain the literal `"*"`).
    async fn find_subscribers(&self, target_id: u64, events: Vec<String>)
        -> Result<Vec<Subscriber>>;
}

/// Accepts a message for asynchronous batch delivery.
pub trait MessageSender: Send + Sync {
    fn send(&self, msg: Message) -> Result<()>;
}

/// Consumes tracker output and fans notifications out to subscribers.
pub struct Broker {
    sender: Arc<dyn MessageSender>,
    registry: Arc<dyn Registry>,
    events_tx: broadcast::Sender<BrokerEvent>,
}

impl Broker {
    pub fn new(sender: Arc<dyn MessageSender>, registry: Arc<dyn Registry>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            sender,
            registry,
            events_tx,
        }
    }

    /// Subscribe to observability events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events_tx.subscribe()
    }

    /// Spawn the dispatcher loop over a tracker stream.
    ///
    /// The returned handle completes when every input stream has closed, which
    /// happens on cancellation or on a terminal source error.
    pub fn consume(&self, stream: TrackerStream) -> JoinHandle<()> {
        let sender = self.sender.clone();
        let registry = self.registry.clone();
        let events_tx = self.events_tx.clone();

        tokio::spawn(dispatch(sender, registry, events_tx, stream))
    }
}

async fn dispatch(
    sender: Arc<dyn MessageSender>,
    registry: Arc<dyn Registry>,
    events_tx: broadcast::Sender<BrokerEvent>,
    stream: TrackerStream,
) {
    let (mut found, mut lost, mut source_error) = stream.into_parts();
    let mut found_closed = false;
    let mut lost_closed = false;
    let mut error_closed = false;

    // Notifications are awaited in-order here so that per-key alternation
    // survives into the sender; delivery itself stays fire-and-forget.
    while !(found_closed && lost_closed) {
        tokio::select! {
            maybe = found.recv(), if !found_closed => match maybe {
                Some(peripheral) => {
                    notify(&*sender, &*registry, &events_tx, super::FOUND, peripheral).await;
                }
                None => found_closed = true,
            },
            maybe = lost.recv(), if !lost_closed => match maybe {
                Some(peripheral) => {
                    notify(&*sender, &*registry, &events_tx, super::LOST, peripheral).await;
                }
                None => lost_closed = true,
            },
            maybe = source_error.recv(), if !error_closed => match maybe {
                Some(err) => {
                    error!(error = %err, "error occurred during consuming the stream");
                }
                None => error_closed = true,
            },
        }
    }

    info!("stream is closed");
}

async fn notify(
    sender: &dyn MessageSender,
    registry: &dyn Registry,
    events_tx: &broadcast::Sender<BrokerEvent>,
    event_name: &str,
    peripheral: crate::discovery::Peripheral,
) {
    let key = peripheral.unique_key().to_string();

    if key.is_empty() {
        error!("peripheral contains an empty key");
        return;
    }

    let target = match registry.find_target(&key).await {
        Ok(target) => target,
        Err(err) => {
            error!(key = %key, error = %err, "failed to retrieve a peripheral");
            emit(events_tx, event_name, peripheral, false);
            return;
        }
    };

    let registered = target.is_some();
    emit(events_tx, event_name, peripheral.clone(), registered);

    let Some(target) = target else {
        info!(key = %key, "peripheral is not registered");
        return;
    };

    if !target.enabled {
        info!(key = %key, "peripheral is disabled");
        return;
    }

    let events = vec![event_name.to_string(), EVENT_WILDCARD.to_string()];

    let subscribers = match registry.find_subscribers(target.id, events).await {
        Ok(subscribers) => subscribers,
        Err(err) => {
            error!(key = %key, error = %err, "failed to retrieve subscribers");
            return;
        }
    };

    if subscribers.is_empty() {
        info!(key = %key, "peripheral does not have any enabled subscribers");
        return;
    }

    let msg = Message::new(event_name, target.name, peripheral, subscribers);

    if let Err(err) = sender.send(msg) {
        warn!(key = %key, error = %err, "sender rejected a message");
    }
}

fn emit(
    events_tx: &broadcast::Sender<BrokerEvent>,
    event_name: &str,
    peripheral: crate::discovery::Peripheral,
    registered: bool,
) {
    // Errors only mean no listener is subscribed right now.
    let _ = events_tx.send(BrokerEvent {
        name: event_name.to_string(),
        timestamp: Utc::now(),
        peripheral,
        registered,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Peripheral;
    use crate::error::Error;
    use crate::notification::subscriber::Endpoint;
    use crate::tracking::TrackerStream;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct StubRegistry {
        target: Option<Target>,
        subscribers: Vec<Subscriber>,
        fail_lookup: bool,
    }

    #[async_trait]
    impl Registry for StubRegistry {
        async fn find_target(&self, _key: &str) -> Result<Option<Target>> {
            if self.fail_lookup {
                return Err(Error::Storage("lookup failed".to_string()));
            }

            Ok(self.target.clone())
        }

        async fn find_subscribers(
            &self,
            _target_id: u64,
            _events: Vec<String>,
        ) -> Result<Vec<Subscriber>> {
            Ok(self.subscribers.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        messages: Mutex<Vec<Message>>,
    }

    impl MessageSender for RecordingSender {
        fn send(&self, msg: Message) -> Result<()> {
            self.messages.lock().push(msg);
            Ok(())
        }
    }

    fn beacon() -> Peripheral {
        Peripheral::ibeacon(
            "0123456789abcdef0123456789abcdef",
            1,
            2,
            "test",
            Vec::new(),
            -59.0,
            -59.0,
            "",
        )
    }

    fn target(enabled: bool) -> Target {
        Target {
            id: 1,
            key: beacon().unique_key().to_string(),
            name: "lobby".to_string(),
            kind: "ibeacon".to_string(),
            enabled,
        }
    }

    fn subscriber() -> Subscriber {
        Subscriber {
            id: 1,
            name: "hook".to_string(),
            event: "found".to_string(),
            enabled: true,
            endpoint: Some(Endpoint {
                id: 1,
                name: "hook".to_string(),
                url: "http://localhost/hook".to_string(),
                method: "POST".to_string(),
                headers: Default::default(),
            }),
        }
    }

    fn pipe() -> (
        mpsc::Sender<Peripheral>,
        mpsc::Sender<Peripheral>,
        TrackerStream,
    ) {
        let (found_tx, found_rx) = mpsc::channel(16);
        let (lost_tx, lost_rx) = mpsc::channel(16);
        let (_error_tx, error_rx) = mpsc::channel(1);
        (found_tx, lost_tx, TrackerStream::new(found_rx, lost_rx, error_rx))
    }

    #[tokio::test]
    async fn test_registered_target_produces_message() {
        let sender = Arc::new(RecordingSender::default());
        let registry = Arc::new(StubRegistry {
            target: Some(target(true)),
            subscribers: vec![subscriber()],
            fail_lookup: false,
        });

        let broker = Broker::new(sender.clone(), registry);
        let mut events = broker.subscribe();

        let (found_tx, _lost_tx, stream) = pipe();
        let handle = broker.consume(stream);

        found_tx.send(beacon()).await.unwrap();
        drop(found_tx);
        drop(_lost_tx);
        handle.await.unwrap();

        {
            let messages = sender.messages.lock();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].event_name(), "found");
            assert_eq!(messages[0].target_name(), "lobby");
            assert_eq!(messages[0].subscribers().len(), 1);
        }

        let evt = events.recv().await.unwrap();
        assert!(evt.registered);
        assert_eq!(evt.name, "found");
    }

    #[tokio::test]
    async fn test_unregistered_target_emits_event_without_message() {
        let sender = Arc::new(RecordingSender::default());
        let registry = Arc::new(StubRegistry {
            target: None,
            subscribers: Vec::new(),
            fail_lookup: false,
        });

        let broker = Broker::new(sender.clone(), registry);
        let mut events = broker.subscribe();

        let (found_tx, _lost_tx, stream) = pipe();
        let handle = broker.consume(stream);

        found_tx.send(beacon()).await.unwrap();
        drop(found_tx);
        drop(_lost_tx);
        handle.await.unwrap();

        assert!(sender.messages.lock().is_empty());

        let evt = events.recv().await.unwrap();
        assert!(!evt.registered);
    }

    #[tokio::test]
    async fn test_registry_error_does_not_stop_the_loop() {
        let sender = Arc::new(RecordingSender::default());
        let registry = Arc::new(StubRegistry {
            target: None,
            subscribers: Vec::new(),
            fail_lookup: true,
        });

        let broker = Broker::new(sender.clone(), registry);
        let mut events = broker.subscribe();

        let (found_tx, _lost_tx, stream) = pipe();
        let handle = broker.consume(stream);

        found_tx.send(beacon()).await.unwrap();
        found_tx.send(beacon()).await.unwrap();
        drop(found_tx);
        drop(_lost_tx);
        handle.await.unwrap();

        // Both sightings produced a failure-shaped event; none stopped the loop.
        assert!(!events.recv().await.unwrap().registered);
        assert!(!events.recv().await.unwrap().registered);
        assert!(sender.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_target_is_skipped() {
        let sender = Arc::new(RecordingSender::default());
        let registry = Arc::new(StubRegistry {
            target: Some(target(false)),
            subscribers: vec![subscriber()],
            fail_lookup: false,
        });

        let broker = Broker::new(sender.clone(), registry);

        let (found_tx, _lost_tx, stream) = pipe();
        let handle = broker.consume(stream);

        found_tx.send(beacon()).await.unwrap();
        drop(found_tx);
        drop(_lost_tx);
        handle.await.unwrap();

        assert!(sender.messages.lock().is_empty());
    }
}
