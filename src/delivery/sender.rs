//! Batch delivery of notification messages
//!
//! `send` validates the event name, then dispatches the batch on its own task
//! and returns immediately. Subscribers are processed independently; one
//! outcome event is emitted per subscriber, success or failure.

use crate::delivery::transport::{DeliveryRequest, Transport};
use crate::discovery::{Peripheral, PeripheralDetail};
use crate::error::{Error, Result};
use crate::notification::event::is_supported_event_name;
use crate::notification::message::Message;
use crate::notification::subscriber::Subscriber;
use crate::notification::MessageSender;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Per-subscriber delivery outcome.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub timestamp: DateTime<Utc>,
    pub target_name: String,
    pub subscriber: Subscriber,
    /// `None` on success.
    pub error: Option<String>,
}

impl DeliveryEvent {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Dispatches messages to subscriber endpoints through a [`Transport`].
pub struct Sender {
    transport: Arc<dyn Transport>,
    events_tx: broadcast::Sender<DeliveryEvent>,
}

impl Sender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            transport,
            events_tx,
        }
    }

    /// Subscribe to delivery outcome events. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events_tx.subscribe()
    }
}

impl MessageSender for Sender {
    fn send(&self, msg: Message) -> Result<()> {
        if !is_supported_event_name(msg.event_name()) {
            return Err(Error::UnsupportedEventName(msg.event_name().to_string()));
        }

        let transport = self.transport.clone();
        let events_tx = self.events_tx.clone();

        // Endpoints are called in batch on a separate task.
        tokio::spawn(send_batch(transport, events_tx, msg));

        Ok(())
    }
}

async fn send_batch(
    transport: Arc<dyn Transport>,
    events_tx: broadcast::Sender<DeliveryEvent>,
    msg: Message,
) {
    for subscriber in msg.subscribers() {
        let outcome = send_single(&*transport, msg.target_name(), msg.peripheral(), subscriber).await;

        match &outcome {
            Ok(()) => info!(
                subscriber = %subscriber.name,
                target = %msg.target_name(),
                "notified a subscriber",
            ),
            Err(err) => warn!(
                subscriber = %subscriber.name,
                target = %msg.target_name(),
                error = %err,
                "failed to notify a subscriber",
            ),
        }

        let _ = events_tx.send(DeliveryEvent {
            timestamp: Utc::now(),
            target_name: msg.target_name().to_string(),
            subscriber: subscriber.clone(),
            error: outcome.err().map(|e| e.to_string()),
        });
    }
}

async fn send_single(
    transport: &dyn Transport,
    target_name: &str,
    peripheral: &Peripheral,
    subscriber: &Subscriber,
) -> Result<()> {
    let serialized = serialize_peripheral(target_name, peripheral);

    let Some(endpoint) = &subscriber.endpoint else {
        // Misconfigured subscriber, not a delivery failure.
        warn!(subscriber = %subscriber.name, "subscriber has no endpoint");
        return Ok(());
    };

    if endpoint.url.is_empty() {
        return Err(Error::EmptyEndpointUrl(endpoint.name.clone()));
    }

    let method = Method::from_bytes(endpoint.method.to_uppercase().as_bytes())
        .map_err(|_| Error::UnsupportedHttpMethod(endpoint.method.clone()))?;

    let mut url = Url::parse(&endpoint.url)?;
    let mut headers = HeaderMap::new();
    let mut body = None;

    if method == Method::POST {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        body = Some(serde_json::to_vec(&serialized)?);
    } else {
        url.query_pairs_mut().extend_pairs(serialized.iter());
    }

    // Caller-supplied headers override defaults.
    for (key, value) in &endpoint.headers {
        let name = HeaderName::from_bytes(key.as_bytes())?;
        headers.insert(name, HeaderValue::from_str(value)?);
    }

    transport
        .execute(DeliveryRequest {
            method,
            url,
            headers,
            body,
        })
        .await
}

/// Flatten a peripheral into the wire attribute map.
fn serialize_peripheral(target_name: &str, peripheral: &Peripheral) -> BTreeMap<String, String> {
    let mut serialized = BTreeMap::new();

    serialized.insert("name".to_string(), target_name.to_string());
    serialized.insert("kind".to_string(), peripheral.kind().to_string());
    serialized.insert(
        "proximity".to_string(),
        peripheral.proximity().as_str().to_string(),
    );
    serialized.insert(
        "accuracy".to_string(),
        format!("{:.6}", peripheral.accuracy()),
    );

    match peripheral.detail() {
        PeripheralDetail::IBeacon { uuid, major, minor } => {
            serialized.insert("uuid".to_string(), uuid.clone());
            serialized.insert("major".to_string(), major.to_string());
            serialized.insert("minor".to_string(), minor.to_string());
        }
    }

    serialized
}
