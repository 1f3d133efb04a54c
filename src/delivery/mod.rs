//! HTTP notification delivery
//!
//! The [`Sender`](sender::Sender) serializes peripheral payloads and
//! dispatches one batch per message, emitting one outcome event per
//! subscriber. The [`Transport`](transport::Transport) owns retries,
//! backoff, and the concurrency cap.

pub mod sender;
pub mod transport;

pub use sender::{DeliveryEvent, Sender};
pub use transport::{DeliveryRequest, HttpTransport, MockTransport, Transport};
