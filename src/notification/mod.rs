//! Notification dispatch
//!
//! The [`Broker`](broker::Broker) consumes the tracker's edge events, resolves
//! registrations, and hands [`Message`](message::Message)s to the sender. It
//! also fans observability events out to any number of listeners over a
//! broadcast channel.

pub mod broker;
pub mod event;
pub mod message;
pub mod subscriber;

pub use broker::{Broker, MessageSender, Registry};
pub use event::{BrokerEvent, EVENT_WILDCARD, FOUND, LOST};
pub use message::Message;
pub use subscriber::{Endpoint, Subscriber, Target};
