//! Pub/sub broker abstraction
//!
//! A broker client owns one network session and reports everything that happens
//! on it through an [`EventSink`]. The sink is invoked on the client's own
//! network thread, never on the relay's scheduler, so implementations of the
//! sink must only hand work off (see [`crate::transport`]).

use async_trait::async_trait;
use dev_tunnel_common::Result;
use std::sync::Arc;

#[cfg(test)]
pub(crate) mod memory;
pub mod websocket;

pub use websocket::{ReconnectConfig, WebSocketBroker, WebSocketBrokerConfig};

/// Something that happened on the broker session
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Vec<u8> },

    /// The session dropped; the client is trying to resume it
    Interrupted { reason: String },

    /// The session was re-established and subscriptions restored
    Resumed,
}

/// Callback receiving broker events on the broker's network thread
pub type EventSink = Arc<dyn Fn(BrokerEvent) + Send + Sync>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open the session; resolves once the broker handshake completed
    async fn connect(&self, client_id: &str, sink: EventSink) -> Result<()>;

    /// Subscribe to a topic; resolves once the broker acknowledged it
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Fire-and-forget publish (at-most-once)
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;

    /// Close the session and stop the network thread
    async fn disconnect(&self) -> Result<()>;
}
