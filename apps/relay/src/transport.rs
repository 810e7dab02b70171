//! Pub/sub transport for one tunnel channel
//!
//! Owns the broker session, the channel topic, and every publish. Inbound
//! payloads are parsed on the broker's network thread and handed to the
//! dispatcher through a bounded queue, which is the only place where the
//! broker's thread and the relay's scheduler meet.

use dev_tunnel_common::{Message, Result, topic_for_channel, validation::validate_channel};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerEvent, EventSink};

pub struct Transport {
    broker: Arc<dyn Broker>,
    channel: String,
    topic: String,
    client_id: String,
}

impl Transport {
    /// Connect to the broker and subscribe to the channel topic
    ///
    /// Resolves only after both the handshake and the subscription succeeded.
    /// Either failure is returned to the caller as is; there is no retry.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        channel: &str,
        client_id: &str,
        inbound: mpsc::Sender<Message>,
    ) -> Result<Self> {
        validate_channel(channel)?;
        let topic = topic_for_channel(channel);

        info!("Connecting to broker as {}", client_id);
        broker
            .connect(client_id, inbound_sink(topic.clone(), inbound))
            .await?;

        if let Err(e) = broker.subscribe(&topic).await {
            let _ = broker.disconnect().await;
            return Err(e);
        }
        info!("Subscribed to {}", topic);

        Ok(Self {
            broker,
            channel: channel.to_string(),
            topic,
            client_id: client_id.to_string(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Publish a message on the channel topic (at-most-once)
    pub async fn publish(&self, message: &Message) -> Result<()> {
        let payload = message.encode()?;
        debug!(
            "Publishing {} bytes for request {}",
            payload.len(),
            message.request_id()
        );
        self.broker.publish(&self.topic, payload).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.broker.disconnect().await
    }
}

/// Build the broker callback that parses payloads and enqueues them
fn inbound_sink(topic: String, inbound: mpsc::Sender<Message>) -> EventSink {
    Arc::new(move |event| match event {
        BrokerEvent::Message {
            topic: ref received,
            ref payload,
        } if *received == topic => match Message::decode(payload) {
            Ok(message) => match inbound.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    warn!(
                        "Inbound queue full, dropping message for request {}",
                        message.request_id()
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Dispatcher stopped, dropping inbound message");
                }
            },
            Err(e) => {
                warn!("Dropping malformed message on {}: {}", topic, e);
            }
        },
        BrokerEvent::Message { topic, .. } => {
            debug!("Ignoring message on unrelated topic {}", topic);
        }
        BrokerEvent::Interrupted { reason } => {
            warn!("Broker connection interrupted: {}", reason);
        }
        BrokerEvent::Resumed => {
            info!("Broker connection resumed");
        }
    })
}
