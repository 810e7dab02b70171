//! In-process broker for tests
//!
//! Events are delivered from a dedicated delivery thread, like a real broker
//! SDK, so the transport's thread hand-off is exercised.

use async_trait::async_trait;
use dev_tunnel_common::{Message, Result, TunnelError};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, mpsc},
    thread,
    time::Duration,
};

use super::{Broker, BrokerEvent, EventSink};

#[derive(Default)]
struct State {
    client_id: Option<String>,
    subscriptions: HashSet<String>,
    published: Vec<(String, String)>,
    deliveries: Option<mpsc::Sender<BrokerEvent>>,
}

#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    state: Arc<Mutex<State>>,
    fail_connect: bool,
    fail_subscribe: bool,
}

impl MemoryBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_subscribe() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    pub(crate) fn client_id(&self) -> Option<String> {
        self.state.lock().unwrap().client_id.clone()
    }

    pub(crate) fn is_subscribed(&self, topic: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains(topic)
    }

    /// Deliver a raw payload as if another client published it
    pub(crate) fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.deliver(BrokerEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    pub(crate) fn interrupt(&self, reason: &str) {
        self.deliver(BrokerEvent::Interrupted {
            reason: reason.to_string(),
        });
    }

    pub(crate) fn resume(&self) {
        self.deliver(BrokerEvent::Resumed);
    }

    /// Every message published through this broker, parsed
    pub(crate) fn published(&self) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter_map(|(_, payload)| Message::decode(payload.as_bytes()).ok())
            .collect()
    }

    /// Wait until at least `count` messages were published
    pub(crate) async fn wait_for_published(&self, count: usize) -> Vec<Message> {
        for _ in 0..200 {
            let published = self.published();
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "Expected {} published messages, got {:?}",
            count,
            self.published()
        );
    }

    fn deliver(&self, event: BrokerEvent) {
        let state = self.state.lock().unwrap();
        if let BrokerEvent::Message { topic, .. } = &event
            && !state.subscriptions.contains(topic)
        {
            return;
        }
        if let Some(deliveries) = &state.deliveries {
            let _ = deliveries.send(event);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self, client_id: &str, sink: EventSink) -> Result<()> {
        if self.fail_connect {
            return Err(TunnelError::ConnectionError(
                "connection refused".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel::<BrokerEvent>();
        thread::Builder::new()
            .name("memory-broker".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    sink(event);
                }
            })
            .map_err(|e| TunnelError::InternalError(e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        state.client_id = Some(client_id.to_string());
        state.deliveries = Some(tx);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        if self.fail_subscribe {
            return Err(TunnelError::SubscribeError(format!(
                "not authorized for {}",
                topic
            )));
        }
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .published
            .push((topic.to_string(), payload.clone()));

        // A broker echoes messages back to subscribers of the topic, including the publisher
        self.deliver(BrokerEvent::Message {
            topic: topic.to_string(),
            payload: payload.into_bytes(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Dropping the sender stops the delivery thread, which drops the sink
        self.state.lock().unwrap().deliveries = None;
        Ok(())
    }
}
