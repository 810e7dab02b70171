//! Fan-out of inbound messages to registered handlers
//!
//! Every message gets its own task, so a slow invocation never holds back the
//! next message. Within a message, each handler runs as its own task and a
//! failing or panicking handler is logged without affecting the others.

use async_trait::async_trait;
use dev_tunnel_common::Message;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()>;
}

/// Handlers interested in every inbound message
///
/// Filled once during setup, then shared read-only by all dispatch tasks.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        info!("Registered handler {}", handler.name());
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Consume the inbound queue until every sender is gone
    pub async fn run(&self, mut inbound: mpsc::Receiver<Message>) {
        while let Some(message) = inbound.recv().await {
            let registry = self.registry.clone();
            tokio::spawn(async move {
                dispatch(&registry, Arc::new(message)).await;
            });
        }

        debug!("Inbound queue closed, dispatcher exiting");
    }
}

/// Run every handler on one message concurrently and wait for all of them
///
/// Returns the number of handlers that failed or panicked.
pub async fn dispatch(registry: &HandlerRegistry, message: Arc<Message>) -> usize {
    let (names, tasks): (Vec<_>, Vec<_>) = registry
        .handlers
        .iter()
        .map(|handler| {
            let handler = handler.clone();
            let message = message.clone();
            let name = handler.name().to_string();
            (name, tokio::spawn(async move { handler.handle(message).await }))
        })
        .unzip();

    let mut failures = 0;
    for (name, result) in names.iter().zip(join_all(tasks).await) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                error!(
                    "Handler {} failed on request {}: {:?}",
                    name,
                    message.request_id(),
                    e
                );
            }
            Err(e) if e.is_panic() => {
                failures += 1;
                error!(
                    "Handler {} panicked on request {}: {}",
                    name,
                    message.request_id(),
                    e
                );
            }
            Err(e) => {
                failures += 1;
                error!("Handler {} was cancelled: {}", name, e);
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use dev_tunnel_common::{InvocationContext, RequestReceived};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct Recorder {
        name: String,
        behavior: Behavior,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &str, behavior: Behavior, seen: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                seen: seen.clone(),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
            match self.behavior {
                Behavior::Succeed => {}
                Behavior::Fail => return Err(anyhow!("boom")),
                Behavior::Panic => panic!("handler panicked"),
                Behavior::Sleep(duration) => tokio::time::sleep(duration).await,
            }
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, message.request_id()));
            Ok(())
        }
    }

    fn request(id: &str) -> Message {
        RequestReceived::new(id, json!({}), InvocationContext::default()).into()
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(Recorder::new("a", Behavior::Succeed, &seen));
        registry.register(Recorder::new("b", Behavior::Succeed, &seen));
        assert_eq!(registry.len(), 2);

        let failures = dispatch(&registry, Arc::new(request("r1"))).await;
        assert_eq!(failures, 0);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a:r1", "b:r1"]);
    }

    #[tokio::test]
    async fn test_failing_handlers_do_not_affect_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(Recorder::new("fails", Behavior::Fail, &seen));
        registry.register(Recorder::new("panics", Behavior::Panic, &seen));
        registry.register(Recorder::new("ok", Behavior::Succeed, &seen));

        let failures = dispatch(&registry, Arc::new(request("r1"))).await;
        assert_eq!(failures, 2);
        assert_eq!(*seen.lock().unwrap(), vec!["ok:r1"]);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(dispatch(&registry, Arc::new(request("r1"))).await, 0);
    }

    #[tokio::test]
    async fn test_messages_are_not_serialized() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(Recorder::new(
            "slow",
            Behavior::Sleep(Duration::from_millis(100)),
            &seen,
        ));
        let dispatcher = Dispatcher::new(registry);

        let (tx, rx) = mpsc::channel(8);
        for id in ["r1", "r2", "r3", "r4"] {
            tx.send(request(id)).await.unwrap();
        }
        drop(tx);

        dispatcher.run(rx).await;
        // Four 100ms handlers run side by side; back to back they would need 400ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(seen.lock().unwrap().len(), 4);
    }
}
