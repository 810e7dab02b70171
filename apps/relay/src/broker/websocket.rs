//! WebSocket broker client
//!
//! The client runs its network loop on one dedicated OS thread with its own
//! current-thread runtime, the way broker SDKs own a network thread. The
//! relay talks to that thread through a command queue; the thread talks back
//! through the [`EventSink`].
//!
//! Frames are JSON objects tagged by `op`:
//!
//! ```text
//! client -> broker   {"op":"subscribe","topic":"public/abc"}
//!                    {"op":"publish","topic":"public/abc","payload":"..."}
//!                    {"op":"ping"}
//! broker -> client   {"op":"suback","topic":"public/abc"}
//!                    {"op":"message","topic":"public/abc","payload":"..."}
//!                    {"op":"pong"}
//! ```

use async_trait::async_trait;
use dev_tunnel_common::{
    Result, TunnelError,
    constants::{
        BROKER_CONNECT_TIMEOUT_SECS, HEARTBEAT_INTERVAL_SECS, RECONNECT_MAX_DELAY_MS,
        RECONNECT_MIN_DELAY_MS, RECONNECT_MULTIPLIER,
    },
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Mutex, thread, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message as WsMessage, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Broker, BrokerEvent, EventSink};

type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration for the WebSocket broker client
#[derive(Debug, Clone)]
pub struct WebSocketBrokerConfig {
    /// Broker endpoint (ws:// or wss://)
    pub endpoint: Url,

    /// Bearer token sent on every handshake
    pub token: Option<String>,

    /// Handshake and subscribe acknowledgement timeout
    pub connect_timeout: Duration,

    /// Keep-alive ping interval
    pub heartbeat_interval: Duration,

    /// Session resume strategy after an interruption
    pub reconnect: ReconnectConfig,
}

/// Reconnection configuration with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(RECONNECT_MIN_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            multiplier: RECONNECT_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Delay to use after `current` failed
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_millis(
            ((current.as_millis() as f64 * self.multiplier).min(self.max_delay.as_millis() as f64))
                as u64,
        )
    }
}

impl WebSocketBrokerConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            connect_timeout: Duration::from_secs(BROKER_CONNECT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Frames exchanged with the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Subscribe { topic: String },
    Suback { topic: String },
    Publish { topic: String, payload: String },
    Message { topic: String, payload: String },
    Ping,
    Pong,
}

/// Requests from the relay to the network thread
enum Command {
    Subscribe {
        topic: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Publish {
        topic: String,
        payload: String,
    },
    Disconnect,
}

struct Session {
    commands: mpsc::UnboundedSender<Command>,
    thread: thread::JoinHandle<()>,
}

/// Broker client speaking JSON frames over a WebSocket
pub struct WebSocketBroker {
    config: WebSocketBrokerConfig,
    session: Mutex<Option<Session>>,
}

impl WebSocketBroker {
    pub fn new(config: WebSocketBrokerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        let session = self
            .session
            .lock()
            .map_err(|_| TunnelError::InternalError("Broker session lock poisoned".to_string()))?;
        let session = session
            .as_ref()
            .ok_or_else(|| TunnelError::ConnectionError("Broker is not connected".to_string()))?;
        session
            .commands
            .send(command)
            .map_err(|_| TunnelError::ConnectionError("Broker network thread exited".to_string()))
    }
}

#[async_trait]
impl Broker for WebSocketBroker {
    async fn connect(&self, client_id: &str, sink: EventSink) -> Result<()> {
        let already_connected = self
            .session
            .lock()
            .map(|session| session.is_some())
            .unwrap_or(true);
        if already_connected {
            return Err(TunnelError::ConnectionError(
                "Broker session already open".to_string(),
            ));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let network = NetworkLoop {
            config: self.config.clone(),
            client_id: client_id.to_string(),
            commands: commands_rx,
            sink,
            subscriptions: Vec::new(),
        };

        let thread = thread::Builder::new()
            .name("broker-network".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(TunnelError::InternalError(format!(
                            "Failed to start broker runtime: {}",
                            e
                        ))));
                        return;
                    }
                };
                runtime.block_on(network.run(ready_tx));
            })
            .map_err(|e| {
                TunnelError::InternalError(format!("Failed to spawn broker thread: {}", e))
            })?;

        ready_rx.await.map_err(|_| {
            TunnelError::ConnectionError("Broker network thread exited during handshake".to_string())
        })??;

        let mut session = self
            .session
            .lock()
            .map_err(|_| TunnelError::InternalError("Broker session lock poisoned".to_string()))?;
        *session = Some(Session {
            commands: commands_tx,
            thread,
        });

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Subscribe {
            topic: topic.to_string(),
            ack: ack_tx,
        })?;

        match tokio::time::timeout(self.config.connect_timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TunnelError::SubscribeError(format!(
                "Connection closed before {} was acknowledged",
                topic
            ))),
            Err(_) => Err(TunnelError::Timeout(format!("subscribe {}", topic))),
        }
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.send(Command::Publish {
            topic: topic.to_string(),
            payload,
        })
        .map_err(|e| TunnelError::PublishError(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .map_err(|_| TunnelError::InternalError("Broker session lock poisoned".to_string()))?
            .take();

        let Some(session) = session else {
            return Ok(());
        };

        let _ = session.commands.send(Command::Disconnect);
        tokio::task::spawn_blocking(move || session.thread.join())
            .await
            .map_err(|e| TunnelError::InternalError(e.to_string()))?
            .map_err(|_| TunnelError::InternalError("Broker network thread panicked".to_string()))?;

        info!("Broker session closed");
        Ok(())
    }
}

/// How a session ended
enum SessionEnd {
    Shutdown,
    Dropped(String),
}

/// State owned by the network thread
struct NetworkLoop {
    config: WebSocketBrokerConfig,
    client_id: String,
    commands: mpsc::UnboundedReceiver<Command>,
    sink: EventSink,
    subscriptions: Vec<String>,
}

impl NetworkLoop {
    async fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        // The first handshake is never retried: failure is reported to `connect`
        let mut ws_stream = match self.establish().await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        info!("Broker session established as {}", self.client_id);
        let _ = ready.send(Ok(()));

        loop {
            match self.run_session(ws_stream).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Dropped(reason) => {
                    warn!("Broker session dropped: {}", reason);
                    (self.sink)(BrokerEvent::Interrupted { reason });
                }
            }

            match self.resume().await {
                Some(resumed) => {
                    ws_stream = resumed;
                    (self.sink)(BrokerEvent::Resumed);
                }
                None => break,
            }
        }

        debug!("Broker network loop exiting");
    }

    /// Open the WebSocket and perform the handshake
    async fn establish(&self) -> Result<WebSocket> {
        let mut url = self.config.endpoint.clone();
        url.query_pairs_mut().append_pair("clientId", &self.client_id);

        debug!("Connecting to {}", self.config.endpoint);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TunnelError::ConnectionError(format!("Invalid URL: {}", e)))?;

        if let Some(ref token) = self.config.token {
            request.headers_mut().insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| TunnelError::ConnectionError(format!("Invalid token: {}", e)))?,
            );
        }

        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TunnelError::ConnectionError("Broker handshake timeout".to_string()))?
            .map_err(|e| TunnelError::ConnectionError(e.to_string()))?;

        Ok(ws_stream)
    }

    /// Reconnect with exponential backoff and restore subscriptions
    ///
    /// Returns `None` when a disconnect was requested while waiting.
    async fn resume(&mut self) -> Option<WebSocket> {
        let mut delay = self.config.reconnect.min_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                "Reconnecting to broker in {:?} (attempt {})",
                delay, attempt
            );

            if !self.wait_disconnected(delay).await {
                return None;
            }

            match self.establish().await {
                Ok(mut ws_stream) => {
                    let mut restored = true;
                    for topic in &self.subscriptions {
                        let frame = Frame::Subscribe {
                            topic: topic.clone(),
                        };
                        if let Err(e) = send_frame(&mut ws_stream, &frame).await {
                            warn!("Failed to restore subscription {}: {}", topic, e);
                            restored = false;
                            break;
                        }
                    }
                    if restored {
                        info!(
                            "Broker session resumed ({} subscriptions restored)",
                            self.subscriptions.len()
                        );
                        return Some(ws_stream);
                    }
                }
                Err(e) => {
                    warn!("Failed to reconnect: {}", e);
                }
            }

            delay = self.config.reconnect.next_delay(delay);
        }
    }

    /// Sleep for `delay` while serving commands that arrive without a session
    ///
    /// Returns `false` if the relay asked to disconnect.
    async fn wait_disconnected(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Publish { topic, .. }) => {
                        debug!("Dropping publish to {} while disconnected", topic);
                    }
                    Some(Command::Subscribe { topic, ack }) => {
                        remember(&mut self.subscriptions, &topic);
                        let _ = ack.send(Ok(()));
                    }
                    Some(Command::Disconnect) | None => return false,
                },
            }
        }
    }

    /// Pump frames and commands until the session ends
    async fn run_session(&mut self, ws_stream: WebSocket) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();
        let mut pending: HashMap<String, Vec<oneshot::Sender<Result<()>>>> = HashMap::new();

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&self.sink, &text, &mut pending);
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("Received unexpected binary frame");
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        return SessionEnd::Dropped("Broker closed connection".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("Connection closed".to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Subscribe { topic, ack }) => {
                        remember(&mut self.subscriptions, &topic);
                        let frame = Frame::Subscribe { topic: topic.clone() };
                        if let Err(e) = send_frame(&mut write, &frame).await {
                            let _ = ack.send(Err(TunnelError::SubscribeError(e.to_string())));
                            return SessionEnd::Dropped(e.to_string());
                        }
                        pending.entry(topic).or_default().push(ack);
                    }
                    Some(Command::Publish { topic, payload }) => {
                        if let Err(e) = send_frame(&mut write, &Frame::Publish { topic, payload }).await {
                            error!("Failed to publish: {}", e);
                            return SessionEnd::Dropped(e.to_string());
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = send_frame(&mut write, &Frame::Ping).await {
                        return SessionEnd::Dropped(e.to_string());
                    }
                    debug!("Sent heartbeat");
                }
            }
        }
    }
}

fn remember(subscriptions: &mut Vec<String>, topic: &str) {
    if !subscriptions.iter().any(|t| t == topic) {
        subscriptions.push(topic.to_string());
    }
}

fn handle_frame(
    sink: &EventSink,
    text: &str,
    pending: &mut HashMap<String, Vec<oneshot::Sender<Result<()>>>>,
) {
    match serde_json::from_str::<Frame>(text) {
        Ok(Frame::Message { topic, payload }) => {
            sink(BrokerEvent::Message {
                topic,
                payload: payload.into_bytes(),
            });
        }
        Ok(Frame::Suback { topic }) => {
            debug!("Subscribed to {}", topic);
            for ack in pending.remove(&topic).unwrap_or_default() {
                let _ = ack.send(Ok(()));
            }
        }
        Ok(Frame::Pong) => {
            debug!("Received pong");
        }
        Ok(other) => {
            warn!("Received unexpected frame from broker: {:?}", other);
        }
        Err(e) => {
            warn!("Failed to parse broker frame: {}", e);
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &Frame) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(frame)?;
    write
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| TunnelError::WebSocketError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        accept_async, accept_hdr_async,
        tungstenite::handshake::server::{ErrorResponse, Request, Response},
    };

    fn test_config(addr: std::net::SocketAddr) -> WebSocketBrokerConfig {
        let mut config = WebSocketBrokerConfig::new(Url::parse(&format!("ws://{}/mqtt", addr)).unwrap());
        config.connect_timeout = Duration::from_secs(2);
        config.reconnect = ReconnectConfig {
            min_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        };
        config
    }

    fn collecting_sink() -> (EventSink, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Frame {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Unexpected websocket item: {:?}", other),
            }
        }
    }

    async fn send(ws: &mut WebSocketStream<TcpStream>, frame: &Frame) {
        let json = serde_json::to_string(frame).unwrap();
        ws.send(WsMessage::Text(json.into())).await.unwrap();
    }

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::Subscribe {
            topic: "public/abc".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"op":"subscribe","topic":"public/abc"}"#
        );

        let frame = Frame::Ping;
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"op":"ping"}"#);

        let parsed: Frame =
            serde_json::from_str(r#"{"op":"message","topic":"public/abc","payload":"{}"}"#)
                .unwrap();
        assert_eq!(
            parsed,
            Frame::Message {
                topic: "public/abc".to_string(),
                payload: "{}".to_string()
            }
        );
    }

    #[test]
    fn test_reconnect_backoff() {
        let reconnect = ReconnectConfig::default();
        let mut delay = reconnect.min_delay;
        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(delay);
            delay = reconnect.next_delay(delay);
        }

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[5], Duration::from_secs(32));
        assert_eq!(delays[6], Duration::from_secs(60));
        assert_eq!(delays[7], Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_connect_subscribe_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = request_tx.send((req.uri().to_string(), auth));
                Ok(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();

            let frame = next_frame(&mut ws).await;
            assert_eq!(
                frame,
                Frame::Subscribe {
                    topic: "public/abc".to_string()
                }
            );
            send(&mut ws, &Frame::Suback { topic: "public/abc".to_string() }).await;
            send(
                &mut ws,
                &Frame::Message {
                    topic: "public/abc".to_string(),
                    payload: r#"{"hello":"world"}"#.to_string(),
                },
            )
            .await;

            next_frame(&mut ws).await
        });

        let mut config = test_config(addr);
        config.token = Some("secret".to_string());
        let broker = WebSocketBroker::new(config);
        let (sink, mut events) = collecting_sink();

        broker.connect("dtr-test", sink).await.unwrap();
        let (uri, auth) = request_rx.await.unwrap();
        assert_eq!(uri, "/mqtt?clientId=dtr-test");
        assert_eq!(auth.as_deref(), Some("Bearer secret"));

        broker.subscribe("public/abc").await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            BrokerEvent::Message {
                topic: "public/abc".to_string(),
                payload: br#"{"hello":"world"}"#.to_vec(),
            }
        );

        broker
            .publish("public/abc", "reply".to_string())
            .await
            .unwrap();
        let published = server.await.unwrap();
        assert_eq!(
            published,
            Frame::Publish {
                topic: "public/abc".to_string(),
                payload: "reply".to_string()
            }
        );

        broker.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let broker = WebSocketBroker::new(test_config(addr));
        let (sink, _events) = collecting_sink();

        let result = broker.connect("dtr-test", sink).await;
        assert!(matches!(result, Err(TunnelError::ConnectionError(_))));

        // Nothing to publish on
        let result = broker.publish("public/abc", "x".to_string()).await;
        assert!(matches!(result, Err(TunnelError::PublishError(_))));
    }

    #[tokio::test]
    async fn test_session_resumes_and_restores_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First session: acknowledge the subscription, then drop the socket
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let frame = next_frame(&mut ws).await;
            assert!(matches!(frame, Frame::Subscribe { .. }));
            send(&mut ws, &Frame::Suback { topic: "public/abc".to_string() }).await;
            drop(ws);

            // Second session: the client restores its subscription on its own
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let frame = next_frame(&mut ws).await;
            send(
                &mut ws,
                &Frame::Message {
                    topic: "public/abc".to_string(),
                    payload: "after-resume".to_string(),
                },
            )
            .await;
            let _ = next_frame(&mut ws).await;
            frame
        });

        let broker = WebSocketBroker::new(test_config(addr));
        let (sink, mut events) = collecting_sink();
        broker.connect("dtr-test", sink).await.unwrap();
        broker.subscribe("public/abc").await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            BrokerEvent::Interrupted { .. }
        ));
        assert_eq!(events.recv().await.unwrap(), BrokerEvent::Resumed);
        assert_eq!(
            events.recv().await.unwrap(),
            BrokerEvent::Message {
                topic: "public/abc".to_string(),
                payload: b"after-resume".to_vec(),
            }
        );

        broker
            .publish("public/abc", "done".to_string())
            .await
            .unwrap();
        let restored = server.await.unwrap();
        assert_eq!(
            restored,
            Frame::Subscribe {
                topic: "public/abc".to_string()
            }
        );

        broker.disconnect().await.unwrap();
    }
}
