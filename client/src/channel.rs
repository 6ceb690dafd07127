use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    time::sleep,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::ChannelError,
    protocol::{Message, PING, PONG},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// What the channel hands to its registered handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(Message),
    /// The connection dropped and came back; delivery continuity is lost.
    Reopened,
}

pub type MessageHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// One logical connection to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the connection is open. Fails with `AlreadyConnected`
    /// while a previous connection is not closed.
    async fn connect(&self, endpoint: &Url) -> Result<(), ChannelError>;
    fn send(&self, message: &Message) -> Result<(), ChannelError>;
    fn on_message(&self, handler: MessageHandler);
    /// Starts the heartbeat for the current connection.
    fn keep_alive(&self);
    /// Idempotent.
    fn close(&self);
    fn ready_state(&self) -> ReadyState;
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub keepalive_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

impl ChannelOptions {
    fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay
            .saturating_mul(attempt.max(1))
            .min(self.reconnect_max_delay)
    }
}

/// Websocket transport with automatic reconnection and a text heartbeat.
pub struct WsChannel {
    inner: Arc<ChannelState>,
}

struct ChannelState {
    options: ChannelOptions,
    connection: Mutex<Option<Connection>>,
    handler: Mutex<Option<MessageHandler>>,
    stats: Mutex<ChannelStats>,
    next_generation: AtomicU64,
}

struct Connection {
    generation: u64,
    ready_state: ReadyState,
    tx: Option<mpsc::UnboundedSender<WsMessage>>,
    shutdown: watch::Sender<bool>,
    /// One heartbeat loop per connection, however often `keep_alive` is called.
    keepalive_started: bool,
}

#[derive(Default, Clone)]
struct ChannelStats {
    bytes_out: u64,
    bytes_in: u64,
    messages_out: u64,
    messages_in: u64,
    last_message_at: Option<Instant>,
    last_ping_sent: Option<Instant>,
    last_rtt_ms: Option<f32>,
    last_disconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    connected_since: Option<Instant>,
    endpoint_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelStatsSnapshot {
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub messages_out: u64,
    pub messages_in: u64,
    pub last_rtt_ms: Option<f32>,
    pub last_message_age: Option<f32>,
    pub connected_duration: Option<f32>,
    pub reconnect_attempts: u32,
    pub endpoint_label: Option<String>,
    pub last_disconnect_secs: Option<f32>,
}

impl Default for WsChannel {
    fn default() -> Self {
        Self::new(ChannelOptions::default())
    }
}

impl WsChannel {
    pub fn new(options: ChannelOptions) -> Self {
        Self {
            inner: Arc::new(ChannelState {
                options,
                connection: Mutex::new(None),
                handler: Mutex::new(None),
                stats: Mutex::new(ChannelStats::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn stats_snapshot(&self) -> ChannelStatsSnapshot {
        self.inner.snapshot()
    }
}

#[async_trait]
impl Transport for WsChannel {
    async fn connect(&self, endpoint: &Url) -> Result<(), ChannelError> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        {
            let mut connection = self.inner.connection.lock();
            if connection
                .as_ref()
                .is_some_and(|c| c.ready_state != ReadyState::Closed)
            {
                return Err(ChannelError::AlreadyConnected);
            }
            *connection = Some(Connection {
                generation,
                ready_state: ReadyState::Connecting,
                tx: None,
                shutdown: shutdown_tx,
                keepalive_started: false,
            });
        }

        let (opened_tx, opened_rx) = oneshot::channel();
        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            generation,
            endpoint.to_string(),
            shutdown_rx,
            opened_tx,
        ));

        opened_rx.await.unwrap_or(Err(ChannelError::Closed))
    }

    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let tx = {
            let connection = self.inner.connection.lock();
            let connection = connection.as_ref().ok_or(ChannelError::NotConnected)?;
            if connection.ready_state != ReadyState::Open {
                return Err(ChannelError::NotOpen);
            }
            connection.tx.clone().ok_or(ChannelError::NotOpen)?
        };

        let json = serde_json::to_string(message)?;
        debug!(kind = message.kind(), "sending message");
        self.inner.record_outgoing(json.len() as u64);
        tx.send(WsMessage::Text(json.into()))
            .map_err(|_| ChannelError::NotOpen)
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.inner.handler.lock() = Some(handler);
    }

    fn keep_alive(&self) {
        let generation = {
            let mut connection = self.inner.connection.lock();
            match connection.as_mut() {
                Some(c) if !c.keepalive_started => {
                    c.keepalive_started = true;
                    c.generation
                }
                Some(_) => {
                    debug!("keepalive already running");
                    return;
                }
                None => return,
            }
        };
        let inner = Arc::clone(&self.inner);
        let interval = inner.options.keepalive_interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if inner.send_keepalive(generation).is_err() {
                    debug!("keepalive stopped");
                    break;
                }
            }
        });
    }

    fn close(&self) {
        if let Some(connection) = self.inner.connection.lock().take() {
            let _ = connection.shutdown.send(true);
            info!("Closing relay channel");
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|c| c.ready_state)
            .unwrap_or(ReadyState::Closed)
    }
}

/// Owns one connection from first attempt until `close`, reconnecting on loss.
async fn supervise(
    inner: Arc<ChannelState>,
    generation: u64,
    endpoint: String,
    mut shutdown: watch::Receiver<bool>,
    opened: oneshot::Sender<Result<(), ChannelError>>,
) {
    let mut opened = Some(opened);
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            result = connect_async(endpoint.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((stream, _)) => {
                attempt = 0;
                let (tx, rx) = mpsc::unbounded_channel();
                if !inner.install(generation, tx) {
                    break;
                }
                inner.mark_connected(&endpoint);
                match opened.take() {
                    Some(signal) => {
                        info!("Connected to relay at {endpoint}");
                        let _ = signal.send(Ok(()));
                    }
                    None => {
                        info!("Reconnected to relay at {endpoint}");
                        inner.dispatch(ChannelEvent::Reopened);
                    }
                }

                let closed_locally = pump(&inner, stream, rx, &mut shutdown).await;
                inner.mark_disconnected(generation);
                if closed_locally {
                    break;
                }
            }
            Err(e) => {
                if let Some(signal) = opened.take() {
                    warn!("Failed to connect to relay at {endpoint}: {e}");
                    inner.clear_connection(generation);
                    let _ = signal.send(Err(ChannelError::Connect(e.to_string())));
                    return;
                }
                warn!("Reconnect to {endpoint} failed (attempt {attempt}): {e}");
            }
        }

        attempt += 1;
        inner.stats.lock().reconnect_attempts += 1;
        let delay = inner.options.reconnect_delay(attempt);
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    inner.clear_connection(generation);
}

/// Moves frames until the socket drops (`false`) or the channel is closed (`true`).
async fn pump(
    inner: &ChannelState,
    stream: Socket,
    mut outgoing: mpsc::UnboundedReceiver<WsMessage>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            msg = outgoing.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        warn!("Relay send failed: {e}");
                        return false;
                    }
                }
                None => return true,
            },
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => inner.receive_text(text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Relay closed the connection");
                    return false;
                }
                Some(Err(e)) => {
                    warn!("Relay connection error: {e}");
                    return false;
                }
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                let _ = sink.close().await;
                return true;
            }
        }
    }
}

impl ChannelState {
    fn install(&self, generation: u64, tx: mpsc::UnboundedSender<WsMessage>) -> bool {
        match self.connection.lock().as_mut() {
            Some(connection) if connection.generation == generation => {
                connection.tx = Some(tx);
                connection.ready_state = ReadyState::Open;
                true
            }
            _ => false,
        }
    }

    fn clear_connection(&self, generation: u64) {
        let mut connection = self.connection.lock();
        if connection.as_ref().is_some_and(|c| c.generation == generation) {
            *connection = None;
        }
    }

    fn dispatch(&self, event: ChannelEvent) {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(event),
            None => debug!("No handler registered; dropping {event:?}"),
        }
    }

    fn receive_text(&self, text: &str) {
        self.record_incoming(text.len() as u64);
        if text == PONG {
            self.record_pong();
            return;
        }
        match serde_json::from_str::<Message>(text) {
            Ok(message) => {
                debug!(kind = message.kind(), from = message.client_id(), "received message");
                self.dispatch(ChannelEvent::Message(message));
            }
            Err(e) => warn!("Ignoring unparseable relay message: {e}"),
        }
    }

    fn send_keepalive(&self, generation: u64) -> Result<(), ()> {
        let tx = {
            let connection = self.connection.lock();
            match connection.as_ref() {
                Some(c) if c.generation == generation => c.tx.clone(),
                _ => return Err(()),
            }
        };
        // Between reconnects there is nothing to keep alive.
        let Some(tx) = tx else {
            return Ok(());
        };
        if tx.send(WsMessage::Text(PING.into())).is_err() {
            // The pump just stopped; the supervisor is about to reconnect.
            return Ok(());
        }
        self.stats.lock().last_ping_sent = Some(Instant::now());
        self.record_outgoing(PING.len() as u64);
        Ok(())
    }

    fn record_outgoing(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_out += bytes;
        stats.messages_out += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_incoming(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_in += bytes;
        stats.messages_in += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_pong(&self) {
        let mut stats = self.stats.lock();
        if let Some(sent) = stats.last_ping_sent.take() {
            stats.last_rtt_ms = Some(sent.elapsed().as_secs_f32() * 1000.0);
        }
    }

    fn mark_connected(&self, label: &str) {
        let mut stats = self.stats.lock();
        stats.connected_since = Some(Instant::now());
        stats.endpoint_label = Some(label.to_string());
    }

    fn mark_disconnected(&self, generation: u64) {
        if let Some(connection) = self.connection.lock().as_mut() {
            if connection.generation == generation {
                connection.tx = None;
                connection.ready_state = ReadyState::Connecting;
            }
        }
        let mut stats = self.stats.lock();
        stats.connected_since = None;
        stats.last_disconnect_at = Some(Instant::now());
        stats.last_ping_sent = None;
    }

    fn snapshot(&self) -> ChannelStatsSnapshot {
        let stats = self.stats.lock();
        let last_message_age = stats
            .last_message_at
            .map(|inst| inst.elapsed().as_secs_f32());
        let connected_duration = stats
            .connected_since
            .map(|inst| inst.elapsed().as_secs_f32());
        let last_disconnect_secs = stats
            .last_disconnect_at
            .map(|inst| inst.elapsed().as_secs_f32());
        ChannelStatsSnapshot {
            bytes_out: stats.bytes_out,
            bytes_in: stats.bytes_in,
            messages_out: stats.messages_out,
            messages_in: stats.messages_in,
            last_rtt_ms: stats.last_rtt_ms,
            last_message_age,
            connected_duration,
            reconnect_attempts: stats.reconnect_attempts,
            endpoint_label: stats.endpoint_label.clone(),
            last_disconnect_secs,
        }
    }
}
