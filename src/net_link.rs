//! Persistent duplex link to the analyzer.
//!
//! `ConnectionManager` owns at most one logical connection. A supervisor task
//! per connection pumps inbound messages and outbound commands, and runs the
//! reconnection cycle when the link drops without `disconnect()` having been
//! called.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::backoff::{BackoffPolicy, LinearBackoff};
use crate::config::Config;
use crate::error::{ConfigurationError, ConnectionError, ProtocolError};
use crate::protocol::{AnalysisResult, ErrorNotification, InboundMessage};

/// One message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub(crate) fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }
}

/// Write half of an open link.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError>;
    async fn close(&mut self);
}

/// Read half of an open link. `next` must be cancel-safe; `None` means the
/// peer is gone.
#[async_trait]
pub trait FrameStream: Send {
    async fn next(&mut self) -> Option<Result<Frame, ConnectionError>>;
}

pub type LinkHalves = (Box<dyn FrameSink>, Box<dyn FrameStream>);

/// Opens the underlying transport.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<LinkHalves, ConnectionError>;
}

// ======================== WebSocket transport ========================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite backed `Connector`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<LinkHalves, ConnectionError> {
        let (ws_stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        log::debug!("Handshake response: {}", response.status());

        let (write, read) = ws_stream.split();
        Ok((Box::new(WsSink(write)), Box::new(WsSource(read))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| ConnectionError::Closed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            log::debug!("Error while closing WebSocket: {}", e);
        }
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsSource {
    async fn next(&mut self) -> Option<Result<Frame, ConnectionError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data.to_vec()))),
                Ok(Message::Close(frame)) => {
                    log::info!("Server closed connection: {:?}", frame);
                    return Some(Err(ConnectionError::Closed("server closed connection".into())));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(ConnectionError::Closed(e.to_string()))),
            }
        }
    }
}

// ======================== Connection manager ========================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PermanentlyFailed,
}

/// Reported to the owner of the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    /// The link dropped unexpectedly; reconnection follows.
    Disconnected,
    Analysis(AnalysisResult),
    AnalyzerError(ErrorNotification),
    /// A non-terminal failure worth surfacing, e.g. a send while not connected.
    Error(ConnectionError),
    /// Reconnection is exhausted. No further automatic attempts are made.
    PermanentlyFailed(ConnectionError),
}

#[derive(Clone)]
pub struct ConnectionSettings {
    pub endpoint: Url,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub policy: Arc<dyn BackoffPolicy>,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigurationError> {
        Ok(Self {
            endpoint: config.streaming_endpoint()?,
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
            policy: Arc::new(LinearBackoff::new(
                config.reconnect_base_delay,
                config.max_reconnect_attempts,
            )),
        })
    }
}

enum LinkCommand {
    Send {
        frame: Frame,
        ack: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Close,
}

struct LinkHandle {
    commands: mpsc::Sender<LinkCommand>,
    task: JoinHandle<()>,
}

struct Inner {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    attempt: AtomicU32,
    // 主动断开时置位，防止关闭触发重连
    suppressed: AtomicBool,
    link: Mutex<Option<LinkHandle>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, Option<LinkHandle>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // 接收端已关闭说明会话已结束，丢弃事件即可
        let _ = self.events.send(event);
    }

    fn suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<LinkHalves, ConnectionError> {
        let endpoint = &self.settings.endpoint;
        log::info!("Connecting to {}...", endpoint);
        match timeout(self.settings.connect_timeout, self.connector.connect(endpoint)).await {
            Ok(Ok(halves)) => {
                log::info!("Connected!");
                Ok(halves)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout(self.settings.connect_timeout)),
        }
    }

    fn dispatch(&self, text: &str) {
        match InboundMessage::decode(text) {
            InboundMessage::Analysis(result) => {
                log::info!(
                    "Analysis received: suspicious={}, confidence={:.2}, spans={}",
                    result.suspicious(),
                    result.confidence(),
                    result.detected_spans().len(),
                );
                self.emit(ConnectionEvent::Analysis(result));
            }
            InboundMessage::Error(notification) => {
                log::warn!("Analyzer error: {}", notification.message);
                self.emit(ConnectionEvent::AnalyzerError(notification));
            }
            InboundMessage::Malformed(e) => {
                log::warn!("Dropping malformed message: {}", e);
            }
        }
    }
}

/// Owns one logical connection to `{endpoint}`. Cheap to clone; all clones
/// drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            settings,
            connector,
            events,
            state,
            attempt: AtomicU32::new(0),
            suppressed: AtomicBool::new(false),
            link: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Reconnect attempts since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.inner.attempt.load(Ordering::SeqCst)
    }

    /// Tear down any prior connection, then open a new one.
    ///
    /// Resolves once the transport is ready or fails with
    /// `ConnectionError::Timeout`. A failure here does not start the
    /// reconnection cycle; later drops do.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.inner.connect_lock.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<(), ConnectionError> {
        self.inner.suppressed.store(true, Ordering::SeqCst);
        self.shutdown_link().await;
        self.inner.suppressed.store(false, Ordering::SeqCst);

        self.inner.set_state(ConnectionState::Connecting);
        let (sink, stream) = match self.inner.open().await {
            Ok(halves) => halves,
            Err(e) => {
                log::warn!("Connection to {} failed: {}", self.inner.settings.endpoint, e);
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.inner.attempt.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connected);
        self.inner.emit(ConnectionEvent::Connected);

        let (commands, commands_rx) = mpsc::channel(32);
        let task = tokio::spawn(supervise(self.inner.clone(), sink, stream, commands_rx));
        *self.inner.link() = Some(LinkHandle { commands, task });
        Ok(())
    }

    /// Close the connection without triggering reconnection. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.suppressed.store(true, Ordering::SeqCst);
        self.shutdown_link().await;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    async fn shutdown_link(&self) {
        let link = self.inner.link().take();
        let Some(LinkHandle { commands, mut task }) = link else {
            return;
        };
        log::info!("Disconnecting from {}", self.inner.settings.endpoint);
        if commands.try_send(LinkCommand::Close).is_err() {
            task.abort();
        }
        drop(commands);
        let limit = self.inner.settings.connect_timeout;
        if timeout(limit, &mut task).await.is_err() {
            log::warn!("Link task did not stop within {:?}, aborting", limit);
            task.abort();
        }
    }

    /// Send one frame and wait for the transport to accept it.
    ///
    /// When not connected the frame is dropped, `NotConnected` is reported on
    /// the event channel, and one connect attempt is kicked off if the
    /// manager is idle.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        let commands = match self.state() {
            ConnectionState::Connected => self.inner.link().as_ref().map(|l| l.commands.clone()),
            _ => None,
        };
        let Some(commands) = commands else {
            log::warn!("WebSocket not connected ({:?}), dropping {} bytes", self.state(), frame.len());
            self.inner.emit(ConnectionEvent::Error(ConnectionError::NotConnected));
            self.kick_connect();
            return Err(ConnectionError::NotConnected);
        };

        let (ack, ack_rx) = oneshot::channel();
        commands
            .send(LinkCommand::Send { frame, ack })
            .await
            .map_err(|_| ConnectionError::NotConnected)?;

        let limit = self.inner.settings.send_timeout;
        match timeout(limit, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::Closed("link dropped before acknowledging".into())),
            Err(_) => Err(ConnectionError::Timeout(limit)),
        }
    }

    fn kick_connect(&self) {
        if self.state() != ConnectionState::Disconnected || self.inner.suppressed() {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            // 已有连接尝试在进行中
            let Ok(_guard) = manager.inner.connect_lock.try_lock() else {
                return;
            };
            if manager.state() != ConnectionState::Disconnected || manager.inner.suppressed() {
                return;
            }
            if let Err(e) = manager.connect_locked().await {
                log::warn!("Opportunistic connect failed: {}", e);
            }
        });
    }
}

// ======================== Supervisor ========================

enum LinkExit {
    Closed,
    Lost(ConnectionError),
}

async fn supervise(
    inner: Arc<Inner>,
    mut sink: Box<dyn FrameSink>,
    mut stream: Box<dyn FrameStream>,
    mut commands: mpsc::Receiver<LinkCommand>,
) {
    loop {
        let reason = match pump(&inner, sink.as_mut(), stream.as_mut(), &mut commands).await {
            LinkExit::Closed => return,
            LinkExit::Lost(reason) => reason,
        };
        if inner.suppressed() {
            return;
        }
        log::warn!("Connection lost: {}", reason);
        inner.emit(ConnectionEvent::Disconnected);

        match reconnect(&inner, &mut commands).await {
            Some((new_sink, new_stream)) => {
                sink = new_sink;
                stream = new_stream;
            }
            None => return,
        }
    }
}

// 主循环，处理读取和写入
async fn pump(
    inner: &Inner,
    sink: &mut dyn FrameSink,
    stream: &mut dyn FrameStream,
    commands: &mut mpsc::Receiver<LinkCommand>,
) -> LinkExit {
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => inner.dispatch(&text),
                Some(Ok(Frame::Binary(data))) => {
                    let e = ProtocolError::UnexpectedBinary(data.len());
                    log::warn!("Dropping inbound message: {}", e);
                }
                Some(Err(e)) => return LinkExit::Lost(e),
                None => return LinkExit::Lost(ConnectionError::Closed("stream ended".into())),
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Send { frame, ack }) => {
                    let len = frame.len();
                    let result = sink.send(frame).await;
                    let lost = result.as_ref().err().cloned();
                    let _ = ack.send(result);
                    if let Some(e) = lost {
                        return LinkExit::Lost(e);
                    }
                    log::debug!("Sent {} bytes", len);
                }
                Some(LinkCommand::Close) | None => {
                    sink.close().await;
                    return LinkExit::Closed;
                }
            },
        }
    }
}

async fn reconnect(
    inner: &Inner,
    commands: &mut mpsc::Receiver<LinkCommand>,
) -> Option<LinkHalves> {
    let policy = inner.settings.policy.clone();
    loop {
        let attempt = inner.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if !policy.should_retry(attempt) {
            let error = ConnectionError::PermanentlyFailed {
                attempts: attempt - 1,
            };
            log::error!("Max reconnection attempts reached: {}", error);
            inner.set_state(ConnectionState::PermanentlyFailed);
            inner.emit(ConnectionEvent::PermanentlyFailed(error));
            return None;
        }

        inner.set_state(ConnectionState::Reconnecting);
        let delay = policy.next_delay(attempt);
        log::info!("Reconnecting in {:?}... attempt {}", delay, attempt);
        unless_closed(tokio::time::sleep(delay), commands).await?;
        if inner.suppressed() {
            return None;
        }

        inner.set_state(ConnectionState::Connecting);
        match unless_closed(inner.open(), commands).await? {
            Ok(halves) => {
                inner.attempt.store(0, Ordering::SeqCst);
                inner.set_state(ConnectionState::Connected);
                inner.emit(ConnectionEvent::Connected);
                return Some(halves);
            }
            Err(e) => log::warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
}

/// Drive `fut` while answering commands. `None` when a close was requested.
async fn unless_closed<F: Future>(
    fut: F,
    commands: &mut mpsc::Receiver<LinkCommand>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            command = commands.recv() => match command {
                Some(LinkCommand::Send { ack, .. }) => {
                    let _ = ack.send(Err(ConnectionError::NotConnected));
                }
                Some(LinkCommand::Close) | None => return None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, Plan};
    use tokio::time::{sleep, Instant};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            endpoint: Url::parse("ws://analyzer.test/ws").unwrap(),
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            policy: Arc::new(LinearBackoff::default()),
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("timed out waiting for a connection event")
            .expect("event channel closed")
    }

    const ANALYSIS: &str = r#"{"suspicious": true, "confidence": 0.92, "sentiments": "Anxious", "reasons": ["urgency language"], "timestamps": [{"start":1.2,"end":3.4,"text":"send the code","type":"otp"}]}"#;

    #[tokio::test(start_paused = true)]
    async fn connect_resolves_once_transport_is_ready() {
        let connector = MockConnector::new();
        let (manager, mut events) = ConnectionManager::new(settings(), connector.clone());

        manager.connect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_without_starting_reconnection() {
        let connector = MockConnector::with_plans([Plan::Hang], Plan::Accept);
        let (manager, _events) = ConnectionManager::new(settings(), connector.clone());

        let started = Instant::now();
        let err = manager.connect().await.unwrap_err();

        assert_eq!(err, ConnectionError::Timeout(Duration::from_secs(5)));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connected_closes_the_prior_link_first() {
        let connector = MockConnector::new();
        let (manager, _events) = ConnectionManager::new(settings(), connector.clone());

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(connector.log(), ["open#1", "close#1", "open#2"]);
        assert!(connector.peer(0).is_closed());
        assert!(!connector.peer(1).is_closed());
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_is_bounded_and_linear() {
        let connector = MockConnector::with_plans([Plan::Accept], Plan::Refuse);
        let (manager, mut events) = ConnectionManager::new(settings(), connector.clone());
        manager.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        let dropped_at = Instant::now();
        connector.peer(0).hang_up();

        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::PermanentlyFailed(ConnectionError::PermanentlyFailed { attempts: 3 })
        );
        // 1s + 2s + 3s of backoff
        let waited = dropped_at.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7));
        assert_eq!(connector.opens(), 4);
        assert_eq!(manager.state(), ConnectionState::PermanentlyFailed);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_attempts() {
        let connector =
            MockConnector::with_plans([Plan::Accept, Plan::Refuse, Plan::Accept], Plan::Refuse);
        let (manager, mut events) = ConnectionManager::new(settings(), connector.clone());
        manager.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        connector.peer(0).hang_up();

        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_suppresses_reconnection_and_is_idempotent() {
        let connector = MockConnector::new();
        let (manager, _events) = ConnectionManager::new(settings(), connector.clone());
        manager.connect().await.unwrap();

        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(connector.peer(0).is_closed());

        assert_eq!(
            manager.send(Frame::Text("late".into())).await,
            Err(ConnectionError::NotConnected)
        );
        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_connected_reaches_the_peer() {
        let connector = MockConnector::new();
        let (manager, _events) = ConnectionManager::new(settings(), connector.clone());
        manager.connect().await.unwrap();

        manager.send(Frame::Text("one".into())).await.unwrap();
        manager.send(Frame::Binary(vec![1, 2, 3])).await.unwrap();

        assert_eq!(
            connector.peer(0).sent(),
            [Frame::Text("one".into()), Frame::Binary(vec![1, 2, 3])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_idle_is_dropped_and_kicks_one_connect() {
        let connector = MockConnector::new();
        let (manager, mut events) = ConnectionManager::new(settings(), connector.clone());

        let result = manager.send(Frame::Text("early".into())).await;

        assert_eq!(result, Err(ConnectionError::NotConnected));
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::Error(ConnectionError::NotConnected)
        );
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(connector.opens(), 1);
        assert!(connector.peer(0).sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_are_decoded_and_malformed_ones_dropped() {
        let connector = MockConnector::new();
        let (manager, mut events) = ConnectionManager::new(settings(), connector.clone());
        manager.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        let peer = connector.peer(0);
        peer.push_text("{ not json");
        peer.push_binary(&[0u8; 16]);
        peer.push_text(ANALYSIS);
        peer.push_text(r#"{"error": "quota exceeded"}"#);

        let ConnectionEvent::Analysis(result) = next_event(&mut events).await else {
            panic!("expected an analysis event");
        };
        assert_eq!(result.confidence(), 0.92);
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::AnalyzerError(ErrorNotification {
                message: "quota exceeded".into(),
                code: None,
                details: None,
            })
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_starts_reconnection() {
        let connector = MockConnector::new();
        let (manager, mut events) = ConnectionManager::new(settings(), connector.clone());
        manager.connect().await.unwrap();
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

        connector.peer(0).fail_sends();
        assert!(manager.send(Frame::Text("x".into())).await.is_err());

        assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
        assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
        assert_eq!(connector.opens(), 2);
    }
}
