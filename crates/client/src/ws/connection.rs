//! WebSocket connection with state management and auto-reconnect.
//!
//! A [`ConnectionManager`] owns at most one live transport. Lifecycle events
//! from every transport it creates are funnelled through a single driver task,
//! so they are handled one at a time and in order. Events from a transport the
//! manager has already replaced or torn down are discarded by generation.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::transport::{
    CloseInfo, Connector, EventSink, Transport, TransportEvent, TungsteniteConnector,
};
use crate::config::ConnectionConfig;
use crate::error::ConnectionError;

/// Connection state for a WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text frame as it arrived on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub data: String,
    pub received_at: DateTime<Utc>,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Lifecycle callbacks of a connection.
///
/// Callbacks run on the manager's driver task with no internal lock held, so
/// they may call back into the manager (through a [`ConnectionHandle`]).
#[derive(Clone, Default)]
pub struct ConnectionCallbacks {
    on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    on_close: Option<Callback<CloseInfo>>,
    on_error: Option<Callback<ConnectionError>>,
    on_message: Option<Callback<RawMessage>>,
}

impl ConnectionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&CloseInfo) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&RawMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    fn emit_open(&self) {
        if let Some(cb) = &self.on_open {
            cb();
        }
    }

    fn emit_close(&self, info: &CloseInfo) {
        if let Some(cb) = &self.on_close {
            cb(info);
        }
    }

    fn emit_error(&self, error: &ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    fn emit_message(&self, message: &RawMessage) {
        if let Some(cb) = &self.on_message {
            cb(message);
        }
    }
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    /// Generation of the transport whose events are currently accepted
    generation: u64,
    reconnect_attempt: u32,
    intentional_close: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Bumped whenever a timer is scheduled or cancelled
    timer_seq: u64,
    last_message: Option<RawMessage>,
}

struct Shared {
    url: String,
    config: ConnectionConfig,
    callbacks: ConnectionCallbacks,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<(u64, TransportEvent)>,
    state: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    self_ref: Weak<Shared>,
}

/// Validate a socket URL the way a browser `WebSocket` constructor would.
fn parse_ws_url(raw: &str) -> Result<Url, ConnectionError> {
    let url = Url::parse(raw).map_err(|e| ConnectionError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConnectionError::UnsupportedScheme(other.to_string())),
    }
}

impl Shared {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn connect(&self) {
        self.connect_locked(self.inner.lock());
    }

    fn connect_locked(&self, mut inner: MutexGuard<'_, Inner>) {
        let state = self.current_state();
        if state.is_connected() || state.is_connecting() {
            tracing::debug!(url = %self.url, %state, "connect() ignored");
            return;
        }

        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        inner.timer_seq += 1;
        inner.intentional_close = false;

        // Left over from a transport error that has not been followed by a close yet
        if let Some(mut stale) = inner.transport.take() {
            stale.close();
        }

        inner.generation += 1;
        let sink = EventSink::new(inner.generation, self.events.clone());
        self.set_state(ConnectionState::Connecting);

        let result = parse_ws_url(&self.url).and_then(|url| self.connector.connect(&url, sink));
        match result {
            Ok(transport) => {
                tracing::info!(url = %self.url, "Connecting");
                inner.transport = Some(transport);
            }
            Err(e) => {
                self.set_state(ConnectionState::Error);
                drop(inner);
                tracing::error!(url = %self.url, error = %e, "Failed to open WebSocket");
                self.callbacks.emit_error(&e);
            }
        }
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock();

        inner.intentional_close = true;
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        inner.timer_seq += 1;

        if let Some(mut transport) = inner.transport.take() {
            tracing::info!(url = %self.url, "Closing WebSocket");
            transport.close();
        }
        // Anything the closed transport still reports is stale from here on
        inner.generation += 1;
        inner.reconnect_attempt = 0;

        self.set_state(ConnectionState::Disconnected);
    }

    fn send(&self, text: String) -> bool {
        let mut inner = self.inner.lock();
        let connected = self.current_state().is_connected();

        match inner.transport.as_mut() {
            Some(transport) if connected && transport.is_open() => match transport.send(text) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(url = %self.url, error = %e, "Send failed");
                    false
                }
            },
            _ => {
                tracing::warn!(url = %self.url, "WebSocket is not connected, dropping message");
                false
            }
        }
    }

    fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(json),
            Err(e) => {
                tracing::error!(error = %e, "Serialize failed");
                false
            }
        }
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        let mut inner = self.inner.lock();
        if generation != inner.generation {
            tracing::debug!(generation, ?event, "Ignoring event from superseded transport");
            return;
        }

        match event {
            TransportEvent::Open => {
                inner.reconnect_attempt = 0;
                self.set_state(ConnectionState::Connected);
                drop(inner);
                tracing::info!(url = %self.url, "WebSocket connected");
                self.callbacks.emit_open();
            }
            TransportEvent::Message(data) => {
                let message = RawMessage {
                    data,
                    received_at: Utc::now(),
                };
                inner.last_message = Some(message.clone());
                drop(inner);
                self.callbacks.emit_message(&message);
            }
            TransportEvent::Error(reason) => {
                self.set_state(ConnectionState::Error);
                drop(inner);
                let error = ConnectionError::Transport(reason);
                tracing::error!(url = %self.url, %error, "WebSocket error");
                self.callbacks.emit_error(&error);
            }
            TransportEvent::Closed(info) => {
                inner.transport = None;
                self.set_state(ConnectionState::Disconnected);
                tracing::info!(
                    url = %self.url,
                    code = ?info.code,
                    clean = info.clean,
                    "WebSocket closed"
                );

                if self.config.auto_reconnect && !inner.intentional_close {
                    if self.config.allows_attempt(inner.reconnect_attempt) {
                        inner.reconnect_attempt += 1;
                        self.schedule_reconnect(&mut inner);
                    } else {
                        tracing::warn!(
                            url = %self.url,
                            max = self.config.max_reconnect_attempts,
                            "Max reconnect attempts reached"
                        );
                    }
                }

                drop(inner);
                self.callbacks.emit_close(&info);
            }
        }
    }

    fn schedule_reconnect(&self, inner: &mut Inner) {
        inner.timer_seq += 1;
        let seq = inner.timer_seq;
        let delay = self.config.reconnect_delay;
        let shared = self.self_ref.clone();

        tracing::info!(
            url = %self.url,
            delay_ms = delay.as_millis() as u64,
            attempt = inner.reconnect_attempt,
            "Scheduling reconnect"
        );

        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.fire_reconnect(seq);
            }
        }));
    }

    fn fire_reconnect(&self, seq: u64) {
        let mut inner = self.inner.lock();
        if inner.timer_seq != seq || inner.intentional_close {
            return;
        }
        // This is the running timer task; dropping the handle just detaches it
        inner.reconnect_timer = None;
        self.connect_locked(inner);
    }
}

/// Receive transport events and apply them one at a time.
async fn drive_events(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
) {
    while let Some((generation, event)) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_event(generation, event);
    }
}

/// A managed WebSocket connection to a single URL.
///
/// Dropping the manager disconnects it, cancels any pending reconnect, and
/// stops its driver task.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create a connection backed by `tokio-tungstenite`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        url: impl Into<String>,
        config: ConnectionConfig,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        Self::with_connector(url, config, callbacks, Arc::new(TungsteniteConnector))
    }

    /// Create a connection with a custom transport factory.
    pub fn with_connector(
        url: impl Into<String>,
        config: ConnectionConfig,
        callbacks: ConnectionCallbacks,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new_cyclic(|self_ref| Shared {
            url: url.into(),
            config,
            callbacks,
            connector,
            events,
            state,
            inner: Mutex::new(Inner {
                transport: None,
                generation: 0,
                reconnect_attempt: 0,
                intentional_close: false,
                reconnect_timer: None,
                timer_seq: 0,
                last_message: None,
            }),
            self_ref: self_ref.clone(),
        });

        let driver = tokio::spawn(drive_events(Arc::downgrade(&shared), receiver));
        let manager = Self { shared, driver };

        if manager.shared.config.auto_connect {
            manager.connect();
        }

        manager
    }

    /// Open the socket unless one is already opening or open.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Close the socket and stop any automatic reconnection. Idempotent.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Send a text frame if connected. Returns whether it was handed to the socket.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.shared.send(text.into())
    }

    /// Serialize `value` as JSON and send it if connected.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        self.shared.send_json(value)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn last_message(&self) -> Option<RawMessage> {
        self.shared.inner.lock().last_message.clone()
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.inner.lock().reconnect_attempt
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.shared.inner.lock().reconnect_timer.is_some()
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// A weak handle usable from inside callbacks.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.disconnect();
        self.driver.abort();
    }
}

/// Handle for driving a connection without owning it.
///
/// Every operation is a no-op once the owning [`ConnectionManager`] is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Weak<Shared>,
}

impl ConnectionHandle {
    pub fn connect(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.connect();
        }
    }

    pub fn disconnect(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.disconnect();
        }
    }

    pub fn send(&self, text: impl Into<String>) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.send(text.into()))
    }

    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.send_json(value))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .upgrade()
            .map(|shared| shared.current_state())
            .unwrap_or(ConnectionState::Disconnected)
    }
}
