//! Transport seam between the connection manager and the socket library.
//!
//! A [`Connector`] builds a [`Transport`] synchronously (mirroring a browser
//! `WebSocket` constructor, which can throw on a bad URL) and then reports the
//! socket lifecycle asynchronously through an [`EventSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
};
use url::Url;

use crate::error::ConnectionError;

/// Close code used when the socket went away without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Details of a socket close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
    pub clean: bool,
}

impl CloseInfo {
    pub fn normal() -> Self {
        Self {
            code: Some(1000),
            reason: String::new(),
            clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: Some(ABNORMAL_CLOSE),
            reason: reason.into(),
            clean: false,
        }
    }

    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.as_str().to_owned(),
                clean: true,
            },
            None => Self {
                code: None,
                reason: String::new(),
                clean: true,
            },
        }
    }
}

/// Lifecycle events reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Closed(CloseInfo),
}

/// Where a transport reports its lifecycle events.
///
/// Every sink is stamped with the generation of the connection attempt it was
/// created for, so the manager can discard events from sockets it has already
/// replaced or torn down.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// One live (or opening) socket.
pub trait Transport: Send {
    /// Queue a text frame. Only called while the transport reports open.
    fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Whether the socket has completed its handshake and not yet closed.
    fn is_open(&self) -> bool;

    /// Begin closing the socket.
    fn close(&mut self);
}

/// Factory for transports.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url, sink: EventSink) -> Result<Box<dyn Transport>, ConnectionError>;
}

/// Commands for the socket task
enum Outbound {
    Text(String),
    Close,
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &Url, sink: EventSink) -> Result<Box<dyn Transport>, ConnectionError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ConnectionError::Transport(
                "no tokio runtime available".to_string(),
            ));
        }

        let (outbound, receiver) = unbounded();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_socket(url.to_string(), sink, receiver, open.clone()));

        Ok(Box::new(TungsteniteTransport { outbound, open }))
    }
}

struct TungsteniteTransport {
    outbound: UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl Transport for TungsteniteTransport {
    fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.outbound
            .unbounded_send(Outbound::Text(text))
            .map_err(|e| ConnectionError::Transport(format!("Failed to send: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.unbounded_send(Outbound::Close);
    }
}

/// Drive one socket from handshake to close.
///
/// Always ends with exactly one `Closed` event. Dropping the transport
/// closes the outbound channel, which closes the socket as well. Either one
/// during the handshake abandons it before the upgrade request goes out.
async fn run_socket(
    url: String,
    sink: EventSink,
    mut outbound: UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    let handshake = connect_async(url.as_str());
    tokio::pin!(handshake);

    let ws_stream = loop {
        tokio::select! {
            biased;
            command = outbound.next() => match command {
                Some(Outbound::Text(_)) => {
                    tracing::warn!(%url, "Dropping frame queued before the handshake finished");
                }
                Some(Outbound::Close) | None => {
                    tracing::info!(%url, "WebSocket closed during handshake");
                    sink.emit(TransportEvent::Closed(CloseInfo::abnormal(
                        "closed before the handshake finished",
                    )));
                    return;
                }
            },
            result = &mut handshake => match result {
                Ok((ws_stream, _response)) => break ws_stream,
                Err(e) => {
                    tracing::error!(%url, error = %e, "WebSocket handshake failed");
                    sink.emit(TransportEvent::Error(e.to_string()));
                    sink.emit(TransportEvent::Closed(CloseInfo::abnormal(e.to_string())));
                    return;
                }
            },
        }
    };

    open.store(true, Ordering::SeqCst);
    sink.emit(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    let close = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    tracing::debug!(%url, frame = %text, "WebSocket received");
                    sink.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(%url, "WebSocket received close frame");
                    break CloseInfo::from_frame(frame);
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                }
                Some(Err(e)) => {
                    tracing::error!(%url, error = %e, "WebSocket read error");
                    sink.emit(TransportEvent::Error(e.to_string()));
                    break CloseInfo::abnormal(e.to_string());
                }
                None => break CloseInfo::abnormal("connection dropped"),
            },
            command = outbound.next() => match command {
                Some(Outbound::Text(text)) => {
                    tracing::debug!(%url, frame = %text, "Sending");
                    if let Err(e) = write.send(Message::text(text)).await {
                        tracing::error!(%url, error = %e, "Send failed");
                        sink.emit(TransportEvent::Error(e.to_string()));
                        break CloseInfo::abnormal(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    break CloseInfo::normal();
                }
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    tracing::info!(%url, code = ?close.code, "WebSocket closed");
    sink.emit(TransportEvent::Closed(close));
}
