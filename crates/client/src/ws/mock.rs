//! In-memory connector for exercising the connection manager in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use super::transport::{CloseInfo, Connector, EventSink, Transport, TransportEvent};
use crate::error::ConnectionError;

/// Let the driver task drain every queued transport event.
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Test side of one transport created by [`MockConnector`].
#[derive(Clone)]
pub(crate) struct MockSocket {
    pub url: String,
    sink: EventSink,
    sent: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.sink.emit(TransportEvent::Open);
    }

    pub fn message(&self, text: &str) {
        self.sink.emit(TransportEvent::Message(text.to_string()));
    }

    pub fn error(&self, reason: &str) {
        self.sink.emit(TransportEvent::Error(reason.to_string()));
    }

    /// Simulate the server side going away.
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.sink
            .emit(TransportEvent::Closed(CloseInfo::abnormal("connection dropped")));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Whether the manager asked this transport to close.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    socket: MockSocket,
}

impl Transport for MockTransport {
    fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.socket.sent.lock().push(text);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.socket.open.store(false, Ordering::SeqCst);
        self.socket.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every transport it creates. Clones share the same record.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    sockets: Arc<Mutex<Vec<MockSocket>>>,
    fail_next: Arc<Mutex<Option<ConnectionError>>>,
}

impl MockConnector {
    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.sockets.lock().len()
    }

    /// The most recently created transport.
    pub fn last(&self) -> MockSocket {
        self.sockets
            .lock()
            .last()
            .cloned()
            .expect("no transport has been created")
    }

    /// Make the next `connect` fail synchronously.
    pub fn fail_next(&self, error: ConnectionError) {
        *self.fail_next.lock() = Some(error);
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &Url, sink: EventSink) -> Result<Box<dyn Transport>, ConnectionError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        let socket = MockSocket {
            url: url.to_string(),
            sink,
            sent: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.sockets.lock().push(socket.clone());
        Ok(Box::new(MockTransport { socket }))
    }
}
