//! WebSocket connection management.
//!
//! - [`ConnectionManager`] owns one socket, reports its [`ConnectionState`]
//!   and reconnects after unexpected closes.
//! - [`Connector`]/[`Transport`] are the seam to the socket library;
//!   [`TungsteniteConnector`] is the production implementation.
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(
//!     "ws://localhost:8000/ws/jobs",
//!     ConnectionConfig::default(),
//!     ConnectionCallbacks::new().on_message(|m| println!("{}", m.data)),
//! );
//! manager.send(r#"{"type":"subscribe","job_id":"42"}"#);
//! ```

mod connection;
#[cfg(test)]
pub(crate) mod mock;
mod transport;

pub use connection::{
    ConnectionCallbacks, ConnectionHandle, ConnectionManager, ConnectionState, RawMessage,
};
pub use transport::{
    CloseInfo, Connector, EventSink, Transport, TransportEvent, TungsteniteConnector,
    ABNORMAL_CLOSE,
};
