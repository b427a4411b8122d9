//! Connection error taxonomy.
//!
//! These never escape `connect()` or `send()` as `Err`; they are logged and
//! handed to the caller's `on_error` callback.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The configured URL could not be parsed.
    #[error("invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL parsed but does not use `ws` or `wss`.
    #[error("unsupported URL scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    /// The socket failed while opening or while open.
    #[error("transport error: {0}")]
    Transport(String),
}
