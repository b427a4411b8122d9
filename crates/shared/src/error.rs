//! Errors raised while decoding frames from the job-events socket.

use thiserror::Error;

/// A frame that could not be turned into a protocol message.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The payload was not JSON, or did not have the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
