//! jobwatch client
//!
//! Keeps a WebSocket connection to the job-events endpoint of a content
//! generation backend, reconnects after unexpected closes, and turns inbound
//! frames into typed job lifecycle callbacks.

pub mod config;
pub mod error;
pub mod job_updates;
pub mod logging;
pub mod ws;

pub use config::{ClientConfig, ConnectionConfig};
pub use error::ConnectionError;
pub use job_updates::{JobUpdateCallbacks, JobUpdates, JobUpdatesOptions};
pub use ws::{ConnectionCallbacks, ConnectionHandle, ConnectionManager, ConnectionState};

pub use jobwatch_shared as shared;
