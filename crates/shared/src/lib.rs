//! Wire types shared by producers and consumers of the job-events socket.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
