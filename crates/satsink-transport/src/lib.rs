//! Sink endpoints for satsink.
//!
//! Provides the byte-stream destinations each demultiplexed channel is
//! delivered to:
//! - Named pipes (created on demand, opened lazily)
//! - Unix domain sockets (connect as a sink, or listen for inbound packets)
//! - Regular files (append mode)
//!
//! This is the lowest layer of satsink. Delivery workers write into an
//! [`Endpoint`]; nothing here knows about packets or framing.

pub mod endpoint;
pub mod error;
pub mod fifo;
pub mod stream;
pub mod uds;

pub use endpoint::{Endpoint, SinkTarget};
pub use error::{Result, TransportError};
pub use fifo::NamedPipe;
pub use stream::SinkStream;
pub use uds::UnixDomainSocket;
