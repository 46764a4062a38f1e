//! Non-blocking stream transport contract for ZMTP peers.
//!
//! This is the lowest layer of zmtp. The protocol core never blocks on the
//! transport: it asks a [`Stream`] to move "up to N bytes" and treats a
//! zero-byte answer as "try again on a later scheduler turn".
//!
//! Two transports ship with the crate:
//! - [`TcpTransport`] over non-blocking `std::net` sockets
//! - [`MemoryTransport`], an in-process loopback used by tests and demos

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryStream, MemoryTransport};
pub use tcp::{TcpLink, TcpTransport};
pub use traits::{Stream, Transport, TransportEvent};
