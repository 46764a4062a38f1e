use std::net::SocketAddr;

use crate::error::{Result, TransportError};

/// A byte stream that never blocks the calling thread.
///
/// Both transfer calls may complete partially. `Ok(0)` means the transport
/// cannot make progress right now; the caller keeps its position and retries
/// on a later scheduler turn. A closed, aborted or timed-out stream reports an
/// error instead of `Ok(0)`.
pub trait Stream {
    /// Send up to `data.len()` bytes, returning how many were accepted.
    fn try_send(&mut self, data: &[u8]) -> Result<usize>;

    /// Receive up to `buf.len()` bytes, returning how many were written.
    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Close the stream. Further transfers fail with [`TransportError::Closed`].
    fn close(&mut self);

    /// Whether a peer is attached (false while a listening link waits).
    fn is_connected(&self) -> bool;

    /// Local socket address, if the transport has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn try_send(&mut self, data: &[u8]) -> Result<usize> {
        (**self).try_send(data)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).try_receive(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }
}

/// Host networking stack: hands out streams for outbound and inbound links.
pub trait Transport {
    type Stream: Stream;

    /// Open an outbound link to `addr`.
    fn connect(&mut self, addr: SocketAddr) -> Result<Self::Stream>;

    /// Open a listening link on `addr`. The returned stream attaches to the
    /// first peer that connects and reports `Ok(0)` until then.
    fn listen(&mut self, addr: SocketAddr) -> Result<Self::Stream>;

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Asynchronous notifications delivered by the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    DataAvailable,
    Closed,
    Aborted,
    TimedOut,
}

impl TransportEvent {
    /// The failure this event forces on in-flight operations, if any.
    pub fn into_error(self) -> Option<TransportError> {
        match self {
            Self::Connected | Self::DataAvailable => None,
            Self::Closed => Some(TransportError::Closed),
            Self::Aborted => Some(TransportError::Aborted),
            Self::TimedOut => Some(TransportError::TimedOut),
        }
    }

    /// Whether the event ends the link.
    pub fn is_terminal(self) -> bool {
        self.into_error().is_some()
    }
}
