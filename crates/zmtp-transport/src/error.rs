use std::net::SocketAddr;

/// Errors that can occur in stream transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream.
    #[error("connection closed")]
    Closed,

    /// The stream was reset or aborted.
    #[error("connection aborted")]
    Aborted,

    /// The stream timed out.
    #[error("connection timed out")]
    TimedOut,

    /// Nobody is listening on the requested port.
    #[error("connection refused on port {0}")]
    Refused(u16),

    /// Another listener already owns the requested port.
    #[error("port {0} already in use")]
    AddrInUse(u16),
}

pub type Result<T> = std::result::Result<T, TransportError>;
